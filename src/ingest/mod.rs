//! Data collection clients
//!
//! Raw API payloads are validated here and only typed records leave this
//! module. Entries that fail validation are skipped with a warning. HTTP
//! retries with exponential backoff are applied to every request.

use anyhow::{Context, Result};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use std::time::Duration;

pub mod infodengue;
pub mod open_meteo;

pub use infodengue::InfoDengueClient;
pub use open_meteo::OpenMeteoClient;

/// Records accepted from one fetch, with the count of rejected entries.
#[derive(Debug, Clone, Serialize)]
pub struct Collected<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
        }
    }
}

/// HTTP client with timeout and transient-error retries.
pub fn http_client(timeout_seconds: u64, max_retries: u32) -> Result<ClientWithMiddleware> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .user_agent(concat!("arbovirus-forecast/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
    Ok(ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}
