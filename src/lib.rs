//! Weekly arbovirus case forecasts for Brazilian municipalities.
//!
//! Daily climate and weekly surveillance records are aligned per
//! epidemiological week, turned into lag and rolling-window features and fed
//! to a small feedforward regressor that predicts suspected cases, confirmed
//! cases and incidence a few weeks ahead.

pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod ml;
pub mod repo;
pub mod telemetry;

pub use error::{PipelineError, PipelineResult};
