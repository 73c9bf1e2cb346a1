//! Open-Meteo historical weather archive

use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::Collected;
use crate::domain::{ClimateRecord, Municipality};

const DAILY_VARIABLES: &str = "temperature_2m_max,temperature_2m_min,temperature_2m_mean,\
relative_humidity_2m_mean,precipitation_sum,wind_speed_10m_mean,surface_pressure_mean";
const TIMEZONE: &str = "America/Sao_Paulo";

pub struct OpenMeteoClient {
    client: ClientWithMiddleware,
    archive_url: String,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    daily: DailySeries,
}

#[derive(Debug, Default, Deserialize)]
struct DailySeries {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_mean: Vec<Option<f64>>,
    #[serde(default)]
    surface_pressure_mean: Vec<Option<f64>>,
}

fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

impl DailySeries {
    fn record(&self, municipality: &Municipality, i: usize) -> Option<ClimateRecord> {
        let date = NaiveDate::parse_from_str(self.time.get(i)?, "%Y-%m-%d").ok()?;
        Some(ClimateRecord {
            municipality_code: municipality.code.clone(),
            date,
            temperature_max: at(&self.temperature_2m_max, i)?,
            temperature_min: at(&self.temperature_2m_min, i)?,
            temperature_avg: at(&self.temperature_2m_mean, i)?,
            humidity: at(&self.relative_humidity_2m_mean, i)?,
            precipitation: at(&self.precipitation_sum, i)?,
            wind_speed: at(&self.wind_speed_10m_mean, i)?,
            pressure: at(&self.surface_pressure_mean, i)?,
        })
    }
}

impl OpenMeteoClient {
    pub fn new(client: ClientWithMiddleware, archive_url: impl Into<String>) -> Self {
        Self {
            client,
            archive_url: archive_url.into(),
        }
    }

    /// Daily climate for `municipality` over `[start, end]`.
    pub async fn fetch_daily(
        &self,
        municipality: &Municipality,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Collected<ClimateRecord>> {
        debug!(
            municipality = %municipality.code,
            %start,
            %end,
            "Fetching Open-Meteo archive"
        );

        let response = self
            .client
            .get(&self.archive_url)
            .query(&[
                ("latitude", municipality.latitude.to_string()),
                ("longitude", municipality.longitude.to_string()),
                ("start_date", start.to_string()),
                ("end_date", end.to_string()),
                ("daily", DAILY_VARIABLES.to_string()),
                ("timezone", TIMEZONE.to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to Open-Meteo")?
            .error_for_status()
            .context("Open-Meteo returned an error status")?;

        let body: ArchiveResponse = response
            .json()
            .await
            .context("Failed to parse Open-Meteo response")?;

        let mut collected = Collected::default();
        for i in 0..body.daily.time.len() {
            match body.daily.record(municipality, i) {
                Some(record) => match record.validate() {
                    Ok(()) => collected.records.push(record),
                    Err(e) => {
                        warn!(municipality = %municipality.code, date = %record.date, error = %e, "Skipping implausible climate record");
                        collected.skipped += 1;
                    }
                },
                None => {
                    warn!(
                        municipality = %municipality.code,
                        day = body.daily.time.get(i).map(String::as_str).unwrap_or("?"),
                        "Skipping incomplete climate record"
                    );
                    collected.skipped += 1;
                }
            }
        }

        info!(
            municipality = %municipality.code,
            records = collected.records.len(),
            skipped = collected.skipped,
            "Collected climate data"
        );
        Ok(collected)
    }
}
