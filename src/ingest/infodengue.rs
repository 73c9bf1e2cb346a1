//! InfoDengue `alertcity` surveillance feed

use anyhow::{Context, Result};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::Collected;
use crate::domain::{DiseaseType, EpiWeek, Municipality, SurveillanceRecord};

pub struct InfoDengueClient {
    client: ClientWithMiddleware,
    base_url: String,
}

/// One weekly row as published by InfoDengue.
#[derive(Debug, Deserialize)]
struct AlertCityRow {
    /// Epidemiological week encoded as `YYYYWW`
    #[serde(rename = "SE")]
    se: i64,
    casos_est: Option<f64>,
    casos: Option<f64>,
    casos_confirmados: Option<f64>,
    #[serde(rename = "casos_prováveis")]
    casos_provaveis: Option<f64>,
    p_inc100k: Option<f64>,
    nivel: Option<i64>,
    pop: Option<f64>,
}

fn count(value: Option<f64>) -> Option<u32> {
    match value {
        None => Some(0),
        Some(v) if v.is_finite() && v >= 0.0 && v <= f64::from(u32::MAX) => Some(v.round() as u32),
        Some(_) => None,
    }
}

impl AlertCityRow {
    fn into_record(
        self,
        municipality: &Municipality,
        disease: DiseaseType,
    ) -> std::result::Result<SurveillanceRecord, String> {
        let year = i32::try_from(self.se / 100).map_err(|e| e.to_string())?;
        let week = u32::try_from(self.se % 100).map_err(|e| e.to_string())?;
        let suspected = self.casos_est.or(self.casos);
        let record = SurveillanceRecord {
            municipality_code: municipality.code.clone(),
            disease_type: disease,
            year,
            epidemiological_week: week,
            cases_suspected: count(suspected).ok_or("invalid suspected case count")?,
            cases_confirmed: count(self.casos_confirmados).ok_or("invalid confirmed case count")?,
            cases_probable: count(self.casos_provaveis).ok_or("invalid probable case count")?,
            incidence_rate: self.p_inc100k.unwrap_or(0.0),
            alert_level: u8::try_from(self.nivel.unwrap_or(0)).map_err(|e| e.to_string())?,
            population: self
                .pop
                .filter(|p| p.is_finite() && *p > 0.0)
                .map(|p| p.round() as u64),
        };
        record.validate().map_err(|e| e.to_string())?;
        Ok(record)
    }
}

impl InfoDengueClient {
    pub fn new(client: ClientWithMiddleware, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Weekly records for `municipality` and `disease` between two
    /// epidemiological weeks, inclusive.
    pub async fn fetch_weeks(
        &self,
        municipality: &Municipality,
        disease: DiseaseType,
        from: EpiWeek,
        to: EpiWeek,
    ) -> Result<Collected<SurveillanceRecord>> {
        debug!(
            municipality = %municipality.code,
            %disease,
            %from,
            %to,
            "Fetching InfoDengue alertcity"
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("geocode", municipality.code.to_string()),
                ("disease", disease.to_string()),
                ("format", "json".to_string()),
                ("ew_start", from.week.to_string()),
                ("ew_end", to.week.to_string()),
                ("ey_start", from.year.to_string()),
                ("ey_end", to.year.to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to InfoDengue")?
            .error_for_status()
            .context("InfoDengue returned an error status")?;

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .context("Failed to parse InfoDengue response")?;

        let mut collected = Collected::default();
        for raw in rows {
            let parsed = serde_json::from_value::<AlertCityRow>(raw)
                .map_err(|e| e.to_string())
                .and_then(|row| row.into_record(municipality, disease));
            match parsed {
                Ok(record) => collected.records.push(record),
                Err(reason) => {
                    warn!(municipality = %municipality.code, %disease, %reason, "Skipping invalid surveillance entry");
                    collected.skipped += 1;
                }
            }
        }

        info!(
            municipality = %municipality.code,
            %disease,
            records = collected.records.len(),
            skipped = collected.skipped,
            "Collected surveillance data"
        );
        Ok(collected)
    }
}
