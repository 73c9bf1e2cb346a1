//! Record storage
//!
//! The pipeline reads climate and surveillance ranges and writes forecasts
//! through [`RecordStore`]. An in-memory store is always available; the
//! Postgres store is compiled with the `db` feature.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::Config;
use crate::domain::{
    CleanupReport, ClimateRecord, DiseaseType, Forecast, MunicipalityCode, RecordStatistics,
    SurveillanceRecord,
};

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::MemoryStore;

/// Climate range filter. Bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClimateQuery {
    pub municipality_code: Option<MunicipalityCode>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Keep only the most recent `limit` records
    pub limit: Option<usize>,
}

impl ClimateQuery {
    pub fn range(code: &MunicipalityCode, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            municipality_code: Some(code.clone()),
            start_date: Some(start),
            end_date: Some(end),
            limit: None,
        }
    }

    pub fn matches(&self, record: &ClimateRecord) -> bool {
        self.municipality_code
            .as_ref()
            .map_or(true, |c| c == &record.municipality_code)
            && self.start_date.map_or(true, |d| record.date >= d)
            && self.end_date.map_or(true, |d| record.date <= d)
    }
}

/// Surveillance filter by year and optional week range. Bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SurveillanceQuery {
    pub municipality_code: Option<MunicipalityCode>,
    pub disease_type: Option<DiseaseType>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub start_week: Option<u32>,
    pub end_week: Option<u32>,
    pub limit: Option<usize>,
}

impl SurveillanceQuery {
    pub fn years(code: &MunicipalityCode, disease: DiseaseType, start: i32, end: i32) -> Self {
        Self {
            municipality_code: Some(code.clone()),
            disease_type: Some(disease),
            start_year: Some(start),
            end_year: Some(end),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &SurveillanceRecord) -> bool {
        self.municipality_code
            .as_ref()
            .map_or(true, |c| c == &record.municipality_code)
            && self.disease_type.map_or(true, |d| d == record.disease_type)
            && self.start_year.map_or(true, |y| record.year >= y)
            && self.end_year.map_or(true, |y| record.year <= y)
            && self
                .start_week
                .map_or(true, |w| record.epidemiological_week >= w)
            && self.end_week.map_or(true, |w| record.epidemiological_week <= w)
    }
}

/// Stored forecast filter on prediction date. Bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastQuery {
    pub municipality_code: Option<MunicipalityCode>,
    pub disease_type: Option<DiseaseType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl ForecastQuery {
    pub fn matches(&self, forecast: &Forecast) -> bool {
        self.municipality_code
            .as_ref()
            .map_or(true, |c| c == &forecast.municipality_code)
            && self.disease_type.map_or(true, |d| d == forecast.disease_type)
            && self.start_date.map_or(true, |d| forecast.prediction_date >= d)
            && self.end_date.map_or(true, |d| forecast.prediction_date <= d)
    }
}

/// Storage for observed records and generated forecasts.
///
/// Reads return records in ascending time order. Upserts replace records
/// with the same natural key and return the number written.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn climate(&self, query: &ClimateQuery) -> Result<Vec<ClimateRecord>>;

    async fn surveillance(&self, query: &SurveillanceQuery) -> Result<Vec<SurveillanceRecord>>;

    async fn forecasts(&self, query: &ForecastQuery) -> Result<Vec<Forecast>>;

    /// Keyed by (municipality, date).
    async fn upsert_climate(&self, records: &[ClimateRecord]) -> Result<usize>;

    /// Keyed by (municipality, disease, year, week).
    async fn upsert_surveillance(&self, records: &[SurveillanceRecord]) -> Result<usize>;

    /// Keyed by (municipality, disease, prediction date).
    async fn upsert_forecasts(&self, forecasts: &[Forecast]) -> Result<usize>;

    async fn statistics(&self) -> Result<RecordStatistics>;

    /// Drop climate records and forecasts dated before `cutoff`.
    /// Surveillance history is kept for retraining.
    async fn delete_before(&self, cutoff: NaiveDate) -> Result<CleanupReport>;
}

/// Open the configured record store.
pub async fn connect(cfg: &Config) -> Result<Arc<dyn RecordStore>> {
    #[cfg(feature = "db")]
    {
        if let Some(url) = cfg.db.as_ref().map(|db| db.url.as_str()) {
            let store = pg::PgStore::connect(url).await?;
            return Ok(Arc::new(store));
        }
    }

    let _ = cfg;
    tracing::warn!("No database configured, using in-memory record store");
    Ok(Arc::new(MemoryStore::new()))
}

/// Keep the last `limit` items of an ascending list.
pub(crate) fn keep_latest<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        if items.len() > limit {
            items.drain(..items.len() - limit);
        }
    }
    items
}
