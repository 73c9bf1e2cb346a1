use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

use super::{keep_latest, ClimateQuery, ForecastQuery, RecordStore, SurveillanceQuery};
use crate::domain::{
    CleanupReport, ClimateRecord, DiseaseType, EpiWeek, Forecast, MunicipalityCode,
    RecordStatistics, SurveillanceRecord, TableCounts,
};

type SurveillanceKey = (MunicipalityCode, DiseaseType, i32, u32);
type ForecastKey = (MunicipalityCode, DiseaseType, NaiveDate);

/// Process-local record store. Ordered maps keep reads in time order per
/// municipality.
#[derive(Debug, Default)]
pub struct MemoryStore {
    climate: RwLock<BTreeMap<(MunicipalityCode, NaiveDate), ClimateRecord>>,
    surveillance: RwLock<BTreeMap<SurveillanceKey, SurveillanceRecord>>,
    forecasts: RwLock<BTreeMap<ForecastKey, Forecast>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn climate(&self, query: &ClimateQuery) -> Result<Vec<ClimateRecord>> {
        let mut records: Vec<_> = self
            .climate
            .read()
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.date);
        Ok(keep_latest(records, query.limit))
    }

    async fn surveillance(&self, query: &SurveillanceQuery) -> Result<Vec<SurveillanceRecord>> {
        let mut records: Vec<_> = self
            .surveillance
            .read()
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.year, r.epidemiological_week));
        Ok(keep_latest(records, query.limit))
    }

    async fn forecasts(&self, query: &ForecastQuery) -> Result<Vec<Forecast>> {
        let mut forecasts: Vec<_> = self
            .forecasts
            .read()
            .values()
            .filter(|f| query.matches(f))
            .cloned()
            .collect();
        forecasts.sort_by_key(|f| f.prediction_date);
        Ok(keep_latest(forecasts, query.limit))
    }

    async fn upsert_climate(&self, records: &[ClimateRecord]) -> Result<usize> {
        let mut map = self.climate.write();
        for record in records {
            map.insert((record.municipality_code.clone(), record.date), record.clone());
        }
        Ok(records.len())
    }

    async fn upsert_surveillance(&self, records: &[SurveillanceRecord]) -> Result<usize> {
        let mut map = self.surveillance.write();
        for record in records {
            map.insert(
                (
                    record.municipality_code.clone(),
                    record.disease_type,
                    record.year,
                    record.epidemiological_week,
                ),
                record.clone(),
            );
        }
        Ok(records.len())
    }

    async fn upsert_forecasts(&self, forecasts: &[Forecast]) -> Result<usize> {
        let mut map = self.forecasts.write();
        for forecast in forecasts {
            map.insert(
                (
                    forecast.municipality_code.clone(),
                    forecast.disease_type,
                    forecast.prediction_date,
                ),
                forecast.clone(),
            );
        }
        Ok(forecasts.len())
    }

    async fn statistics(&self) -> Result<RecordStatistics> {
        let climate = self.climate.read();
        let surveillance = self.surveillance.read();
        let forecasts = self.forecasts.read();

        let diseases: BTreeSet<DiseaseType> = surveillance.keys().map(|k| k.1).collect();

        Ok(RecordStatistics {
            total_records: TableCounts {
                climate: climate.len() as u64,
                surveillance: surveillance.len() as u64,
                forecasts: forecasts.len() as u64,
            },
            unique_municipalities: TableCounts {
                climate: distinct(climate.keys().map(|k| &k.0)),
                surveillance: distinct(surveillance.keys().map(|k| &k.0)),
                forecasts: distinct(forecasts.keys().map(|k| &k.0)),
            },
            disease_types: diseases.into_iter().collect(),
            latest_climate_date: climate.keys().map(|k| k.1).max(),
            latest_surveillance_week: surveillance
                .keys()
                .map(|k| EpiWeek { year: k.2, week: k.3 })
                .max(),
            latest_prediction_date: forecasts.keys().map(|k| k.2).max(),
        })
    }

    async fn delete_before(&self, cutoff: NaiveDate) -> Result<CleanupReport> {
        let mut climate = self.climate.write();
        let before = climate.len();
        climate.retain(|k, _| k.1 >= cutoff);
        let climate_deleted = (before - climate.len()) as u64;

        let mut forecasts = self.forecasts.write();
        let before = forecasts.len();
        forecasts.retain(|k, _| k.2 >= cutoff);
        let forecasts_deleted = (before - forecasts.len()) as u64;

        Ok(CleanupReport {
            cutoff: Some(cutoff),
            climate_deleted,
            forecasts_deleted,
        })
    }
}

fn distinct<'a>(codes: impl Iterator<Item = &'a MunicipalityCode>) -> u64 {
    codes.collect::<BTreeSet<_>>().len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ForecastConfidence;
    use chrono::{Datelike, Duration, Utc};

    fn code() -> MunicipalityCode {
        MunicipalityCode::new("3304557").unwrap()
    }

    fn climate(day: i64) -> ClimateRecord {
        ClimateRecord {
            municipality_code: code(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day),
            temperature_max: 32.0,
            temperature_min: 22.0,
            temperature_avg: 27.0,
            humidity: 70.0,
            precipitation: day as f64,
            wind_speed: 10.0,
            pressure: 1012.0,
        }
    }

    fn surveillance(year: i32, week: u32, cases: u32) -> SurveillanceRecord {
        SurveillanceRecord {
            municipality_code: code(),
            disease_type: DiseaseType::Dengue,
            year,
            epidemiological_week: week,
            cases_suspected: cases,
            cases_confirmed: cases / 4,
            cases_probable: 0,
            incidence_rate: f64::from(cases) / 62.0,
            alert_level: 1,
            population: None,
        }
    }

    fn forecast(day: u32, cases: u32) -> Forecast {
        Forecast {
            municipality_code: code(),
            disease_type: DiseaseType::Dengue,
            prediction_date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            epidemiological_week: 18,
            year: 2024,
            predicted_cases_suspected: cases,
            predicted_cases_confirmed: 0,
            predicted_incidence_rate: 1.0,
            confidence_interval_lower: 0.0,
            confidence_interval_upper: 0.0,
            alert_level: 1,
            confidence: ForecastConfidence::Medium,
            model_version: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_climate_range_is_inclusive_and_ordered() {
        let store = MemoryStore::new();
        let records: Vec<_> = (0..10).rev().map(climate).collect();
        assert_eq!(store.upsert_climate(&records).await.unwrap(), 10);

        let start = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let found = store
            .climate(&ClimateQuery::range(&code(), start, end))
            .await
            .unwrap();
        let dates: Vec<_> = found.iter().map(|r| r.date).collect();
        assert_eq!(dates.len(), 4);
        assert_eq!(dates.first(), Some(&start));
        assert_eq!(dates.last(), Some(&end));

        let other = MunicipalityCode::new("3550308").unwrap();
        assert!(store
            .climate(&ClimateQuery::range(&other, start, end))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_surveillance_upsert_replaces_and_filters_weeks() {
        let store = MemoryStore::new();
        store
            .upsert_surveillance(&[
                surveillance(2023, 52, 10),
                surveillance(2024, 1, 20),
                surveillance(2024, 2, 30),
            ])
            .await
            .unwrap();
        store
            .upsert_surveillance(&[surveillance(2024, 1, 25)])
            .await
            .unwrap();

        let all = store
            .surveillance(&SurveillanceQuery::years(&code(), DiseaseType::Dengue, 2023, 2024))
            .await
            .unwrap();
        let cases: Vec<_> = all.iter().map(|r| r.cases_suspected).collect();
        assert_eq!(cases, vec![10, 25, 30]);

        let query = SurveillanceQuery {
            start_week: Some(2),
            ..SurveillanceQuery::years(&code(), DiseaseType::Dengue, 2024, 2024)
        };
        assert_eq!(store.surveillance(&query).await.unwrap().len(), 1);

        let zika = SurveillanceQuery::years(&code(), DiseaseType::Zika, 2023, 2024);
        assert!(store.surveillance(&zika).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forecast_upsert_keyed_by_prediction_date() {
        let store = MemoryStore::new();
        store
            .upsert_forecasts(&[forecast(1, 10), forecast(8, 20)])
            .await
            .unwrap();
        store.upsert_forecasts(&[forecast(8, 99)]).await.unwrap();

        let stored = store.forecasts(&ForecastQuery::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].predicted_cases_suspected, 99);

        let latest = store
            .forecasts(&ForecastQuery {
                limit: Some(1),
                ..ForecastQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(latest[0].prediction_date.day(), 8);
    }

    #[tokio::test]
    async fn test_statistics_and_cleanup() {
        let store = MemoryStore::new();
        assert_eq!(store.statistics().await.unwrap(), RecordStatistics::default());

        store
            .upsert_climate(&(0..10).map(climate).collect::<Vec<_>>())
            .await
            .unwrap();
        store
            .upsert_surveillance(&[surveillance(2023, 52, 10), surveillance(2024, 3, 20)])
            .await
            .unwrap();
        store
            .upsert_forecasts(&[forecast(1, 10), forecast(8, 20)])
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records.climate, 10);
        assert_eq!(stats.total_records.surveillance, 2);
        assert_eq!(stats.unique_municipalities.forecasts, 1);
        assert_eq!(stats.disease_types, vec![DiseaseType::Dengue]);
        assert_eq!(stats.latest_climate_date, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert_eq!(stats.latest_surveillance_week, Some(EpiWeek { year: 2024, week: 3 }));

        let report = store
            .delete_before(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(report.climate_deleted, 10);
        assert_eq!(report.forecasts_deleted, 0);

        let report = store
            .delete_before(NaiveDate::from_ymd_opt(2024, 5, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(report.forecasts_deleted, 1);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records.climate, 0);
        assert_eq!(stats.total_records.surveillance, 2);
        assert_eq!(stats.total_records.forecasts, 1);
    }
}
