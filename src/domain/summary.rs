//! Aggregated views over stored records.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::epiweek::EpiWeek;
use super::{DiseaseType, Forecast, MunicipalityCode, SurveillanceRecord};

/// Alert level from which a municipality counts as high risk.
pub const HIGH_RISK_ALERT_LEVEL: u8 = 3;

/// Case totals for one municipality and disease.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseSummary {
    pub municipality_code: MunicipalityCode,
    pub disease_type: DiseaseType,
    pub total_suspected: u64,
    pub total_confirmed: u64,
    pub total_probable: u64,
    pub max_alert_level: u8,
    pub weeks: usize,
    pub latest_week: Option<EpiWeek>,
}

impl CaseSummary {
    /// One summary per (municipality, disease), ordered by that key.
    pub fn aggregate(records: &[SurveillanceRecord]) -> Vec<Self> {
        let mut grouped: BTreeMap<(MunicipalityCode, DiseaseType), Self> = BTreeMap::new();
        for r in records {
            let entry = grouped
                .entry((r.municipality_code.clone(), r.disease_type))
                .or_insert_with(|| Self {
                    municipality_code: r.municipality_code.clone(),
                    disease_type: r.disease_type,
                    total_suspected: 0,
                    total_confirmed: 0,
                    total_probable: 0,
                    max_alert_level: 0,
                    weeks: 0,
                    latest_week: None,
                });
            entry.total_suspected += u64::from(r.cases_suspected);
            entry.total_confirmed += u64::from(r.cases_confirmed);
            entry.total_probable += u64::from(r.cases_probable);
            entry.max_alert_level = entry.max_alert_level.max(r.alert_level);
            entry.weeks += 1;
            let week = EpiWeek {
                year: r.year,
                week: r.epidemiological_week,
            };
            entry.latest_week = entry.latest_week.max(Some(week));
        }
        grouped.into_values().collect()
    }
}

/// Per-disease totals across a set of municipalities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiseaseTotals {
    pub disease_type: DiseaseType,
    pub total_suspected: u64,
    pub total_confirmed: u64,
    pub municipalities: usize,
    pub high_risk_municipalities: usize,
    pub predicted_cases_suspected: u64,
}

/// Observed and forecast totals for one state.
#[derive(Debug, Clone, Serialize)]
pub struct StateSummary {
    pub state: String,
    pub municipalities: Vec<MunicipalityCode>,
    pub diseases: Vec<DiseaseTotals>,
    pub latest_forecasts: Vec<Forecast>,
}

impl StateSummary {
    /// `cases` and `latest` must already be restricted to the state's
    /// municipalities. High risk is judged on the latest forecast per
    /// municipality when one exists, otherwise on the observed maximum.
    pub fn build(
        state: impl Into<String>,
        municipalities: Vec<MunicipalityCode>,
        cases: &[CaseSummary],
        latest: Vec<Forecast>,
    ) -> Self {
        let mut diseases: BTreeMap<DiseaseType, DiseaseTotals> = BTreeMap::new();
        let totals = |d: DiseaseType| DiseaseTotals {
            disease_type: d,
            total_suspected: 0,
            total_confirmed: 0,
            municipalities: 0,
            high_risk_municipalities: 0,
            predicted_cases_suspected: 0,
        };

        for c in cases {
            let entry = diseases.entry(c.disease_type).or_insert_with(|| totals(c.disease_type));
            entry.total_suspected += c.total_suspected;
            entry.total_confirmed += c.total_confirmed;
            entry.municipalities += 1;
            let forecast = latest
                .iter()
                .find(|f| f.municipality_code == c.municipality_code && f.disease_type == c.disease_type);
            let level = forecast.map_or(c.max_alert_level, |f| f.alert_level);
            if level >= HIGH_RISK_ALERT_LEVEL {
                entry.high_risk_municipalities += 1;
            }
        }
        for f in &latest {
            let entry = diseases.entry(f.disease_type).or_insert_with(|| totals(f.disease_type));
            entry.predicted_cases_suspected += u64::from(f.predicted_cases_suspected);
            let observed = cases
                .iter()
                .any(|c| c.municipality_code == f.municipality_code && c.disease_type == f.disease_type);
            if !observed && f.alert_level >= HIGH_RISK_ALERT_LEVEL {
                entry.high_risk_municipalities += 1;
            }
        }

        Self {
            state: state.into(),
            municipalities,
            diseases: diseases.into_values().collect(),
            latest_forecasts: latest,
        }
    }
}

/// The forecast with the latest prediction date for each
/// (municipality, disease), ordered by that key.
pub fn latest_forecasts(forecasts: Vec<Forecast>) -> Vec<Forecast> {
    let mut latest: BTreeMap<(MunicipalityCode, DiseaseType), Forecast> = BTreeMap::new();
    for f in forecasts {
        let key = (f.municipality_code.clone(), f.disease_type);
        match latest.get(&key) {
            Some(current) if current.prediction_date >= f.prediction_date => {}
            _ => {
                latest.insert(key, f);
            }
        }
    }
    latest.into_values().collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub climate: u64,
    pub surveillance: u64,
    pub forecasts: u64,
}

/// Size and freshness of the record store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordStatistics {
    pub total_records: TableCounts,
    pub unique_municipalities: TableCounts,
    pub disease_types: Vec<DiseaseType>,
    pub latest_climate_date: Option<NaiveDate>,
    pub latest_surveillance_week: Option<EpiWeek>,
    pub latest_prediction_date: Option<NaiveDate>,
}

/// Rows removed by a retention cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cutoff: Option<NaiveDate>,
    pub climate_deleted: u64,
    pub forecasts_deleted: u64,
}
