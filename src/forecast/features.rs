//! Feature engineering for the case-count regressor
//!
//! Builds lagged target values, trailing rolling means and cyclical calendar
//! encodings on top of aligned rows. Rows whose lag features reach before the
//! start of the series are dropped, never imputed.

use chrono::{Datelike, NaiveDate};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

use super::align::{AlignedRow, ClimateAggregates};
use crate::domain::{SurveillanceRecord, TargetField};
use crate::error::{InsufficientData, PipelineError, PipelineResult, Prepared};

/// Calendar encodings of a row's date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    pub month: u32,
    pub quarter: u32,
    pub day_of_year: u32,
    /// ISO week number
    pub week_of_year: u32,
    pub month_sin: f64,
    pub month_cos: f64,
    pub week_sin: f64,
    pub week_cos: f64,
}

impl CalendarFeatures {
    pub const COLUMNS: [&'static str; 8] = [
        "month",
        "quarter",
        "day_of_year",
        "week_of_year",
        "month_sin",
        "month_cos",
        "week_sin",
        "week_cos",
    ];

    pub fn from_date(date: NaiveDate) -> Self {
        let month = date.month();
        let week = date.iso_week().week();
        let month_angle = 2.0 * PI * f64::from(month) / 12.0;
        let week_angle = 2.0 * PI * f64::from(week) / 52.0;
        Self {
            month,
            quarter: (month - 1) / 3 + 1,
            day_of_year: date.ordinal(),
            week_of_year: week,
            month_sin: month_angle.sin(),
            month_cos: month_angle.cos(),
            week_sin: week_angle.sin(),
            week_cos: week_angle.cos(),
        }
    }

    pub fn values(&self) -> [f64; 8] {
        [
            f64::from(self.month),
            f64::from(self.quarter),
            f64::from(self.day_of_year),
            f64::from(self.week_of_year),
            self.month_sin,
            self.month_cos,
            self.week_sin,
            self.week_cos,
        ]
    }
}

/// Lag and rolling-window settings plus the viability threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub min_samples: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 3, 4],
            rolling_windows: vec![2, 4, 8],
            min_samples: 10,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.lags.is_empty() || self.lags.contains(&0) {
            return Err(PipelineError::Configuration(
                "lags must be a non-empty list of positive offsets".to_string(),
            ));
        }
        if self.rolling_windows.is_empty() || self.rolling_windows.contains(&0) {
            return Err(PipelineError::Configuration(
                "rolling_windows must be a non-empty list of positive sizes".to_string(),
            ));
        }
        if self.min_samples < 2 {
            return Err(PipelineError::Configuration(format!(
                "min_samples must be at least 2, got {}",
                self.min_samples
            )));
        }
        Ok(())
    }

    pub fn max_lag(&self) -> usize {
        self.lags.iter().copied().max().unwrap_or(0)
    }

    /// Number of trailing target values needed to rebuild lag and rolling
    /// features for the next period.
    pub fn history_len(&self) -> usize {
        self.max_lag()
            .max(self.rolling_windows.iter().copied().max().unwrap_or(0))
    }
}

/// One model-ready row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub record: SurveillanceRecord,
    pub features: Vec<f64>,
}

/// Feature rows with their column names, ascending by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub target: TargetField,
    pub rows: Vec<FeatureRow>,
    /// Target values of the full series (including dropped rows), oldest first
    pub target_history: Vec<f64>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn features(&self) -> Array2<f64> {
        let width = self.columns.len();
        Array2::from_shape_fn((self.rows.len(), width), |(i, j)| self.rows[i].features[j])
    }

    pub fn targets(&self, fields: &[TargetField]) -> Array2<f64> {
        Array2::from_shape_fn((self.rows.len(), fields.len()), |(i, j)| {
            self.rows[i].record.target(fields[j])
        })
    }

    /// The most recent `n` target values, oldest first.
    pub fn recent_targets(&self, n: usize) -> Vec<f64> {
        let skip = self.target_history.len().saturating_sub(n);
        self.target_history[skip..].to_vec()
    }
}

/// Builds [`FeatureMatrix`] values from aligned rows.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Column names in the order [`Self::assemble`] writes them.
    pub fn columns(&self, target: TargetField) -> Vec<String> {
        let mut columns: Vec<String> = ClimateAggregates::COLUMNS
            .iter()
            .map(|c| c.to_string())
            .collect();
        columns.extend(self.config.lags.iter().map(|lag| format!("{target}_lag_{lag}")));
        columns.extend(
            self.config
                .rolling_windows
                .iter()
                .map(|w| format!("{target}_rolling_mean_{w}")),
        );
        columns.extend(CalendarFeatures::COLUMNS.iter().map(|c| c.to_string()));
        columns
    }

    /// Lay out one feature vector.
    pub fn assemble(
        &self,
        climate: &ClimateAggregates,
        lags: &[f64],
        rolling: &[f64],
        date: NaiveDate,
    ) -> Vec<f64> {
        let mut values = Vec::with_capacity(
            ClimateAggregates::COLUMNS.len() + lags.len() + rolling.len() + 8,
        );
        values.extend_from_slice(&climate.values());
        values.extend_from_slice(lags);
        values.extend_from_slice(rolling);
        values.extend_from_slice(&CalendarFeatures::from_date(date).values());
        values
    }

    /// Lag and rolling features for the period that follows `history`
    /// (oldest first). Returns `None` if the history is shorter than the
    /// largest lag.
    pub fn next_period_targets(&self, history: &[f64]) -> Option<(Vec<f64>, Vec<f64>)> {
        let n = history.len();
        if n < self.config.max_lag() {
            return None;
        }
        let lags = self.config.lags.iter().map(|&lag| history[n - lag]).collect();
        let rolling = self
            .config
            .rolling_windows
            .iter()
            .map(|&w| trailing_mean(&history[n.saturating_sub(w)..]))
            .collect();
        Some((lags, rolling))
    }

    /// Build features for `rows`, which must be ascending by date.
    pub fn build(&self, rows: &[AlignedRow], target: TargetField) -> Prepared<FeatureMatrix> {
        let series: Vec<f64> = rows.iter().map(|r| r.record.target(target)).collect();

        let lag_columns: Vec<Vec<Option<f64>>> = self
            .config
            .lags
            .iter()
            .map(|&lag| shift(&series, lag))
            .collect();
        let rolling_columns: Vec<Vec<f64>> = self
            .config
            .rolling_windows
            .iter()
            .map(|&w| rolling_mean(&series, w))
            .collect();

        let mut out = Vec::with_capacity(rows.len().saturating_sub(self.config.max_lag()));
        for (i, row) in rows.iter().enumerate() {
            let lags: Option<Vec<f64>> = lag_columns.iter().map(|col| col[i]).collect();
            let Some(lags) = lags else { continue };
            let rolling: Vec<f64> = rolling_columns.iter().map(|col| col[i]).collect();

            out.push(FeatureRow {
                date: row.date,
                record: row.record.clone(),
                features: self.assemble(&row.climate, &lags, &rolling, row.date),
            });
        }

        debug!(
            input_rows = rows.len(),
            output_rows = out.len(),
            target = %target,
            "Built feature rows"
        );

        if out.len() < self.config.min_samples {
            return Prepared::Insufficient(InsufficientData {
                stage: "feature_builder",
                available: out.len(),
                required: self.config.min_samples,
            });
        }

        Prepared::Ready(FeatureMatrix {
            columns: self.columns(target),
            target,
            rows: out,
            target_history: series,
        })
    }
}

/// Strict shift: element `i` is `values[i - lag]`, undefined for `i < lag`.
pub fn shift(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| i.checked_sub(lag).map(|j| values[j]))
        .collect()
}

/// Trailing mean over the last `min(i + 1, window)` values.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            trailing_mean(&values[start..=i])
        })
        .collect()
}

fn trailing_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiseaseType, MunicipalityCode};
    use crate::forecast::align::WindowStats;
    use approx::assert_relative_eq;
    use chrono::Duration;
    use proptest::prelude::*;

    fn aggregates() -> ClimateAggregates {
        let s = WindowStats { mean: 1.0, std: 0.5 };
        ClimateAggregates {
            temperature_max: s,
            temperature_min: s,
            temperature_avg: s,
            humidity: s,
            precipitation: s,
            precipitation_sum: 7.0,
            wind_speed: s,
            pressure: s,
            observations: 8,
        }
    }

    fn rows(n: usize) -> Vec<AlignedRow> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        (0..n)
            .map(|i| AlignedRow {
                date: start + Duration::weeks(i as i64),
                record: SurveillanceRecord {
                    municipality_code: MunicipalityCode::new("2927408").unwrap(),
                    disease_type: DiseaseType::Zika,
                    year: 2023,
                    epidemiological_week: 1,
                    cases_suspected: (i as u32) * 10,
                    cases_confirmed: i as u32,
                    cases_probable: 0,
                    incidence_rate: i as f64 / 10.0,
                    alert_level: 1,
                    population: None,
                },
                climate: aggregates(),
            })
            .collect()
    }

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(FeatureConfig::default()).unwrap()
    }

    #[test]
    fn test_columns_layout() {
        let columns = builder().columns(TargetField::CasesSuspected);
        assert_eq!(columns.len(), 14 + 4 + 3 + 8);
        assert_eq!(columns[14], "cases_suspected_lag_1");
        assert_eq!(columns[20], "cases_suspected_rolling_mean_8");
        assert_eq!(columns.last().unwrap(), "week_cos");
    }

    #[test]
    fn test_drops_first_max_lag_rows() {
        let matrix = match builder().build(&rows(20), TargetField::CasesSuspected) {
            Prepared::Ready(m) => m,
            Prepared::Insufficient(r) => panic!("unexpected: {r}"),
        };
        assert_eq!(matrix.len(), 16);
        assert_eq!(matrix.rows[0].record.cases_suspected, 40);

        // lag_1..lag_4 of row with target 40 are 30, 20, 10, 0
        assert_eq!(&matrix.rows[0].features[14..18], &[30.0, 20.0, 10.0, 0.0]);
        // rolling means at index 4: w=2 -> (30+40)/2, w=4 -> 25, w=8 -> mean(0..=40) = 20
        assert_relative_eq!(matrix.rows[0].features[18], 35.0);
        assert_relative_eq!(matrix.rows[0].features[19], 25.0);
        assert_relative_eq!(matrix.rows[0].features[20], 20.0);

        assert_eq!(matrix.features().dim(), (16, 29));
        assert_eq!(matrix.targets(&crate::domain::MODEL_TARGETS).dim(), (16, 3));
    }

    #[test]
    fn test_insufficient_samples() {
        match builder().build(&rows(12), TargetField::CasesSuspected) {
            Prepared::Insufficient(reason) => {
                assert_eq!(reason.available, 8);
                assert_eq!(reason.required, 10);
            }
            Prepared::Ready(_) => panic!("expected insufficient"),
        }
        assert!(!builder().build(&[], TargetField::CasesSuspected).is_ready());
    }

    #[test]
    fn test_calendar_features() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
        let cal = CalendarFeatures::from_date(date);
        assert_eq!(cal.month, 3);
        assert_eq!(cal.quarter, 1);
        assert_eq!(cal.day_of_year, 63);
        assert_eq!(cal.week_of_year, 9);
        assert_relative_eq!(cal.month_sin, 1.0, epsilon = 1e-12);
        assert_relative_eq!(cal.month_cos, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_next_period_targets() {
        let history = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0];
        let (lags, rolling) = builder().next_period_targets(&history).unwrap();
        assert_eq!(lags, vec![80.0, 70.0, 60.0, 50.0]);
        assert_eq!(rolling, vec![75.0, 65.0, 45.0]);
        assert!(builder().next_period_targets(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FeatureConfig::default();
        config.lags.clear();
        assert!(matches!(
            FeatureBuilder::new(config),
            Err(PipelineError::Configuration(_))
        ));

        let config = FeatureConfig {
            rolling_windows: vec![0],
            ..FeatureConfig::default()
        };
        assert!(FeatureBuilder::new(config).is_err());
    }

    #[test]
    fn test_recent_targets() {
        let matrix = match builder().build(&rows(20), TargetField::CasesSuspected) {
            Prepared::Ready(m) => m,
            Prepared::Insufficient(r) => panic!("unexpected: {r}"),
        };
        assert_eq!(matrix.recent_targets(3), vec![170.0, 180.0, 190.0]);
        assert_eq!(matrix.recent_targets(100).len(), 20);
    }

    proptest! {
        #[test]
        fn prop_shift_drops_exactly_lag(values in prop::collection::vec(-1e3f64..1e3, 0..50), lag in 1usize..8) {
            let shifted = shift(&values, lag);
            let defined = shifted.iter().filter(|v| v.is_some()).count();
            prop_assert_eq!(defined, values.len().saturating_sub(lag));
            for (i, v) in shifted.iter().enumerate() {
                if let Some(v) = v {
                    prop_assert_eq!(*v, values[i - lag]);
                }
            }
        }

        #[test]
        fn prop_rolling_mean_matches_window(values in prop::collection::vec(0f64..500.0, 1..40), window in 1usize..10) {
            let means = rolling_mean(&values, window);
            prop_assert!((means[0] - values[0]).abs() < 1e-9);
            for i in 0..values.len() {
                let start = (i + 1).saturating_sub(window);
                let slice = &values[start..=i];
                let expected = slice.iter().sum::<f64>() / slice.len() as f64;
                prop_assert!((means[i] - expected).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_builder_output_length(n in 0usize..60) {
            let config = FeatureConfig { min_samples: 2, ..FeatureConfig::default() };
            let builder = FeatureBuilder::new(config).unwrap();
            let expected = n.saturating_sub(4);
            match builder.build(&rows(n), TargetField::CasesSuspected) {
                Prepared::Ready(m) => prop_assert_eq!(m.len(), expected),
                Prepared::Insufficient(r) => {
                    prop_assert_eq!(r.available, expected);
                    prop_assert!(expected < 2);
                }
            }
        }
    }
}
