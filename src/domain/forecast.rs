use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::epiweek::EpiWeek;
use super::{DiseaseType, MunicipalityCode};

/// Horizon-based confidence attached to each forecast period.
///
/// Future climate is unknown at prediction time, so every period beyond the
/// first two is reported as low confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForecastConfidence {
    Medium,
    Low,
}

impl std::fmt::Display for ForecastConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl ForecastConfidence {
    /// Confidence for the `period`-th week ahead (1-based).
    pub fn for_horizon(period: u32) -> Self {
        if period <= 2 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A single forecast period for a municipality/disease pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub municipality_code: MunicipalityCode,
    pub disease_type: DiseaseType,
    pub prediction_date: NaiveDate,
    pub epidemiological_week: u32,
    pub year: i32,
    pub predicted_cases_suspected: u32,
    pub predicted_cases_confirmed: u32,
    pub predicted_incidence_rate: f64,
    /// Heuristic band (±20% of suspected cases), not a calibrated interval
    pub confidence_interval_lower: f64,
    pub confidence_interval_upper: f64,
    pub alert_level: u8,
    pub confidence: ForecastConfidence,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl Forecast {
    /// Period label, e.g. `2024-W07`.
    pub fn period_label(&self) -> String {
        EpiWeek {
            year: self.year,
            week: self.epidemiological_week,
        }
        .to_string()
    }
}

/// Alert level from a predicted incidence rate: `round(max(rate, 0) / 10)`
/// clamped into 1..=4.
pub fn alert_level_for(incidence_rate: f64) -> u8 {
    let rate = if incidence_rate.is_finite() {
        incidence_rate.max(0.0)
    } else {
        0.0
    };
    (rate / 10.0).round().clamp(1.0, 4.0) as u8
}

/// Symmetric band around a point estimate of suspected cases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBand {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceBand {
    pub const LOWER_FACTOR: f64 = 0.8;
    pub const UPPER_FACTOR: f64 = 1.2;

    /// 80%/120% of the non-negative point estimate. This is a placeholder
    /// heuristic with no statistical calibration.
    pub fn heuristic(point: f64) -> Self {
        let point = point.max(0.0);
        Self {
            lower: point * Self::LOWER_FACTOR,
            upper: point * Self::UPPER_FACTOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 1)]
    #[case(-12.0, 1)]
    #[case(4.9, 1)]
    #[case(22.0, 2)]
    #[case(25.0, 3)]
    #[case(45.0, 4)]
    #[case(1_000.0, 4)]
    #[case(f64::NAN, 1)]
    fn test_alert_level_for(#[case] incidence: f64, #[case] expected: u8) {
        assert_eq!(alert_level_for(incidence), expected);
    }

    #[rstest]
    #[case(100.0, 80.0, 120.0)]
    #[case(37.0, 29.6, 44.4)]
    #[case(1.0, 0.8, 1.2)]
    #[case(0.0, 0.0, 0.0)]
    #[case(-5.0, 0.0, 0.0)]
    fn test_confidence_band(#[case] point: f64, #[case] lower: f64, #[case] upper: f64) {
        let band = ConfidenceBand::heuristic(point);
        assert!((band.lower - lower).abs() < 1e-9, "lower {} for {point}", band.lower);
        assert!((band.upper - upper).abs() < 1e-9, "upper {} for {point}", band.upper);
    }

    #[test]
    fn test_confidence_by_horizon() {
        assert_eq!(ForecastConfidence::for_horizon(1), ForecastConfidence::Medium);
        assert_eq!(ForecastConfidence::for_horizon(2), ForecastConfidence::Medium);
        assert_eq!(ForecastConfidence::for_horizon(3), ForecastConfidence::Low);
        assert_eq!(ForecastConfidence::Low.to_string(), "low");
    }
}
