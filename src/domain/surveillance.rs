use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::epiweek::{EpiWeek, EpiWeekError};
use super::{DiseaseType, MunicipalityCode};

pub const MAX_ALERT_LEVEL: u8 = 4;

/// Weekly case notification counts for one municipality and disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveillanceRecord {
    pub municipality_code: MunicipalityCode,
    pub disease_type: DiseaseType,
    pub year: i32,
    pub epidemiological_week: u32,
    pub cases_suspected: u32,
    pub cases_confirmed: u32,
    pub cases_probable: u32,
    /// Cases per 100,000 inhabitants
    pub incidence_rate: f64,
    pub alert_level: u8,
    pub population: Option<u64>,
}

/// Numeric columns of a surveillance record usable as a regression target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetField {
    CasesSuspected,
    CasesConfirmed,
    CasesProbable,
    IncidenceRate,
}

/// Output columns of the forecast model, in order.
pub const MODEL_TARGETS: [TargetField; 3] = [
    TargetField::CasesSuspected,
    TargetField::CasesConfirmed,
    TargetField::IncidenceRate,
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SurveillanceValidationError {
    #[error(transparent)]
    Week(#[from] EpiWeekError),

    #[error("alert level {0} is outside 0..=4")]
    AlertLevel(u8),

    #[error("incidence rate {0} must be a finite, non-negative number")]
    IncidenceRate(f64),
}

impl SurveillanceRecord {
    pub fn epi_week(&self) -> EpiWeek {
        EpiWeek {
            year: self.year,
            week: self.epidemiological_week,
        }
    }

    /// Calendar date (Sunday) the record's epidemiological week starts on.
    pub fn week_start(&self) -> Result<NaiveDate, EpiWeekError> {
        self.epi_week().start_date()
    }

    pub fn target(&self, field: TargetField) -> f64 {
        match field {
            TargetField::CasesSuspected => f64::from(self.cases_suspected),
            TargetField::CasesConfirmed => f64::from(self.cases_confirmed),
            TargetField::CasesProbable => f64::from(self.cases_probable),
            TargetField::IncidenceRate => self.incidence_rate,
        }
    }

    pub fn validate(&self) -> Result<(), SurveillanceValidationError> {
        EpiWeek::new(self.year, self.epidemiological_week)?;
        if self.alert_level > MAX_ALERT_LEVEL {
            return Err(SurveillanceValidationError::AlertLevel(self.alert_level));
        }
        if !self.incidence_rate.is_finite() || self.incidence_rate < 0.0 {
            return Err(SurveillanceValidationError::IncidenceRate(
                self.incidence_rate,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(week: u32) -> SurveillanceRecord {
        SurveillanceRecord {
            municipality_code: MunicipalityCode::new("3304557").unwrap(),
            disease_type: DiseaseType::Dengue,
            year: 2024,
            epidemiological_week: week,
            cases_suspected: 120,
            cases_confirmed: 30,
            cases_probable: 10,
            incidence_rate: 1.8,
            alert_level: 2,
            population: Some(6_211_223),
        }
    }

    #[test]
    fn test_week_start_maps_to_sunday() {
        assert_eq!(
            record(1).week_start().unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
        assert_eq!(
            record(10).week_start().unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
    }

    #[test]
    fn test_target_lookup() {
        let r = record(5);
        assert_eq!(r.target(TargetField::CasesSuspected), 120.0);
        assert_eq!(r.target(TargetField::IncidenceRate), 1.8);
        assert_eq!("cases_confirmed".parse::<TargetField>().unwrap(), TargetField::CasesConfirmed);
    }

    #[test]
    fn test_validation() {
        assert!(record(52).validate().is_ok());
        assert!(matches!(
            record(53).validate(),
            Err(SurveillanceValidationError::Week(_))
        ));

        let mut bad = record(5);
        bad.alert_level = 5;
        assert!(matches!(
            bad.validate(),
            Err(SurveillanceValidationError::AlertLevel(5))
        ));

        let mut bad = record(5);
        bad.incidence_rate = -1.0;
        assert!(matches!(
            bad.validate(),
            Err(SurveillanceValidationError::IncidenceRate(_))
        ));
    }
}
