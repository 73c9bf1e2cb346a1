use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, IntoEnumIterator, IntoStaticStr};

use super::MunicipalityCode;

/// Daily weather observation for one municipality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateRecord {
    pub municipality_code: MunicipalityCode,
    pub date: NaiveDate,
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub temperature_avg: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// Daily precipitation, mm
    pub precipitation: f64,
    /// km/h
    pub wind_speed: f64,
    /// hPa
    pub pressure: f64,
}

/// The climate variables aggregated by the aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ClimateField {
    TemperatureMax,
    TemperatureMin,
    TemperatureAvg,
    Humidity,
    Precipitation,
    WindSpeed,
    Pressure,
}

impl ClimateField {
    pub fn all() -> impl Iterator<Item = ClimateField> {
        Self::iter()
    }

    pub fn mean_column(&self) -> String {
        format!("{}_mean", self.as_ref())
    }

    pub fn std_column(&self) -> String {
        format!("{}_std", self.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClimateValidationError {
    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("temperature_min {min} exceeds temperature_max {max}")]
    InvertedTemperatures { min: f64, max: f64 },
}

impl ClimateRecord {
    pub fn value(&self, field: ClimateField) -> f64 {
        match field {
            ClimateField::TemperatureMax => self.temperature_max,
            ClimateField::TemperatureMin => self.temperature_min,
            ClimateField::TemperatureAvg => self.temperature_avg,
            ClimateField::Humidity => self.humidity,
            ClimateField::Precipitation => self.precipitation,
            ClimateField::WindSpeed => self.wind_speed,
            ClimateField::Pressure => self.pressure,
        }
    }

    /// Plausibility checks applied at the ingestion boundary.
    pub fn validate(&self) -> Result<(), ClimateValidationError> {
        for field in ClimateField::all() {
            if !self.value(field).is_finite() {
                return Err(ClimateValidationError::NotFinite {
                    field: field.into(),
                });
            }
        }

        check_range("temperature_max", self.temperature_max, -20.0, 60.0)?;
        check_range("temperature_min", self.temperature_min, -20.0, 60.0)?;
        check_range("temperature_avg", self.temperature_avg, -20.0, 60.0)?;
        check_range("humidity", self.humidity, 0.0, 100.0)?;
        check_range("precipitation", self.precipitation, 0.0, 1000.0)?;
        check_range("wind_speed", self.wind_speed, 0.0, 400.0)?;
        check_range("pressure", self.pressure, 500.0, 1100.0)?;

        if self.temperature_min > self.temperature_max {
            return Err(ClimateValidationError::InvertedTemperatures {
                min: self.temperature_min,
                max: self.temperature_max,
            });
        }
        Ok(())
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ClimateValidationError> {
    if value < min || value > max {
        return Err(ClimateValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ClimateRecord {
        ClimateRecord {
            municipality_code: MunicipalityCode::new("3550308").unwrap(),
            date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            temperature_max: 31.0,
            temperature_min: 21.0,
            temperature_avg: 26.0,
            humidity: 78.0,
            precipitation: 12.5,
            wind_speed: 9.0,
            pressure: 1012.0,
        }
    }

    #[test]
    fn test_valid_record_passes() {
        assert!(record().validate().is_ok());
    }

    #[test]
    fn test_humidity_out_of_range() {
        let mut r = record();
        r.humidity = 120.0;
        assert!(matches!(
            r.validate(),
            Err(ClimateValidationError::OutOfRange { field: "humidity", .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let mut r = record();
        r.precipitation = f64::NAN;
        assert!(matches!(
            r.validate(),
            Err(ClimateValidationError::NotFinite { field: "precipitation" })
        ));
    }

    #[test]
    fn test_inverted_temperatures() {
        let mut r = record();
        r.temperature_min = 33.0;
        assert!(matches!(
            r.validate(),
            Err(ClimateValidationError::InvertedTemperatures { .. })
        ));
    }

    #[test]
    fn test_column_names() {
        assert_eq!(ClimateField::WindSpeed.mean_column(), "wind_speed_mean");
        assert_eq!(ClimateField::TemperatureAvg.std_column(), "temperature_avg_std");
        assert_eq!(ClimateField::all().count(), 7);
    }
}
