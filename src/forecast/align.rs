//! Temporal alignment of weekly surveillance records with daily climate
//!
//! Each surveillance record is mapped to the Sunday its epidemiological week
//! starts on and joined with summary statistics of the climate observations
//! in the trailing window `[date - window, date]`.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

use crate::domain::{ClimateField, ClimateRecord, SurveillanceRecord};

/// Mean and sample standard deviation of one climate variable over a window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub mean: f64,
    pub std: f64,
}

impl WindowStats {
    /// Sample statistics (n - 1 denominator). A single observation has std 0.
    pub fn from_values(values: &[f64]) -> Self {
        let mean = values.mean();
        let std = if values.len() < 2 { 0.0 } else { values.std_dev() };
        Self { mean, std }
    }
}

/// Climate summary joined onto a surveillance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateAggregates {
    pub temperature_max: WindowStats,
    pub temperature_min: WindowStats,
    pub temperature_avg: WindowStats,
    pub humidity: WindowStats,
    pub precipitation: WindowStats,
    pub precipitation_sum: f64,
    pub wind_speed: WindowStats,
    pub pressure: WindowStats,
    pub observations: usize,
}

impl ClimateAggregates {
    pub const COLUMNS: [&'static str; 14] = [
        "temperature_max_mean",
        "temperature_max_std",
        "temperature_min_mean",
        "temperature_min_std",
        "temperature_avg_mean",
        "temperature_avg_std",
        "humidity_mean",
        "humidity_std",
        "precipitation_sum",
        "precipitation_mean",
        "wind_speed_mean",
        "wind_speed_std",
        "pressure_mean",
        "pressure_std",
    ];

    /// Aggregate a non-empty window of observations.
    pub fn from_window(window: &[&ClimateRecord]) -> Option<Self> {
        if window.is_empty() {
            return None;
        }
        let stats = |field: ClimateField| {
            let values: Vec<f64> = window.iter().map(|r| r.value(field)).collect();
            WindowStats::from_values(&values)
        };
        Some(Self {
            temperature_max: stats(ClimateField::TemperatureMax),
            temperature_min: stats(ClimateField::TemperatureMin),
            temperature_avg: stats(ClimateField::TemperatureAvg),
            humidity: stats(ClimateField::Humidity),
            precipitation: stats(ClimateField::Precipitation),
            precipitation_sum: window.iter().map(|r| r.precipitation).sum(),
            wind_speed: stats(ClimateField::WindSpeed),
            pressure: stats(ClimateField::Pressure),
            observations: window.len(),
        })
    }

    /// Values in [`Self::COLUMNS`] order.
    pub fn values(&self) -> [f64; 14] {
        [
            self.temperature_max.mean,
            self.temperature_max.std,
            self.temperature_min.mean,
            self.temperature_min.std,
            self.temperature_avg.mean,
            self.temperature_avg.std,
            self.humidity.mean,
            self.humidity.std,
            self.precipitation_sum,
            self.precipitation.mean,
            self.wind_speed.mean,
            self.wind_speed.std,
            self.pressure.mean,
            self.pressure.std,
        ]
    }
}

/// A surveillance record together with the climate that preceded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedRow {
    pub date: NaiveDate,
    pub record: SurveillanceRecord,
    pub climate: ClimateAggregates,
}

/// Joins surveillance records to trailing climate windows.
#[derive(Debug, Clone)]
pub struct TemporalAligner {
    window: Duration,
}

impl TemporalAligner {
    pub fn new(time_window_days: u32) -> Self {
        Self {
            window: Duration::days(i64::from(time_window_days)),
        }
    }

    /// Produce one row per alignable surveillance record, ascending by date.
    ///
    /// Records with no climate observation in their window are left out. An
    /// empty result means nothing could be aligned and is not an error.
    pub fn align(
        &self,
        climate: &[ClimateRecord],
        surveillance: &[SurveillanceRecord],
    ) -> Vec<AlignedRow> {
        let mut sorted: Vec<&ClimateRecord> = climate.iter().collect();
        sorted.sort_by_key(|r| r.date);

        let mut rows = Vec::with_capacity(surveillance.len());
        let mut dropped = 0usize;

        for record in surveillance {
            let date = match record.week_start() {
                Ok(date) => date,
                Err(e) => {
                    warn!(
                        municipality = %record.municipality_code,
                        year = record.year,
                        week = record.epidemiological_week,
                        error = %e,
                        "Skipping surveillance record with invalid epidemiological week"
                    );
                    dropped += 1;
                    continue;
                }
            };

            let start = date - self.window;
            let lo = sorted.partition_point(|r| r.date < start);
            let hi = sorted.partition_point(|r| r.date <= date);

            match ClimateAggregates::from_window(&sorted[lo..hi]) {
                Some(climate) => rows.push(AlignedRow {
                    date,
                    record: record.clone(),
                    climate,
                }),
                None => dropped += 1,
            }
        }

        rows.sort_by_key(|row| row.date);

        debug!(
            aligned = rows.len(),
            dropped,
            window_days = self.window.num_days(),
            "Aligned surveillance records with climate windows"
        );

        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiseaseType, MunicipalityCode};
    use approx::assert_relative_eq;

    fn code() -> MunicipalityCode {
        MunicipalityCode::new("3550308").unwrap()
    }

    fn climate(date: NaiveDate, temp: f64) -> ClimateRecord {
        ClimateRecord {
            municipality_code: code(),
            date,
            temperature_max: temp + 5.0,
            temperature_min: temp - 5.0,
            temperature_avg: temp,
            humidity: 70.0,
            precipitation: 10.0,
            wind_speed: 12.0,
            pressure: 1013.0,
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
            incidence_rate: f64::from(cases) / 100.0,
            alert_level: 1,
            population: None,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_is_inclusive_on_both_ends() {
        // 2024 week 2 starts on 2024-01-07; window covers 2023-12-31..=2024-01-07.
        let records: Vec<ClimateRecord> = (0..=10)
            .map(|i| climate(day(2023, 12, 29) + Duration::days(i), 20.0 + i as f64))
            .collect();
        let rows = TemporalAligner::new(7).align(&records, &[surveillance(2024, 2, 10)]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, day(2024, 1, 7));
        assert_eq!(rows[0].climate.observations, 8);
        // temps 22..=29
        assert_relative_eq!(rows[0].climate.temperature_avg.mean, 25.5);
        assert_relative_eq!(rows[0].climate.precipitation_sum, 80.0);
    }

    #[test]
    fn test_single_observation_has_zero_std() {
        let records = vec![climate(day(2024, 1, 5), 27.0)];
        let rows = TemporalAligner::new(7).align(&records, &[surveillance(2024, 2, 10)]);

        assert_eq!(rows.len(), 1);
        let stats = rows[0].climate.values();
        assert!(stats.iter().all(|v| v.is_finite()));
        assert_eq!(rows[0].climate.temperature_max.std, 0.0);
        assert_eq!(rows[0].climate.pressure.std, 0.0);
    }

    #[test]
    fn test_sample_standard_deviation() {
        let stats = WindowStats::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(stats.mean, 5.0);
        assert_relative_eq!(stats.std, (32.0_f64 / 7.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_records_without_climate_are_dropped() {
        let records = vec![climate(day(2024, 1, 5), 27.0)];
        let rows = TemporalAligner::new(7).align(
            &records,
            &[surveillance(2024, 2, 10), surveillance(2024, 20, 30)],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.epidemiological_week, 2);
    }

    #[test]
    fn test_disjoint_ranges_yield_empty_output() {
        let records: Vec<ClimateRecord> = (0..30)
            .map(|i| climate(day(2020, 3, 1) + Duration::days(i), 25.0))
            .collect();
        let weeks: Vec<SurveillanceRecord> = (1..=10).map(|w| surveillance(2024, w, 5)).collect();

        assert!(TemporalAligner::new(7).align(&records, &weeks).is_empty());
    }

    #[test]
    fn test_output_sorted_by_date() {
        let records: Vec<ClimateRecord> = (0..60)
            .map(|i| climate(day(2023, 12, 25) + Duration::days(i), 25.0))
            .collect();
        let weeks = vec![
            surveillance(2024, 5, 1),
            surveillance(2024, 2, 1),
            surveillance(2024, 7, 1),
        ];
        let rows = TemporalAligner::new(7).align(&records, &weeks);
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_invalid_week_is_skipped() {
        let records = vec![climate(day(2024, 12, 28), 25.0)];
        let rows = TemporalAligner::new(7).align(&records, &[surveillance(2024, 53, 5)]);
        assert!(rows.is_empty());
    }
}
