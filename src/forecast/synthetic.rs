//! Synthetic training series
//!
//! Used when a municipality has too little observed history. The seasonal
//! climate shape is shared with the forecast generator's future-period
//! placeholders.

use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use tracing::info;

use super::align::{AlignedRow, ClimateAggregates, WindowStats};
use crate::domain::{alert_level_for, DiseaseType, EpiWeek, MunicipalityCode, SurveillanceRecord};
use crate::error::{PipelineError, PipelineResult};

/// Mean seasonal climate for a calendar month (sinusoid peaking in April).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalClimate {
    pub temperature: f64,
    pub humidity: f64,
    pub precipitation: f64,
}

impl SeasonalClimate {
    pub fn for_month(month: u32) -> Self {
        let phase = (2.0 * PI * (f64::from(month) - 1.0) / 12.0).sin();
        Self {
            temperature: 25.0 + 10.0 * phase,
            humidity: 65.0 + 15.0 * phase,
            precipitation: 100.0 + 80.0 * phase,
        }
    }

    /// Fixed aggregates standing in for unobserved future climate.
    pub fn placeholder_aggregates(&self) -> ClimateAggregates {
        let stats = |mean: f64, std: f64| WindowStats { mean, std };
        ClimateAggregates {
            temperature_max: stats(self.temperature + 5.0, 2.0),
            temperature_min: stats(self.temperature - 5.0, 2.0),
            temperature_avg: stats(self.temperature, 1.0),
            humidity: stats(self.humidity, 10.0),
            precipitation: stats(self.precipitation / 7.0, 0.0),
            precipitation_sum: self.precipitation,
            wind_speed: stats(15.0, 3.0),
            pressure: stats(1013.0, 5.0),
            observations: 0,
        }
    }
}

/// Seeded generator of weekly aligned rows.
#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    samples: usize,
    seed: u64,
    start: NaiveDate,
}

impl SyntheticSeries {
    pub fn new(samples: usize, seed: u64) -> Self {
        Self {
            samples,
            seed,
            start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or(NaiveDate::MIN),
        }
    }

    pub fn starting_at(mut self, start: NaiveDate) -> Self {
        self.start = start;
        self
    }

    pub fn generate(
        &self,
        municipality_code: &MunicipalityCode,
        disease_type: DiseaseType,
    ) -> PipelineResult<Vec<AlignedRow>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = |std: f64| {
            Normal::new(0.0, std).map_err(|e| PipelineError::Configuration(e.to_string()))
        };
        let temp_noise = normal(3.0)?;
        let humidity_noise = normal(10.0)?;
        let precip_noise = normal(50.0)?;
        let case_noise = normal(20.0)?;

        let mut rows = Vec::with_capacity(self.samples);
        for i in 0..self.samples {
            let date = self.start + Duration::weeks(i as i64);
            let seasonal = SeasonalClimate::for_month(date.month());

            let temperature_max = seasonal.temperature + temp_noise.sample(&mut rng);
            let temperature_min = temperature_max - rng.gen_range(5.0..15.0);
            let temperature_avg = (temperature_max + temperature_min) / 2.0;
            let humidity = (seasonal.humidity + humidity_noise.sample(&mut rng)).clamp(30.0, 95.0);
            let precipitation = (seasonal.precipitation + precip_noise.sample(&mut rng)).max(0.0);
            let wind_speed = rng.gen_range(5.0..25.0);
            let pressure = rng.gen_range(1000.0..1020.0);

            let phase = (2.0 * PI * (f64::from(date.month()) - 1.0) / 12.0).sin();
            let base_cases = (50.0 + 30.0 * phase + case_noise.sample(&mut rng)).max(0.0);
            let climate_factor =
                ((temperature_avg - 20.0) / 10.0 + (humidity - 50.0) / 50.0).max(0.0);
            let suspected = (base_cases * (1.0 + climate_factor * 0.5)).max(0.0);
            let confirmed = suspected * rng.gen_range(0.1..0.3);
            let incidence_rate = suspected / 1000.0;

            let climate = ClimateAggregates {
                temperature_max: WindowStats {
                    mean: temperature_max,
                    std: rng.gen_range(1.0..3.0),
                },
                temperature_min: WindowStats {
                    mean: temperature_min,
                    std: rng.gen_range(1.0..3.0),
                },
                temperature_avg: WindowStats {
                    mean: temperature_avg,
                    std: rng.gen_range(1.0..2.0),
                },
                humidity: WindowStats {
                    mean: humidity,
                    std: rng.gen_range(5.0..15.0),
                },
                precipitation: WindowStats {
                    mean: precipitation / 7.0,
                    std: 0.0,
                },
                precipitation_sum: precipitation,
                wind_speed: WindowStats {
                    mean: wind_speed,
                    std: rng.gen_range(2.0..5.0),
                },
                pressure: WindowStats {
                    mean: pressure,
                    std: rng.gen_range(2.0..8.0),
                },
                observations: 7,
            };

            let epi = EpiWeek::containing(date)
                .map_err(|e| PipelineError::Configuration(e.to_string()))?;

            rows.push(AlignedRow {
                date,
                record: SurveillanceRecord {
                    municipality_code: municipality_code.clone(),
                    disease_type,
                    year: epi.year,
                    epidemiological_week: epi.week,
                    cases_suspected: suspected as u32,
                    cases_confirmed: confirmed as u32,
                    cases_probable: (suspected * 0.1) as u32,
                    incidence_rate,
                    alert_level: alert_level_for(incidence_rate),
                    population: None,
                },
                climate,
            });
        }

        info!(
            municipality = %municipality_code,
            disease = %disease_type,
            samples = rows.len(),
            seed = self.seed,
            "Generated synthetic training series"
        );

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TargetField;
    use crate::error::Prepared;
    use crate::forecast::features::{FeatureBuilder, FeatureConfig};
    use approx::assert_relative_eq;

    fn code() -> MunicipalityCode {
        MunicipalityCode::new("3550308").unwrap()
    }

    #[test]
    fn test_seasonal_shape() {
        let jan = SeasonalClimate::for_month(1);
        assert_relative_eq!(jan.temperature, 25.0);
        assert_relative_eq!(jan.humidity, 65.0);

        let apr = SeasonalClimate::for_month(4);
        assert_relative_eq!(apr.temperature, 35.0, epsilon = 1e-9);
        assert_relative_eq!(apr.precipitation, 180.0, epsilon = 1e-9);

        let placeholder = apr.placeholder_aggregates();
        assert_relative_eq!(placeholder.temperature_max.mean, 40.0, epsilon = 1e-9);
        assert_relative_eq!(placeholder.precipitation.mean, 180.0 / 7.0, epsilon = 1e-9);
        assert_eq!(placeholder.pressure.mean, 1013.0);
    }

    #[test]
    fn test_generates_weekly_rows() {
        let rows = SyntheticSeries::new(100, 42)
            .generate(&code(), DiseaseType::Dengue)
            .unwrap();
        assert_eq!(rows.len(), 100);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(rows[0].record.epidemiological_week, 1);
        assert!(rows.windows(2).all(|w| (w[1].date - w[0].date).num_days() == 7));

        for row in &rows {
            assert!(row.climate.humidity.mean >= 30.0 && row.climate.humidity.mean <= 95.0);
            assert!(row.climate.precipitation_sum >= 0.0);
            assert!(row.record.cases_confirmed <= row.record.cases_suspected);
            assert!((1..=4).contains(&row.record.alert_level));
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = SyntheticSeries::new(30, 7).generate(&code(), DiseaseType::Zika).unwrap();
        let b = SyntheticSeries::new(30, 7).generate(&code(), DiseaseType::Zika).unwrap();
        let c = SyntheticSeries::new(30, 8).generate(&code(), DiseaseType::Zika).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_flows_through_feature_builder() {
        let rows = SyntheticSeries::new(100, 42)
            .generate(&code(), DiseaseType::Dengue)
            .unwrap();
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        match builder.build(&rows, TargetField::CasesSuspected) {
            Prepared::Ready(matrix) => {
                assert_eq!(matrix.len(), 96);
                assert!(matrix.features().iter().all(|v| v.is_finite()));
            }
            Prepared::Insufficient(reason) => panic!("unexpected: {reason}"),
        }
    }
}
