//! Shared fixtures for integration tests.
#![allow(dead_code)]

use arbovirus_forecast::config::Config;
use arbovirus_forecast::domain::{
    ClimateRecord, DiseaseType, EpiWeek, ModelKey, MunicipalityCode, SurveillanceRecord,
};
use chrono::{Datelike, Duration, NaiveDate};
use figment::providers::{Format, Toml};
use figment::Figment;
use std::path::PathBuf;

pub const SALVADOR: &str = "2927408";

pub fn code() -> MunicipalityCode {
    MunicipalityCode::new(SALVADOR).unwrap()
}

pub fn key() -> ModelKey {
    ModelKey::new(code(), DiseaseType::Dengue)
}

/// First day of epidemiological week 1 of 2022.
pub fn series_start() -> NaiveDate {
    EpiWeek::new(2022, 1).unwrap().start_date().unwrap()
}

/// `weeks` consecutive weekly records with a seasonal case curve.
pub fn surveillance(weeks: usize) -> Vec<SurveillanceRecord> {
    (0..weeks)
        .map(|i| {
            let date = series_start() + Duration::weeks(i as i64);
            let week = EpiWeek::containing(date).unwrap();
            let season = (2.0 * std::f64::consts::PI * f64::from(date.month0()) / 12.0).sin();
            let suspected = (120.0 + 80.0 * season + (i % 5) as f64 * 3.0).round() as u32;
            SurveillanceRecord {
                municipality_code: code(),
                disease_type: DiseaseType::Dengue,
                year: week.year,
                epidemiological_week: week.week,
                cases_suspected: suspected,
                cases_confirmed: suspected / 5,
                cases_probable: suspected / 2,
                incidence_rate: f64::from(suspected) / 29.0,
                alert_level: 1,
                population: Some(2_900_000),
            }
        })
        .collect()
}

/// Daily climate from a week before the series start through `weeks` weeks.
pub fn climate(weeks: usize) -> Vec<ClimateRecord> {
    let start = series_start() - Duration::days(7);
    let days = weeks as i64 * 7 + 7;
    (0..days)
        .map(|d| {
            let date = start + Duration::days(d);
            let season = (2.0 * std::f64::consts::PI * f64::from(date.ordinal()) / 365.0).sin();
            ClimateRecord {
                municipality_code: code(),
                date,
                temperature_max: 30.0 + 3.0 * season,
                temperature_min: 22.0 + 2.0 * season,
                temperature_avg: 26.0 + 2.5 * season,
                humidity: 75.0 + 10.0 * season,
                precipitation: (5.0 + 5.0 * season).max(0.0),
                wind_speed: 10.0 + (d % 3) as f64,
                pressure: 1012.0 - season,
            }
        })
        .collect()
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", ulid::Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Default configuration with a small network and a private artifact dir.
/// Collectors point at a closed local port so no test reaches the network.
pub fn config(artifacts: &std::path::Path) -> Config {
    config_with(artifacts, "")
}

/// [`config`] with `extra` TOML merged last.
pub fn config_with(artifacts: &std::path::Path, extra: &str) -> Config {
    Figment::new()
        .merge(Toml::string(include_str!("../../config/default.toml")))
        .merge(Toml::string(
            "[training]\ndefault_epochs = 5\nhidden_layers = [16, 8]\ndropout = [0.1, 0.0]",
        ))
        .merge(Toml::string(
            "[collectors]\nopen_meteo_url = \"http://127.0.0.1:9/archive\"\n\
             infodengue_url = \"http://127.0.0.1:9/alertcity\"\nmax_retries = 0\nhttp_timeout_seconds = 2",
        ))
        .merge(Toml::string(&format!(
            "[artifacts]\ndir = {:?}",
            artifacts.display().to_string()
        )))
        .merge(Toml::string(extra))
        .extract()
        .unwrap()
}
