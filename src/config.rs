use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::domain::Municipality;
use crate::error::{PipelineError, PipelineResult};
use crate::forecast::FeatureConfig;
use crate::ml::{NetworkConfig, TrainingConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub training: TrainingSettings,
    pub artifacts: ArtifactsConfig,
    pub collectors: CollectorsConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub db: Option<DbConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub enable_cors: bool,
    /// Origins allowed when CORS is enabled
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_request_timeout() -> u64 {
    30
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub time_window_days: u32,
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub min_samples: usize,
    pub test_size: f64,
    /// Years of surveillance history read for training
    pub years_back: i32,
    pub fallback_to_synthetic: bool,
    pub synthetic_samples: usize,
}

impl PipelineConfig {
    pub fn features(&self) -> FeatureConfig {
        FeatureConfig {
            lags: self.lags.clone(),
            rolling_windows: self.rolling_windows.clone(),
            min_samples: self.min_samples,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.features().validate()?;
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "pipeline.test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        if self.years_back < 1 {
            return Err(PipelineError::Configuration(
                "pipeline.years_back must be at least 1".to_string(),
            ));
        }
        if self.synthetic_samples <= self.features().max_lag() + self.min_samples {
            return Err(PipelineError::Configuration(format!(
                "pipeline.synthetic_samples must exceed max lag + min_samples ({})",
                self.features().max_lag() + self.min_samples
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSettings {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub default_epochs: usize,
    pub early_stopping_patience: usize,
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub min_lr: f64,
    pub seed: u64,
    #[serde(default)]
    pub hidden_layers: Option<Vec<usize>>,
    #[serde(default)]
    pub dropout: Option<Vec<f64>>,
}

impl TrainingSettings {
    /// Trainer configuration for a run of `epochs` epochs.
    pub fn trainer(&self, epochs: usize) -> TrainingConfig {
        let defaults = TrainingConfig::default();
        let network = match (&self.hidden_layers, &self.dropout) {
            (Some(hidden), Some(dropout)) => NetworkConfig {
                hidden: hidden.clone(),
                dropout: dropout.clone(),
            },
            _ => defaults.network.clone(),
        };
        TrainingConfig {
            epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            early_stopping_patience: self.early_stopping_patience,
            lr_patience: self.lr_patience,
            lr_factor: self.lr_factor,
            min_lr: self.min_lr,
            seed: self.seed,
            network,
            ..defaults
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.trainer(self.default_epochs).validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorsConfig {
    pub open_meteo_url: String,
    pub infodengue_url: String,
    pub http_timeout_seconds: u64,
    pub max_retries: u32,
    pub municipalities: Vec<Municipality>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub climate_interval_hours: u64,
    pub surveillance_interval_hours: u64,
    pub forecast_interval_hours: u64,
    pub weeks_ahead: u32,
    pub climate_backfill_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("ARBO__").split("__"));
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would fail later inside the pipeline.
    pub fn validate(&self) -> PipelineResult<()> {
        self.pipeline.validate()?;
        self.training.validate()?;
        if self.server.enable_cors && self.server.cors_origins.is_empty() {
            return Err(PipelineError::Configuration(
                "server.cors_origins must list at least one origin when CORS is enabled".to_string(),
            ));
        }
        if self.scheduler.weeks_ahead == 0 {
            return Err(PipelineError::Configuration(
                "scheduler.weeks_ahead must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn municipality(&self, code: &str) -> Option<&Municipality> {
        self.collectors
            .municipalities
            .iter()
            .find(|m| m.code.as_str() == code)
    }

    /// Configured municipalities of a state, matched on the UF ignoring case.
    pub fn municipalities_in(&self, state: &str) -> Vec<&Municipality> {
        self.collectors
            .municipalities
            .iter()
            .filter(|m| m.state.eq_ignore_ascii_case(state))
            .collect()
    }
}
