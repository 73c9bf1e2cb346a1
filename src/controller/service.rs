//! Train and predict invocation interface.
//!
//! Record-store reads happen on the async runtime; alignment, training and
//! generation run on the blocking pool.

use chrono::{Datelike, Duration};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{PipelineConfig, TrainingSettings};
use crate::domain::{epiweek, Forecast, ModelKey};
use crate::error::PipelineError;
use crate::forecast::{DataPreparer, DataSource, ForecastGenerator};
use crate::ml::{ArtifactSummary, FileArtifactStore, ForecastModel, ModelMetrics, ModelRegistry, TrainingGuard};
use crate::repo::{ClimateQuery, RecordStore, SurveillanceQuery};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("record store error: {0:#}")]
    Store(anyhow::Error),

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub key: ModelKey,
    pub use_synthetic_data: bool,
    pub epochs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainOutcome {
    pub artifact_id: String,
    pub model_version: String,
    pub metrics: ModelMetrics,
}

pub struct ForecastService {
    pipeline: PipelineConfig,
    training: TrainingSettings,
    store: Arc<dyn RecordStore>,
    artifacts: Arc<FileArtifactStore>,
    registry: Arc<ModelRegistry>,
    generator: Arc<ForecastGenerator>,
}

impl ForecastService {
    pub fn new(
        pipeline: PipelineConfig,
        training: TrainingSettings,
        store: Arc<dyn RecordStore>,
        artifacts: Arc<FileArtifactStore>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            pipeline,
            training,
            store,
            artifacts,
            registry,
            generator: Arc::new(ForecastGenerator::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn default_epochs(&self) -> usize {
        self.training.default_epochs
    }

    /// Train a model for `request.key`, failing if one is already training.
    pub async fn train(&self, request: TrainRequest) -> ServiceResult<TrainOutcome> {
        let guard = self.registry.begin_training(request.key.clone())?;
        self.train_with_guard(guard, request).await
    }

    /// Train while holding an already claimed training slot.
    pub async fn train_with_guard(
        &self,
        guard: TrainingGuard,
        request: TrainRequest,
    ) -> ServiceResult<TrainOutcome> {
        let key = request.key.clone();
        let source = if request.use_synthetic_data {
            DataSource::Synthetic
        } else if self.pipeline.fallback_to_synthetic {
            DataSource::ObservedOrSynthetic
        } else {
            DataSource::Observed
        };

        let (climate, surveillance) = if source == DataSource::Synthetic {
            (Vec::new(), Vec::new())
        } else {
            self.load_history(&key).await?
        };

        let preparer = DataPreparer::new(
            self.pipeline.time_window_days,
            self.pipeline.features(),
            self.pipeline.synthetic_samples,
            self.training.seed,
        )?;
        let trainer = self.training.trainer(request.epochs);
        let test_size = self.pipeline.test_size;
        let artifacts = Arc::clone(&self.artifacts);

        let (trained, artifact_id) = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let set = preparer.prepare(&key, source, &climate, &surveillance)?;
            let mut model = ForecastModel::new(trainer, test_size);
            model.train(key, &set.matrix, preparer.feature_config(), set.synthetic)?;
            let trained = model.into_trained()?;
            let artifact_id = artifacts.save(&trained)?;
            Ok::<_, PipelineError>((trained, artifact_id))
        })
        .await??;

        let outcome = TrainOutcome {
            artifact_id,
            model_version: trained.model_version.clone(),
            metrics: trained.metrics.clone(),
        };
        self.registry.register(trained);
        Ok(outcome)
    }

    async fn load_history(
        &self,
        key: &ModelKey,
    ) -> ServiceResult<(
        Vec<crate::domain::ClimateRecord>,
        Vec<crate::domain::SurveillanceRecord>,
    )> {
        let today = self.generator.today();
        let start_year = today.year() - self.pipeline.years_back;
        let climate_start = epiweek::first_week_start(start_year)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?
            - Duration::days(i64::from(self.pipeline.time_window_days));

        let climate = self
            .store
            .climate(&ClimateQuery::range(&key.municipality_code, climate_start, today))
            .await
            .map_err(ServiceError::Store)?;
        let surveillance = self
            .store
            .surveillance(&SurveillanceQuery::years(
                &key.municipality_code,
                key.disease_type,
                start_year,
                today.year(),
            ))
            .await
            .map_err(ServiceError::Store)?;

        info!(
            model = %key,
            climate = climate.len(),
            surveillance = surveillance.len(),
            "Loaded training history"
        );
        Ok((climate, surveillance))
    }

    /// Forecasts for the next `periods_ahead` weeks.
    pub async fn predict(&self, key: &ModelKey, periods_ahead: u32) -> ServiceResult<Vec<Forecast>> {
        let registry = Arc::clone(&self.registry);
        let artifacts = Arc::clone(&self.artifacts);
        let generator = Arc::clone(&self.generator);
        let key = key.clone();
        let forecasts = tokio::task::spawn_blocking(move || {
            let model = registry.resolve(&key, &artifacts)?;
            generator.generate(&model, periods_ahead)
        })
        .await??;
        Ok(forecasts)
    }

    /// Generate forecasts and upsert them into the record store.
    pub async fn save_predictions(
        &self,
        key: &ModelKey,
        periods_ahead: u32,
    ) -> ServiceResult<Vec<Forecast>> {
        let forecasts = self.predict(key, periods_ahead).await?;
        let written = self
            .store
            .upsert_forecasts(&forecasts)
            .await
            .map_err(ServiceError::Store)?;
        info!(model = %key, written, "Stored forecasts");
        Ok(forecasts)
    }

    /// Train with fallback if no model is available, then store forecasts.
    pub async fn refresh_forecasts(
        &self,
        key: &ModelKey,
        periods_ahead: u32,
    ) -> ServiceResult<Vec<Forecast>> {
        match self.save_predictions(key, periods_ahead).await {
            Err(ServiceError::Pipeline(PipelineError::ModelNotReady(_))) => {
                warn!(model = %key, "No trained model, training before forecasting");
                self.train(TrainRequest {
                    key: key.clone(),
                    use_synthetic_data: false,
                    epochs: self.training.default_epochs,
                })
                .await?;
                self.save_predictions(key, periods_ahead).await
            }
            other => other,
        }
    }

    pub fn list_models(&self) -> ServiceResult<Vec<ArtifactSummary>> {
        Ok(self.artifacts.list()?)
    }

    /// Metrics of the model that would serve `key`.
    pub async fn model_metrics(&self, key: &ModelKey) -> ServiceResult<(String, ModelMetrics)> {
        let registry = Arc::clone(&self.registry);
        let artifacts = Arc::clone(&self.artifacts);
        let key = key.clone();
        let model = tokio::task::spawn_blocking(move || registry.resolve(&key, &artifacts)).await??;
        Ok((model.run_id.to_string(), model.metrics.clone()))
    }
}
