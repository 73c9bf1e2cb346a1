pub mod scheduler;
pub mod service;
pub mod status;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::error::PipelineResult;
use crate::ml::{FileArtifactStore, ModelRegistry};
use crate::repo::{self, RecordStore};

pub use scheduler::{SchedulerStatus, TaskName, TaskScheduler, TaskStatus};
pub use service::{ForecastService, ServiceError, ServiceResult, TrainOutcome, TrainRequest};
pub use status::{TrainingState, TrainingStatus, TrainingTracker};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub registry: Arc<ModelRegistry>,
    pub service: Arc<ForecastService>,
    pub training: Arc<TrainingTracker>,
    pub scheduler: Arc<TaskScheduler>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let store = repo::connect(&cfg).await?;
        Self::with_store(cfg, store)
    }

    /// Build the state around an already opened record store.
    pub fn with_store(cfg: Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        let artifacts = Arc::new(
            FileArtifactStore::open(&cfg.artifacts.dir).with_context(|| {
                format!("opening artifact store at {}", cfg.artifacts.dir.display())
            })?,
        );
        let registry = Arc::new(ModelRegistry::new());
        let service = Arc::new(ForecastService::new(
            cfg.pipeline.clone(),
            cfg.training.clone(),
            Arc::clone(&store),
            artifacts,
            Arc::clone(&registry),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            cfg.scheduler.clone(),
            cfg.collectors.clone(),
            Arc::clone(&store),
            Arc::clone(&service),
        )?);

        Ok(Self {
            cfg: Arc::new(cfg),
            store,
            registry,
            service,
            training: Arc::new(TrainingTracker::new()),
            scheduler,
        })
    }

    /// Start training in the background and return its initial status.
    ///
    /// The training slot is claimed before returning, so a concurrent
    /// request for the same key fails immediately.
    pub fn start_training(&self, request: TrainRequest) -> PipelineResult<TrainingStatus> {
        let guard = self.registry.begin_training(request.key.clone())?;
        let status = self.training.pending(&request.key);

        let service = Arc::clone(&self.service);
        let tracker = Arc::clone(&self.training);
        tokio::spawn(async move {
            let key = request.key.clone();
            tracker.training(&key);
            match service.train_with_guard(guard, request).await {
                Ok(outcome) => {
                    info!(model = %key, artifact_id = %outcome.artifact_id, "Background training completed");
                    tracker.completed(&key, outcome.artifact_id, outcome.metrics);
                }
                Err(e) => {
                    error!(model = %key, error = %e, "Background training failed");
                    tracker.failed(&key, e.to_string());
                }
            }
        });

        Ok(status)
    }
}

pub fn spawn_background_tasks(state: &AppState) {
    if state.cfg.scheduler.enabled {
        Arc::clone(&state.scheduler).start();
    } else {
        info!("Scheduler disabled, periodic tasks can be started through the API");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiseaseType, ModelKey, MunicipalityCode};
    use crate::error::PipelineError;
    use crate::repo::MemoryStore;
    use figment::providers::{Format, Toml};
    use figment::Figment;
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> Config {
        Figment::new()
            .merge(Toml::string(include_str!("../../config/default.toml")))
            .merge(Toml::string(
                "[training]\ndefault_epochs = 3\nhidden_layers = [8]\ndropout = [0.0]",
            ))
            .merge(Toml::string(&format!("[artifacts]\ndir = {:?}", dir.display().to_string())))
            .extract()
            .unwrap()
    }

    #[tokio::test]
    async fn test_background_training_completes() {
        let dir = tempdir();
        let state = AppState::with_store(config(&dir), Arc::new(MemoryStore::new())).unwrap();
        let key = ModelKey::new(MunicipalityCode::new("2927408").unwrap(), DiseaseType::Dengue);
        let request = TrainRequest {
            key: key.clone(),
            use_synthetic_data: true,
            epochs: 3,
        };

        let status = state.start_training(request.clone()).unwrap();
        assert_eq!(status.state, TrainingState::Pending);
        assert!(matches!(
            state.start_training(request),
            Err(PipelineError::TrainingInProgress(_))
        ));

        let mut finished = None;
        for _ in 0..600 {
            let current = state.training.get(&key).unwrap();
            if matches!(current.state, TrainingState::Completed | TrainingState::Failed) {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let finished = finished.expect("training did not finish");
        assert_eq!(finished.state, TrainingState::Completed, "{}", finished.message);
        assert!(finished.artifact_id.is_some());
        assert!(state.registry.get(&key).is_some());
        assert!(!state.registry.is_training(&key));

        let _ = std::fs::remove_dir_all(dir);
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("arbo-state-{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
