//! Trained-model cache
//!
//! The registry is owned by the application state and handed to callers;
//! there is no process-wide model cache.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::artifact::FileArtifactStore;
use super::model::TrainedModel;
use crate::domain::ModelKey;
use crate::error::{PipelineError, PipelineResult};

/// Registry of trained models, one per municipality/disease pair.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<ModelKey, Arc<TrainedModel>>>,
    training: Mutex<HashSet<ModelKey>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any previous one for the same key.
    pub fn register(&self, model: TrainedModel) -> Arc<TrainedModel> {
        let model = Arc::new(model);
        let previous = self
            .models
            .write()
            .insert(model.key.clone(), Arc::clone(&model));
        info!(
            model = %model.key,
            run_id = %model.run_id,
            replaced = ?previous.map(|p| p.run_id),
            "Registered model"
        );
        model
    }

    pub fn get(&self, key: &ModelKey) -> Option<Arc<TrainedModel>> {
        self.models.read().get(key).cloned()
    }

    /// Cached model for `key`, falling back to the latest stored artifact.
    pub fn resolve(
        &self,
        key: &ModelKey,
        store: &FileArtifactStore,
    ) -> PipelineResult<Arc<TrainedModel>> {
        if let Some(model) = self.get(key) {
            return Ok(model);
        }
        match store.load_latest(key) {
            Ok(model) => {
                debug!(model = %key, "Loaded model from artifact store");
                Ok(self.register(model))
            }
            Err(PipelineError::ArtifactNotFound(_)) => Err(PipelineError::ModelNotReady(format!(
                "no trained model for {key}"
            ))),
            Err(e) => Err(e),
        }
    }

    pub fn remove(&self, key: &ModelKey) -> bool {
        self.models.write().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<ModelKey> {
        let mut keys: Vec<_> = self.models.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    pub fn is_training(&self, key: &ModelKey) -> bool {
        self.training.lock().contains(key)
    }

    /// Claim the training slot for `key`. The slot is released when the
    /// returned guard is dropped.
    pub fn begin_training(self: &Arc<Self>, key: ModelKey) -> PipelineResult<TrainingGuard> {
        if !self.training.lock().insert(key.clone()) {
            return Err(PipelineError::TrainingInProgress(key));
        }
        Ok(TrainingGuard {
            registry: Arc::clone(self),
            key,
        })
    }
}

/// Exclusive training slot for one key.
#[derive(Debug)]
pub struct TrainingGuard {
    registry: Arc<ModelRegistry>,
    key: ModelKey,
}

impl TrainingGuard {
    pub fn key(&self) -> &ModelKey {
        &self.key
    }
}

impl Drop for TrainingGuard {
    fn drop(&mut self) {
        self.registry.training.lock().remove(&self.key);
    }
}
