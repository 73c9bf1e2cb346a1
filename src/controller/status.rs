use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::ModelKey;
use crate::ml::ModelMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingState {
    Pending,
    Training,
    Completed,
    Failed,
}

/// Progress record of the most recent training request for one key.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingStatus {
    pub key: ModelKey,
    pub state: TrainingState,
    /// Percent complete
    pub progress: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifact_id: Option<String>,
    pub metrics: Option<ModelMetrics>,
}

/// Status records of background training runs.
#[derive(Debug, Default)]
pub struct TrainingTracker {
    statuses: RwLock<HashMap<ModelKey, TrainingStatus>>,
}

impl TrainingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self, key: &ModelKey) -> TrainingStatus {
        let status = TrainingStatus {
            key: key.clone(),
            state: TrainingState::Pending,
            progress: 0,
            message: "queued".to_string(),
            started_at: Utc::now(),
            finished_at: None,
            artifact_id: None,
            metrics: None,
        };
        self.statuses.write().insert(key.clone(), status.clone());
        status
    }

    fn update(&self, key: &ModelKey, apply: impl FnOnce(&mut TrainingStatus)) {
        let mut statuses = self.statuses.write();
        let status = statuses.entry(key.clone()).or_insert_with(|| TrainingStatus {
            key: key.clone(),
            state: TrainingState::Pending,
            progress: 0,
            message: String::new(),
            started_at: Utc::now(),
            finished_at: None,
            artifact_id: None,
            metrics: None,
        });
        apply(status);
    }

    pub fn training(&self, key: &ModelKey) {
        self.update(key, |s| {
            s.state = TrainingState::Training;
            s.progress = 10;
            s.message = "training".to_string();
        });
    }

    pub fn completed(&self, key: &ModelKey, artifact_id: String, metrics: ModelMetrics) {
        self.update(key, |s| {
            s.state = TrainingState::Completed;
            s.progress = 100;
            s.message = format!(
                "completed after {} epochs",
                metrics.stopped_epoch
            );
            s.finished_at = Some(Utc::now());
            s.artifact_id = Some(artifact_id);
            s.metrics = Some(metrics);
        });
    }

    pub fn failed(&self, key: &ModelKey, message: String) {
        self.update(key, |s| {
            s.state = TrainingState::Failed;
            s.progress = 100;
            s.message = message;
            s.finished_at = Some(Utc::now());
        });
    }

    pub fn get(&self, key: &ModelKey) -> Option<TrainingStatus> {
        self.statuses.read().get(key).cloned()
    }

    pub fn all(&self) -> Vec<TrainingStatus> {
        let mut all: Vec<_> = self.statuses.read().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }
}
