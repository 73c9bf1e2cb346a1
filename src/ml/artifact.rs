//! Versioned model artifacts on disk
//!
//! One directory per training run:
//!
//! ```text
//! {root}/{artifact_id}/manifest.json   key, version, column layout, history seed
//! {root}/{artifact_id}/weights.bin     bincode network weights
//! {root}/{artifact_id}/scalers.json    fitted feature/target scalers
//! {root}/{artifact_id}/metrics.json    training metrics
//! ```
//!
//! Every part carries the run id it was produced by. Loading cross-checks
//! each part against the manifest and refuses to assemble a model from parts
//! of different runs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::model::{ModelMetrics, TrainedModel};
use super::network::Network;
use super::scaler::FittedScalers;
use crate::domain::{ModelKey, TargetField};
use crate::error::{PipelineError, PipelineResult};
use crate::forecast::features::FeatureConfig;

const FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "manifest.json";
const WEIGHTS_FILE: &str = "weights.bin";
const SCALERS_FILE: &str = "scalers.json";
const METRICS_FILE: &str = "metrics.json";
const TMP_PREFIX: &str = ".tmp-";

/// Listing entry for a stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub artifact_id: String,
    pub key: ModelKey,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub synthetic_data: bool,
    pub training_samples: usize,
    pub validation_loss: f64,
    pub validation_mae: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    run_id: String,
    #[serde(flatten)]
    summary: ArtifactSummary,
    feature_columns: Vec<String>,
    targets: Vec<TargetField>,
    lag_target: TargetField,
    feature_config: FeatureConfig,
    recent_targets: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct WeightsPart {
    run_id: String,
    network: Network,
}

#[derive(Serialize, Deserialize)]
struct ScalersPart {
    run_id: String,
    scalers: FittedScalers,
}

#[derive(Serialize, Deserialize)]
struct MetricsPart {
    run_id: String,
    metrics: ModelMetrics,
}

/// Filesystem artifact store. Saves and loads for the same key are
/// serialized; published directories are never modified in place.
#[derive(Debug)]
pub struct FileArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<ModelKey, Arc<Mutex<()>>>>,
}

impl FileArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Opened artifact store");
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_lock(&self, key: &ModelKey) -> Arc<Mutex<()>> {
        self.locks.lock().entry(key.clone()).or_default().clone()
    }

    fn artifact_dir(&self, artifact_id: &str) -> PipelineResult<PathBuf> {
        // Only ULIDs name artifacts, which also keeps ids from escaping the root.
        Ulid::from_string(artifact_id)
            .map_err(|_| PipelineError::ArtifactNotFound(artifact_id.to_string()))?;
        Ok(self.root.join(artifact_id))
    }

    /// Persist all parts of `model` and return the artifact id.
    pub fn save(&self, model: &TrainedModel) -> PipelineResult<String> {
        let artifact_id = model.run_id.to_string();
        let run_id = artifact_id.clone();
        let lock = self.key_lock(&model.key);
        let _guard = lock.lock();

        let final_dir = self.root.join(&artifact_id);
        if final_dir.exists() {
            debug!(artifact_id, "Artifact already stored");
            return Ok(artifact_id);
        }

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            run_id: run_id.clone(),
            summary: ArtifactSummary {
                artifact_id: artifact_id.clone(),
                key: model.key.clone(),
                model_version: model.model_version.clone(),
                created_at: model.metrics.trained_at,
                synthetic_data: model.metrics.synthetic_data,
                training_samples: model.metrics.training_samples,
                validation_loss: model.metrics.validation.loss,
                validation_mae: model.metrics.validation.mae,
            },
            feature_columns: model.feature_columns.clone(),
            targets: model.targets.clone(),
            lag_target: model.lag_target,
            feature_config: model.feature_config.clone(),
            recent_targets: model.recent_targets.clone(),
        };

        let tmp_dir = self.root.join(format!("{TMP_PREFIX}{}", Ulid::new()));
        fs::create_dir_all(&tmp_dir)?;
        let written = (|| -> PipelineResult<()> {
            fs::write(
                tmp_dir.join(WEIGHTS_FILE),
                bincode::serialize(&WeightsPart {
                    run_id: run_id.clone(),
                    network: model.network.clone(),
                })?,
            )?;
            write_json(
                &tmp_dir.join(SCALERS_FILE),
                &ScalersPart {
                    run_id: run_id.clone(),
                    scalers: model.scalers.clone(),
                },
            )?;
            write_json(
                &tmp_dir.join(METRICS_FILE),
                &MetricsPart {
                    run_id: run_id.clone(),
                    metrics: model.metrics.clone(),
                },
            )?;
            // Manifest last: a directory with a manifest is complete.
            write_json(&tmp_dir.join(MANIFEST_FILE), &manifest)?;
            fs::rename(&tmp_dir, &final_dir)?;
            Ok(())
        })();

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_dir_all(&tmp_dir) {
                warn!(dir = %tmp_dir.display(), error = %cleanup, "Failed to remove partial artifact");
            }
            return Err(e);
        }

        info!(
            artifact_id,
            model = %model.key,
            version = %model.model_version,
            "Saved model artifact"
        );
        Ok(artifact_id)
    }

    /// Load weights, scalers and metrics of one artifact together.
    pub fn load(&self, artifact_id: &str) -> PipelineResult<TrainedModel> {
        let dir = self.artifact_dir(artifact_id)?;
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(PipelineError::ArtifactNotFound(artifact_id.to_string()));
        }
        let manifest: Manifest = read_json(&manifest_path)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(PipelineError::Serialization(format!(
                "artifact {artifact_id} has format version {}, expected {FORMAT_VERSION}",
                manifest.format_version
            )));
        }

        let lock = self.key_lock(&manifest.summary.key);
        let _guard = lock.lock();

        let weights: WeightsPart = bincode::deserialize(&fs::read(dir.join(WEIGHTS_FILE))?)?;
        let scalers: ScalersPart = read_json(&dir.join(SCALERS_FILE))?;
        let metrics: MetricsPart = read_json(&dir.join(METRICS_FILE))?;

        let expected = &manifest.run_id;
        for (part, found) in [
            (WEIGHTS_FILE, &weights.run_id),
            (SCALERS_FILE, &scalers.run_id),
            (METRICS_FILE, &metrics.run_id),
        ] {
            if found != expected {
                return Err(mismatch(artifact_id, part, expected, found));
            }
        }

        let width = manifest.feature_columns.len();
        if weights.network.input_dim() != width {
            return Err(mismatch(
                artifact_id,
                WEIGHTS_FILE,
                &format!("{width} inputs"),
                &format!("{} inputs", weights.network.input_dim()),
            ));
        }
        if scalers.scalers.features.width() != width
            || scalers.scalers.targets.width() != weights.network.output_dim()
        {
            return Err(mismatch(
                artifact_id,
                SCALERS_FILE,
                &format!("{width}x{}", weights.network.output_dim()),
                &format!(
                    "{}x{}",
                    scalers.scalers.features.width(),
                    scalers.scalers.targets.width()
                ),
            ));
        }

        let run_id = Ulid::from_string(&manifest.run_id).map_err(|e| {
            PipelineError::Serialization(format!("artifact {artifact_id} has invalid run id: {e}"))
        })?;

        debug!(artifact_id, model = %manifest.summary.key, "Loaded model artifact");

        Ok(TrainedModel {
            run_id,
            key: manifest.summary.key,
            model_version: manifest.summary.model_version,
            network: weights.network,
            scalers: scalers.scalers,
            feature_columns: manifest.feature_columns,
            targets: manifest.targets,
            lag_target: manifest.lag_target,
            feature_config: manifest.feature_config,
            recent_targets: manifest.recent_targets,
            metrics: metrics.metrics,
        })
    }

    /// All complete artifacts, newest first.
    pub fn list(&self) -> PipelineResult<Vec<ArtifactSummary>> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TMP_PREFIX) || !entry.file_type()?.is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILE);
            if !manifest_path.exists() {
                continue;
            }
            match read_json::<Manifest>(&manifest_path) {
                Ok(manifest) => summaries.push(manifest.summary),
                Err(e) => warn!(artifact_id = %name, error = %e, "Skipping unreadable artifact"),
            }
        }
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.artifact_id.cmp(&a.artifact_id))
        });
        Ok(summaries)
    }

    /// Most recent artifact for `key`, if any.
    pub fn latest(&self, key: &ModelKey) -> PipelineResult<Option<ArtifactSummary>> {
        Ok(self.list()?.into_iter().find(|s| &s.key == key))
    }

    pub fn load_latest(&self, key: &ModelKey) -> PipelineResult<TrainedModel> {
        let summary = self
            .latest(key)?
            .ok_or_else(|| PipelineError::ArtifactNotFound(format!("no artifact for {key}")))?;
        self.load(&summary.artifact_id)
    }
}

fn mismatch(artifact_id: &str, part: &'static str, expected: &str, found: &str) -> PipelineError {
    PipelineError::ArtifactMismatch {
        artifact_id: artifact_id.to_string(),
        part,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}
