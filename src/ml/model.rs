use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use ulid::Ulid;

use super::network::Network;
use super::scaler::{split_and_scale, FittedScalers};
use super::training::{evaluate, Trainer, TrainingConfig, TrainingHistory};
use crate::domain::{DiseaseType, ModelKey, MunicipalityCode, TargetField, MODEL_TARGETS};
use crate::error::{PipelineError, PipelineResult};
use crate::forecast::features::{FeatureBuilder, FeatureConfig, FeatureMatrix};
use crate::forecast::metrics::{evaluate_targets, TargetMetrics};

pub const MODEL_NAME: &str = "arbovirus_predictor";

/// Loss (scaled units) and per-target accuracy (original units) on one
/// partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    pub loss: f64,
    pub mae: f64,
    pub mse: f64,
    pub targets: BTreeMap<String, TargetMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub municipality_code: MunicipalityCode,
    pub disease_type: DiseaseType,
    pub training: PartitionMetrics,
    pub validation: PartitionMetrics,
    pub history: TrainingHistory,
    pub training_samples: usize,
    pub test_samples: usize,
    pub features: usize,
    pub targets: usize,
    pub synthetic_data: bool,
    pub best_epoch: usize,
    pub stopped_epoch: usize,
    pub stopped_early: bool,
    pub final_learning_rate: f64,
    pub trained_at: DateTime<Utc>,
}

/// Weights, fitted scalers and column layout of one training run. The parts
/// are only valid together.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub run_id: Ulid,
    pub key: ModelKey,
    pub model_version: String,
    pub network: Network,
    pub scalers: FittedScalers,
    pub feature_columns: Vec<String>,
    pub targets: Vec<TargetField>,
    /// Series the lag and rolling features are computed from
    pub lag_target: TargetField,
    pub feature_config: FeatureConfig,
    /// Last observed target values, oldest first
    pub recent_targets: Vec<f64>,
    pub metrics: ModelMetrics,
}

impl TrainedModel {
    /// Predict targets in original units from unscaled feature rows.
    pub fn predict(&self, features: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        if features.ncols() != self.feature_columns.len() {
            return Err(PipelineError::Configuration(format!(
                "model {} expects {} feature columns, got {}",
                self.run_id,
                self.feature_columns.len(),
                features.ncols()
            )));
        }
        let scaled = self.scalers.features.transform(features)?;
        let output = self.network.predict(&scaled)?;
        self.scalers.targets.inverse_transform(&output)
    }

    pub fn feature_builder(&self) -> PipelineResult<FeatureBuilder> {
        FeatureBuilder::new(self.feature_config.clone())
    }
}

/// Train/predict contract of the forecast regressor.
pub struct ForecastModel {
    training: TrainingConfig,
    test_size: f64,
    trained: Option<TrainedModel>,
}

impl ForecastModel {
    pub fn new(training: TrainingConfig, test_size: f64) -> Self {
        Self {
            training,
            test_size,
            trained: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub fn trained(&self) -> PipelineResult<&TrainedModel> {
        self.trained
            .as_ref()
            .ok_or_else(|| PipelineError::ModelNotReady("model has not been trained or loaded".to_string()))
    }

    pub fn into_trained(self) -> PipelineResult<TrainedModel> {
        self.trained
            .ok_or_else(|| PipelineError::ModelNotReady("model has not been trained or loaded".to_string()))
    }

    pub fn predict(&self, features: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        self.trained()?.predict(features)
    }

    /// Fit on `matrix` with a chronological split, replacing any previous
    /// model.
    pub fn train(
        &mut self,
        key: ModelKey,
        matrix: &FeatureMatrix,
        feature_config: &FeatureConfig,
        synthetic_data: bool,
    ) -> PipelineResult<&ModelMetrics> {
        let split = split_and_scale(matrix, &MODEL_TARGETS, self.test_size)?;
        let trainer = Trainer::new(self.training.clone())?;

        info!(
            model = %key,
            train = split.train_len(),
            test = split.test_len(),
            features = matrix.columns.len(),
            epochs = self.training.epochs,
            synthetic_data,
            "Training forecast model"
        );

        let outcome = trainer.fit(&split.x_train, &split.y_train, &split.x_test, &split.y_test)?;

        let partition = |x: &Array2<f64>, y: &Array2<f64>, raw: &Array2<f64>| {
            let (loss, mae) = evaluate(&outcome.network, x, y)?;
            let predicted = split
                .scalers
                .targets
                .inverse_transform(&outcome.network.predict(x)?)?;
            let targets = evaluate_targets(raw, &predicted, &MODEL_TARGETS)
                .map_err(|e| PipelineError::Training(e.to_string()))?;
            Ok::<_, PipelineError>(PartitionMetrics {
                loss,
                mae,
                mse: loss,
                targets,
            })
        };
        let training = partition(&split.x_train, &split.y_train, &split.y_train_raw)?;
        let validation = partition(&split.x_test, &split.y_test, &split.y_test_raw)?;

        let trained_at = Utc::now();
        let metrics = ModelMetrics {
            municipality_code: key.municipality_code.clone(),
            disease_type: key.disease_type,
            training,
            validation,
            training_samples: split.train_len(),
            test_samples: split.test_len(),
            features: matrix.columns.len(),
            targets: MODEL_TARGETS.len(),
            synthetic_data,
            best_epoch: outcome.best_epoch,
            stopped_epoch: outcome.stopped_epoch,
            stopped_early: outcome.stopped_early,
            final_learning_rate: outcome.final_learning_rate,
            history: outcome.history,
            trained_at,
        };

        info!(
            model = %key,
            train_loss = metrics.training.loss,
            val_loss = metrics.validation.loss,
            val_mae = metrics.validation.mae,
            epochs = metrics.stopped_epoch,
            "Training complete"
        );

        let trained = self.trained.insert(TrainedModel {
            run_id: Ulid::new(),
            model_version: format!("{MODEL_NAME}_{}", trained_at.format("%Y%m%d_%H%M%S")),
            key,
            network: outcome.network,
            scalers: split.scalers,
            feature_columns: matrix.columns.clone(),
            targets: MODEL_TARGETS.to_vec(),
            lag_target: matrix.target,
            feature_config: feature_config.clone(),
            recent_targets: matrix.recent_targets(feature_config.history_len()),
            metrics,
        });
        Ok(&trained.metrics)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Prepared;
    use crate::forecast::synthetic::SyntheticSeries;
    use crate::ml::network::NetworkConfig;

    fn key() -> ModelKey {
        ModelKey::new(MunicipalityCode::new("2304400").unwrap(), DiseaseType::Chikungunya)
    }

    fn matrix() -> FeatureMatrix {
        let rows = SyntheticSeries::new(60, 1)
            .generate(&key().municipality_code, key().disease_type)
            .unwrap();
        match FeatureBuilder::new(FeatureConfig::default())
            .unwrap()
            .build(&rows, TargetField::CasesSuspected)
        {
            Prepared::Ready(m) => m,
            Prepared::Insufficient(r) => panic!("unexpected: {r}"),
        }
    }

    fn quick_training() -> TrainingConfig {
        TrainingConfig {
            epochs: 5,
            network: NetworkConfig {
                hidden: vec![16, 8],
                dropout: vec![0.2, 0.0],
            },
            ..TrainingConfig::default()
        }
    }

    /// Small model trained on synthetic data, for tests that need weights.
    pub(crate) fn quick_model(code: &str) -> TrainedModel {
        let key = ModelKey::new(MunicipalityCode::new(code).unwrap(), DiseaseType::Dengue);
        let rows = SyntheticSeries::new(40, 3)
            .generate(&key.municipality_code, key.disease_type)
            .unwrap();
        let config = FeatureConfig::default();
        let matrix = FeatureBuilder::new(config.clone())
            .unwrap()
            .build(&rows, TargetField::CasesSuspected)
            .require()
            .unwrap();
        let mut model = ForecastModel::new(quick_training(), 0.2);
        model.train(key, &matrix, &config, true).unwrap();
        model.into_trained().unwrap()
    }

    #[test]
    fn test_predict_before_training_fails() {
        let model = ForecastModel::new(TrainingConfig::default(), 0.2);
        assert!(!model.is_trained());
        assert!(matches!(
            model.predict(&Array2::zeros((1, 29))),
            Err(PipelineError::ModelNotReady(_))
        ));
        assert!(matches!(
            model.into_trained(),
            Err(PipelineError::ModelNotReady(_))
        ));
    }

    #[test]
    fn test_train_then_predict() {
        let matrix = matrix();
        let mut model = ForecastModel::new(quick_training(), 0.2);
        let metrics = model
            .train(key(), &matrix, &FeatureConfig::default(), true)
            .unwrap()
            .clone();

        assert_eq!(metrics.training_samples + metrics.test_samples, matrix.len());
        assert_eq!(metrics.features, 29);
        assert_eq!(metrics.validation.targets.len(), 3);
        assert!(metrics.validation.targets.contains_key("incidence_rate"));
        assert!(metrics.synthetic_data);

        let predictions = model.predict(&matrix.features()).unwrap();
        assert_eq!(predictions.dim(), (matrix.len(), 3));
        assert!(predictions.iter().all(|v| v.is_finite()));

        let trained = model.trained().unwrap();
        assert_eq!(trained.recent_targets.len(), 8);
        assert!(trained.model_version.starts_with(MODEL_NAME));
        assert!(model.predict(&Array2::zeros((1, 28))).is_err());
    }
}
