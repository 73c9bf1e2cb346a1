//! Training-set preparation: alignment, feature building and the synthetic
//! fallback.

use tracing::{info, warn};

use super::align::TemporalAligner;
use super::features::{FeatureBuilder, FeatureConfig, FeatureMatrix};
use super::synthetic::SyntheticSeries;
use crate::domain::{ClimateRecord, ModelKey, SurveillanceRecord, TargetField};
use crate::error::{InsufficientData, PipelineError, PipelineResult, Prepared};

/// Series the lag and rolling features are built from.
pub const LAG_TARGET: TargetField = TargetField::CasesSuspected;

/// How the training set should be sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Observed records only; insufficient data is an error.
    Observed,
    /// Observed records, falling back to synthetic rows when too short.
    ObservedOrSynthetic,
    Synthetic,
}

/// A feature matrix ready for training.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub matrix: FeatureMatrix,
    pub synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct DataPreparer {
    aligner: TemporalAligner,
    builder: FeatureBuilder,
    synthetic_samples: usize,
    seed: u64,
}

impl DataPreparer {
    pub fn new(
        time_window_days: u32,
        features: FeatureConfig,
        synthetic_samples: usize,
        seed: u64,
    ) -> PipelineResult<Self> {
        Ok(Self {
            aligner: TemporalAligner::new(time_window_days),
            builder: FeatureBuilder::new(features)?,
            synthetic_samples,
            seed,
        })
    }

    pub fn feature_config(&self) -> &FeatureConfig {
        self.builder.config()
    }

    /// Align and build features from observed records.
    pub fn observed(
        &self,
        climate: &[ClimateRecord],
        surveillance: &[SurveillanceRecord],
    ) -> Prepared<FeatureMatrix> {
        let rows = self.aligner.align(climate, surveillance);
        if rows.is_empty() {
            return Prepared::Insufficient(InsufficientData {
                stage: "temporal_aligner",
                available: 0,
                required: self.feature_config().min_samples + self.feature_config().max_lag(),
            });
        }
        self.builder.build(&rows, LAG_TARGET)
    }

    pub fn synthetic(&self, key: &ModelKey) -> PipelineResult<FeatureMatrix> {
        let rows = SyntheticSeries::new(self.synthetic_samples, self.seed)
            .generate(&key.municipality_code, key.disease_type)?;
        self.builder.build(&rows, LAG_TARGET).require()
    }

    pub fn prepare(
        &self,
        key: &ModelKey,
        source: DataSource,
        climate: &[ClimateRecord],
        surveillance: &[SurveillanceRecord],
    ) -> PipelineResult<TrainingSet> {
        if source == DataSource::Synthetic {
            return Ok(TrainingSet {
                matrix: self.synthetic(key)?,
                synthetic: true,
            });
        }

        match self.observed(climate, surveillance) {
            Prepared::Ready(matrix) => {
                info!(model = %key, rows = matrix.len(), "Prepared observed training set");
                Ok(TrainingSet {
                    matrix,
                    synthetic: false,
                })
            }
            Prepared::Insufficient(reason) if source == DataSource::ObservedOrSynthetic => {
                warn!(
                    model = %key,
                    stage = reason.stage,
                    available = reason.available,
                    required = reason.required,
                    "Insufficient observed data, training on synthetic series"
                );
                Ok(TrainingSet {
                    matrix: self.synthetic(key)?,
                    synthetic: true,
                })
            }
            Prepared::Insufficient(reason) => Err(PipelineError::DataInsufficient(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiseaseType, MunicipalityCode};

    fn key() -> ModelKey {
        ModelKey::new(MunicipalityCode::new("3304557").unwrap(), DiseaseType::Dengue)
    }

    fn preparer() -> DataPreparer {
        DataPreparer::new(7, FeatureConfig::default(), 100, 42).unwrap()
    }

    #[test]
    fn test_observed_only_reports_insufficient_data() {
        let err = preparer()
            .prepare(&key(), DataSource::Observed, &[], &[])
            .unwrap_err();
        match err {
            PipelineError::DataInsufficient(reason) => {
                assert_eq!(reason.stage, "temporal_aligner");
                assert_eq!(reason.available, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_falls_back_to_synthetic() {
        let set = preparer()
            .prepare(&key(), DataSource::ObservedOrSynthetic, &[], &[])
            .unwrap();
        assert!(set.synthetic);
        assert_eq!(set.matrix.len(), 96);
        assert_eq!(set.matrix.target, LAG_TARGET);
    }

    #[test]
    fn test_synthetic_is_reproducible() {
        let a = preparer().synthetic(&key()).unwrap();
        let b = preparer().synthetic(&key()).unwrap();
        assert_eq!(a, b);
    }
}
