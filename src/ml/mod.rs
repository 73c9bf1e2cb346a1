//! Machine Learning Module
//!
//! Case-count regressor for one municipality/disease pair:
//! - Chronological split and train-only scaling
//! - Feedforward network with dropout, trained with Adam
//! - Early stopping and learning-rate decay on plateau
//! - Versioned artifacts bundling weights, scalers and metrics
//! - Explicit model registry with per-key training slots

pub mod artifact;
pub mod inference;
pub mod model;
pub mod network;
pub mod scaler;
pub mod training;

pub use artifact::{ArtifactSummary, FileArtifactStore};
pub use inference::{ModelRegistry, TrainingGuard};
pub use model::{ForecastModel, ModelMetrics, PartitionMetrics, TrainedModel, MODEL_NAME};
pub use network::NetworkConfig;
pub use scaler::{split_and_scale, FittedScalers, MinMaxScaler, ScaledSplit, StandardScaler};
pub use training::{Trainer, TrainingConfig, TrainingHistory};
