pub mod align;
pub mod engine;
pub mod features;
pub mod metrics;
pub mod pipeline;
pub mod synthetic;

pub use align::{AlignedRow, ClimateAggregates, TemporalAligner, WindowStats};
pub use engine::ForecastGenerator;
pub use features::{FeatureBuilder, FeatureConfig, FeatureMatrix, FeatureRow};
pub use metrics::{evaluate_targets, ForecastMetricsError, TargetMetrics};
pub use pipeline::{DataPreparer, DataSource, TrainingSet, LAG_TARGET};
pub use synthetic::{SeasonalClimate, SyntheticSeries};
