//! Forecast evaluation metrics
//!
//! Per-target MSE, MAE and R² computed on predictions that have already been
//! inverse-scaled to original units.

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::TargetField;

/// Accuracy of one target column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
    /// Coefficient of determination
    pub r2: f64,
    pub sample_count: usize,
}

impl TargetMetrics {
    pub fn calculate(
        actual: ArrayView1<f64>,
        predicted: ArrayView1<f64>,
    ) -> Result<Self, ForecastMetricsError> {
        if actual.len() != predicted.len() {
            return Err(ForecastMetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        if actual.is_empty() {
            return Err(ForecastMetricsError::EmptyData);
        }

        let n = actual.len() as f64;
        let errors = &actual - &predicted;
        let mse = errors.mapv(|e| e * e).sum() / n;
        let mae = errors.mapv(f64::abs).sum() / n;

        let mean_actual = actual.sum() / n;
        let total_variance: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();
        let residual_variance = mse * n;

        // Constant actuals: a perfect fit scores 1, anything else 0.
        let r2 = if total_variance > 1e-12 {
            1.0 - residual_variance / total_variance
        } else if residual_variance < 1e-12 {
            1.0
        } else {
            0.0
        };

        Ok(Self {
            mse,
            mae,
            rmse: mse.sqrt(),
            r2,
            sample_count: actual.len(),
        })
    }
}

impl fmt::Display for TargetMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MSE={:.3}, MAE={:.3}, RMSE={:.3}, R²={:.3}",
            self.mse, self.mae, self.rmse, self.r2
        )
    }
}

/// Metrics for each target column, keyed by column name.
pub fn evaluate_targets(
    actual: &Array2<f64>,
    predicted: &Array2<f64>,
    targets: &[TargetField],
) -> Result<BTreeMap<String, TargetMetrics>, ForecastMetricsError> {
    if actual.dim() != predicted.dim() || actual.ncols() != targets.len() {
        return Err(ForecastMetricsError::DimensionMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    targets
        .iter()
        .enumerate()
        .map(|(j, target)| {
            TargetMetrics::calculate(actual.index_axis(Axis(1), j), predicted.index_axis(Axis(1), j))
                .map(|m| (target.to_string(), m))
        })
        .collect()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ForecastMetricsError {
    #[error("Dimension mismatch: actual={actual}, predicted={predicted}")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("Empty data provided")]
    EmptyData,
}
