//! Chronological train/test split and column scalers
//!
//! Scalers are fitted on the training partition only. The fitted transforms
//! travel with the model artifact and are reused as-is for the test
//! partition and for inference inputs.

use chrono::NaiveDate;
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::TargetField;
use crate::error::{PipelineError, PipelineResult};
use crate::forecast::features::FeatureMatrix;

/// Columns with (near) zero spread get unit scale.
const MIN_SCALE: f64 = 1e-12;

fn check_width(expected: usize, found: usize, what: &str) -> PipelineResult<()> {
    if expected != found {
        return Err(PipelineError::Configuration(format!(
            "{what} has {found} columns, scaler was fitted on {expected}"
        )));
    }
    Ok(())
}

/// Zero-mean, unit-variance scaling (population variance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> PipelineResult<Self> {
        let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
            PipelineError::Configuration("cannot fit a scaler on zero rows".to_string())
        })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > MIN_SCALE { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        check_width(self.width(), x.ncols(), "feature matrix")?;
        Ok((x - &self.mean) / &self.scale)
    }

    pub fn inverse_transform(&self, x: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        check_width(self.width(), x.ncols(), "feature matrix")?;
        Ok(x * &self.scale + &self.mean)
    }
}

/// Scaling of each column to `[0, 1]` over the fitted range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Array1<f64>,
    pub scale: Array1<f64>,
}

impl MinMaxScaler {
    pub fn fit(y: &Array2<f64>) -> PipelineResult<Self> {
        if y.nrows() == 0 {
            return Err(PipelineError::Configuration(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }
        let min = y.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
        let max = y.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let scale = (&max - &min).mapv(|r| if r > MIN_SCALE { r } else { 1.0 });
        Ok(Self { min, scale })
    }

    pub fn width(&self) -> usize {
        self.min.len()
    }

    pub fn transform(&self, y: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        check_width(self.width(), y.ncols(), "target matrix")?;
        Ok((y - &self.min) / &self.scale)
    }

    pub fn inverse_transform(&self, y: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        check_width(self.width(), y.ncols(), "target matrix")?;
        Ok(y * &self.scale + &self.min)
    }
}

/// Feature and target transforms fitted on one training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedScalers {
    pub features: StandardScaler,
    pub targets: MinMaxScaler,
}

/// Row index where the test partition begins: `floor(n * (1 - test_size))`.
pub fn split_index(n: usize, test_size: f64) -> PipelineResult<usize> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PipelineError::Configuration(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    let split = (n as f64 * (1.0 - test_size)).floor() as usize;
    if split == 0 || split >= n {
        return Err(PipelineError::Configuration(format!(
            "test_size {test_size} on {n} rows leaves an empty partition (train {split}, test {})",
            n.saturating_sub(split)
        )));
    }
    Ok(split)
}

/// Scaled train/test partitions in chronological order.
#[derive(Debug, Clone)]
pub struct ScaledSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array2<f64>,
    pub y_test: Array2<f64>,
    /// Test targets in original units
    pub y_test_raw: Array2<f64>,
    pub y_train_raw: Array2<f64>,
    pub train_dates: Vec<NaiveDate>,
    pub test_dates: Vec<NaiveDate>,
    pub scalers: FittedScalers,
}

impl ScaledSplit {
    pub fn train_len(&self) -> usize {
        self.x_train.nrows()
    }

    pub fn test_len(&self) -> usize {
        self.x_test.nrows()
    }
}

/// Split `matrix` chronologically and fit scalers on the training rows.
pub fn split_and_scale(
    matrix: &FeatureMatrix,
    targets: &[TargetField],
    test_size: f64,
) -> PipelineResult<ScaledSplit> {
    if targets.is_empty() {
        return Err(PipelineError::Configuration(
            "at least one target column is required".to_string(),
        ));
    }
    let n = matrix.len();
    let split = split_index(n, test_size)?;

    let x = matrix.features();
    let y = matrix.targets(targets);
    let dates = matrix.dates();

    let x_train_raw = x.slice(s![..split, ..]).to_owned();
    let x_test_raw = x.slice(s![split.., ..]).to_owned();
    let y_train_raw = y.slice(s![..split, ..]).to_owned();
    let y_test_raw = y.slice(s![split.., ..]).to_owned();

    let scalers = FittedScalers {
        features: StandardScaler::fit(&x_train_raw)?,
        targets: MinMaxScaler::fit(&y_train_raw)?,
    };

    let split_out = ScaledSplit {
        x_train: scalers.features.transform(&x_train_raw)?,
        x_test: scalers.features.transform(&x_test_raw)?,
        y_train: scalers.targets.transform(&y_train_raw)?,
        y_test: scalers.targets.transform(&y_test_raw)?,
        y_test_raw,
        y_train_raw,
        train_dates: dates[..split].to_vec(),
        test_dates: dates[split..].to_vec(),
        scalers,
    };

    debug!(
        train = split_out.train_len(),
        test = split_out.test_len(),
        features = matrix.columns.len(),
        targets = targets.len(),
        "Split and scaled feature matrix"
    );

    Ok(split_out)
}
