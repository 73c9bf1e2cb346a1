//! Training loop for the forecast regressor
//!
//! Mini-batch Adam over the (chronologically earlier) training partition,
//! monitored on the validation partition. Training stops early when the
//! validation loss stops improving and the best weights are restored; the
//! learning rate is halved on shorter plateaus.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::network::{Adam, Network, NetworkConfig};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub early_stopping_patience: usize,
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub min_lr: f64,
    /// Minimum validation-loss improvement that resets the LR plateau counter
    pub lr_min_delta: f64,
    pub seed: u64,
    pub network: NetworkConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            early_stopping_patience: 20,
            lr_patience: 10,
            lr_factor: 0.5,
            min_lr: 1e-6,
            lr_min_delta: 1e-4,
            seed: 42,
            network: NetworkConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "epochs and batch_size must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0) || !(self.min_lr >= 0.0) {
            return Err(PipelineError::Configuration(
                "learning rates must be positive".to_string(),
            ));
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "lr_factor must be in (0, 1), got {}",
                self.lr_factor
            )));
        }
        self.network.validate()
    }
}

/// Per-epoch training curves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub mae: Vec<f64>,
    pub val_mae: Vec<f64>,
    pub learning_rate: Vec<f64>,
}

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }
}

/// Stops training after `patience` epochs without validation improvement and
/// keeps a copy of the best network seen.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    best_epoch: usize,
    wait: usize,
    best_network: Option<Network>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: 0,
            wait: 0,
            best_network: None,
        }
    }

    /// Returns `true` when training should stop.
    pub fn update(&mut self, epoch: usize, val_loss: f64, network: &Network) -> bool {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.best_epoch = epoch;
            self.wait = 0;
            self.best_network = Some(network.clone());
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn take_best(&mut self) -> Option<Network> {
        self.best_network.take()
    }
}

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// an improvement larger than `min_delta`, never going below `min_lr`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_lr: f64, min_delta: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            min_delta,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// The new learning rate if it should change.
    pub fn update(&mut self, val_loss: f64, current_lr: f64) -> Option<f64> {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.patience {
            return None;
        }
        self.wait = 0;
        if current_lr > self.min_lr {
            Some((current_lr * self.factor).max(self.min_lr))
        } else {
            None
        }
    }
}

/// Result of a training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub network: Network,
    pub history: TrainingHistory,
    /// 1-based epoch whose weights were kept
    pub best_epoch: usize,
    /// Number of epochs actually run
    pub stopped_epoch: usize,
    pub stopped_early: bool,
    pub final_learning_rate: f64,
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train a fresh network on scaled inputs and targets.
    pub fn fit(
        &self,
        x_train: &Array2<f64>,
        y_train: &Array2<f64>,
        x_val: &Array2<f64>,
        y_val: &Array2<f64>,
    ) -> PipelineResult<TrainingOutcome> {
        if x_train.nrows() == 0 || x_val.nrows() == 0 {
            return Err(PipelineError::Configuration(
                "training and validation partitions must be non-empty".to_string(),
            ));
        }
        if x_train.nrows() != y_train.nrows() || x_val.nrows() != y_val.nrows() {
            return Err(PipelineError::Configuration(
                "feature and target row counts differ".to_string(),
            ));
        }

        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut network = Network::new(x_train.ncols(), y_train.ncols(), &cfg.network, &mut rng)?;
        let mut optimizer = Adam::new(&network, cfg.learning_rate);
        let mut early_stopping = EarlyStopping::new(cfg.early_stopping_patience);
        let mut plateau =
            ReduceLrOnPlateau::new(cfg.lr_factor, cfg.lr_patience, cfg.min_lr, cfg.lr_min_delta);
        let mut history = TrainingHistory::default();
        let mut indices: Vec<usize> = (0..x_train.nrows()).collect();
        let mut stopped_early = false;

        for epoch in 1..=cfg.epochs {
            indices.shuffle(&mut rng);

            let mut loss_sum = 0.0;
            let mut mae_sum = 0.0;
            for batch in indices.chunks(cfg.batch_size) {
                let xb = x_train.select(Axis(0), batch);
                let yb = y_train.select(Axis(0), batch);
                let result = network.backprop(&xb, &yb, &mut rng);
                optimizer.step(&mut network, &result.gradients);
                loss_sum += result.loss * batch.len() as f64;
                mae_sum += result.mae * batch.len() as f64;
            }
            let n = x_train.nrows() as f64;
            let loss = loss_sum / n;
            let mae = mae_sum / n;

            let (val_loss, val_mae) = evaluate(&network, x_val, y_val)?;
            if !loss.is_finite() || !val_loss.is_finite() {
                return Err(PipelineError::Training(format!(
                    "loss diverged at epoch {epoch} (train {loss}, validation {val_loss})"
                )));
            }

            history.loss.push(loss);
            history.val_loss.push(val_loss);
            history.mae.push(mae);
            history.val_mae.push(val_mae);
            history.learning_rate.push(optimizer.learning_rate);

            debug!(epoch, loss, val_loss, mae, val_mae, lr = optimizer.learning_rate, "Epoch complete");

            if early_stopping.update(epoch, val_loss, &network) {
                info!(
                    epoch,
                    best_epoch = early_stopping.best_epoch(),
                    best_val_loss = early_stopping.best_loss(),
                    "Early stopping: validation loss stopped improving"
                );
                stopped_early = true;
                break;
            }

            if let Some(lr) = plateau.update(val_loss, optimizer.learning_rate) {
                info!(epoch, from = optimizer.learning_rate, to = lr, "Reducing learning rate");
                optimizer.learning_rate = lr;
            }
        }

        let best_epoch = early_stopping.best_epoch();
        if let Some(best) = early_stopping.take_best() {
            network = best;
        }

        Ok(TrainingOutcome {
            network,
            stopped_epoch: history.epochs(),
            history,
            best_epoch,
            stopped_early,
            final_learning_rate: optimizer.learning_rate,
        })
    }
}

/// MSE loss and MAE of `network` on a data set (no dropout).
pub fn evaluate(network: &Network, x: &Array2<f64>, y: &Array2<f64>) -> PipelineResult<(f64, f64)> {
    let predicted = network.predict(x)?;
    let diff = &predicted - y;
    let n = diff.len().max(1) as f64;
    Ok((diff.mapv(|d| d * d).sum() / n, diff.mapv(f64::abs).sum() / n))
}
