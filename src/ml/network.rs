//! Feedforward regressor
//!
//! Dense layers with ReLU activations and inverted dropout between hidden
//! layers, followed by a linear output layer. Trained with mean squared
//! error and the Adam optimizer.

use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Hidden layer widths, input side first
    pub hidden: Vec<usize>,
    /// Dropout rate applied after each hidden layer
    pub dropout: Vec<f64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden: vec![128, 64, 32, 16],
            dropout: vec![0.3, 0.2, 0.2, 0.0],
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.hidden.is_empty() || self.hidden.contains(&0) {
            return Err(PipelineError::Configuration(
                "network needs at least one hidden layer of positive width".to_string(),
            ));
        }
        if self.dropout.len() != self.hidden.len() {
            return Err(PipelineError::Configuration(format!(
                "{} dropout rates given for {} hidden layers",
                self.dropout.len(),
                self.hidden.len()
            )));
        }
        if self.dropout.iter().any(|p| !(0.0..1.0).contains(p)) {
            return Err(PipelineError::Configuration(
                "dropout rates must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// `inputs x outputs`
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseLayer {
    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weights) + &self.bias
    }
}

/// Parameter gradients of one layer. Also used for optimizer moments.
#[derive(Debug, Clone)]
pub struct LayerGradient {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl LayerGradient {
    fn zeros_like(layer: &DenseLayer) -> Self {
        Self {
            weights: Array2::zeros(layer.weights.raw_dim()),
            bias: Array1::zeros(layer.bias.raw_dim()),
        }
    }
}

/// Loss, mean absolute error and gradients for one batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub loss: f64,
    pub mae: f64,
    pub gradients: Vec<LayerGradient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub(crate) layers: Vec<DenseLayer>,
    pub(crate) dropout: Vec<f64>,
}

fn relu(v: f64) -> f64 {
    v.max(0.0)
}

impl Network {
    /// He-initialized hidden layers and a Glorot-uniform output layer.
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        config: &NetworkConfig,
        rng: &mut StdRng,
    ) -> PipelineResult<Self> {
        config.validate()?;
        if input_dim == 0 || output_dim == 0 {
            return Err(PipelineError::Configuration(format!(
                "network dimensions must be positive (input {input_dim}, output {output_dim})"
            )));
        }

        let mut layers = Vec::with_capacity(config.hidden.len() + 1);
        let mut fan_in = input_dim;
        for &width in &config.hidden {
            let he = Normal::new(0.0, (2.0 / fan_in as f64).sqrt())
                .map_err(|e| PipelineError::Configuration(e.to_string()))?;
            layers.push(DenseLayer {
                weights: Array2::from_shape_fn((fan_in, width), |_| he.sample(rng)),
                bias: Array1::zeros(width),
            });
            fan_in = width;
        }

        let limit = (6.0 / (fan_in + output_dim) as f64).sqrt();
        let glorot = Uniform::new(-limit, limit);
        layers.push(DenseLayer {
            weights: Array2::from_shape_fn((fan_in, output_dim), |_| glorot.sample(rng)),
            bias: Array1::zeros(output_dim),
        });

        Ok(Self {
            layers,
            dropout: config.dropout.clone(),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weights.nrows())
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.weights.ncols())
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }

    /// Inference pass (dropout disabled).
    pub fn predict(&self, x: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        if x.ncols() != self.input_dim() {
            return Err(PipelineError::Configuration(format!(
                "network expects {} inputs, got {}",
                self.input_dim(),
                x.ncols()
            )));
        }
        let last = self.layers.len() - 1;
        let mut a = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&a);
            a = if i == last { z } else { z.mapv(relu) };
        }
        Ok(a)
    }

    /// Forward pass with dropout, then backpropagation of the MSE loss.
    pub fn backprop(&self, x: &Array2<f64>, y: &Array2<f64>, rng: &mut StdRng) -> BatchResult {
        let last = self.layers.len() - 1;
        let mut activations: Vec<Array2<f64>> = Vec::with_capacity(self.layers.len() + 1);
        let mut gates: Vec<Array2<f64>> = Vec::with_capacity(last);
        activations.push(x.to_owned());

        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activations[i]);
            if i == last {
                activations.push(z);
                continue;
            }
            let rate = self.dropout[i];
            let keep = 1.0 - rate;
            let mask = if rate > 0.0 {
                Array2::from_shape_fn(z.raw_dim(), |_| {
                    if rng.gen::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                })
            } else {
                Array2::ones(z.raw_dim())
            };
            gates.push(z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }) * &mask);
            activations.push(z.mapv(relu) * &mask);
        }

        let diff = &activations[last + 1] - y;
        let n = diff.len() as f64;
        let loss = diff.mapv(|d| d * d).sum() / n;
        let mae = diff.mapv(f64::abs).sum() / n;

        let mut delta = diff * (2.0 / n);
        let mut gradients = Vec::with_capacity(self.layers.len());
        for i in (0..self.layers.len()).rev() {
            let weights = activations[i].t().dot(&delta);
            let bias = delta.sum_axis(Axis(0));
            if i > 0 {
                delta = delta.dot(&self.layers[i].weights.t()) * &gates[i - 1];
            }
            gradients.push(LayerGradient { weights, bias });
        }
        gradients.reverse();

        BatchResult {
            loss,
            mae,
            gradients,
        }
    }
}

/// Adam optimizer state for one network.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    step: i32,
    m: Vec<LayerGradient>,
    v: Vec<LayerGradient>,
}

impl Adam {
    pub fn new(network: &Network, learning_rate: f64) -> Self {
        let zeros = || network.layers.iter().map(LayerGradient::zeros_like).collect();
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m: zeros(),
            v: zeros(),
        }
    }

    pub fn step(&mut self, network: &mut Network, gradients: &[LayerGradient]) {
        self.step += 1;
        let correction1 = 1.0 - self.beta1.powi(self.step);
        let correction2 = 1.0 - self.beta2.powi(self.step);
        let lr = self.learning_rate * correction2.sqrt() / correction1;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);

        for (((layer, grad), m), v) in network
            .layers
            .iter_mut()
            .zip(gradients)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            update(&mut layer.weights, &grad.weights, &mut m.weights, &mut v.weights, lr, b1, b2, eps);
            update(&mut layer.bias, &grad.bias, &mut m.bias, &mut v.bias, lr, b1, b2, eps);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr: f64,
    b1: f64,
    b2: f64,
    eps: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            *p -= lr * *m / (v.sqrt() + eps);
        });
}
