//! Feed-forward ReLU network trained with Adam, behind `aprender`'s
//! [`StandardScaler`].
//!
//! Training follows the usual MLP regressor recipe: squared loss with an L2
//! penalty (`alpha`), shuffled mini-batches of `min(200, n)` rows, Glorot-uniform
//! initialisation, and early termination once the epoch loss has failed to
//! improve by `tol` for more than `n_iter_no_change` consecutive epochs.

use aprender::preprocessing::StandardScaler;
use aprender::traits::Transformer;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_prediction_data, check_training_data, Matrix, Regressor};
use crate::cancel::CancellationToken;
use crate::{Error, Result};

const BETA_1: f64 = 0.9;
const BETA_2: f64 = 0.999;
const EPSILON: f64 = 1e-8;
const DEFAULT_BATCH: usize = 200;

/// Network hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Width of each hidden layer.
    pub hidden_layer_sizes: Vec<usize>,
    /// Maximum epochs.
    pub max_iter: usize,
    /// Adam step size.
    pub learning_rate_init: f64,
    /// L2 penalty.
    pub alpha: f64,
    /// Mini-batch size (`None` = `min(200, n)`).
    pub batch_size: Option<usize>,
    /// Loss improvement threshold for early termination.
    pub tol: f64,
    /// Epochs without improvement tolerated.
    pub n_iter_no_change: usize,
    /// Initialisation and shuffling seed.
    pub seed: u64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![100, 50],
            max_iter: 1000,
            learning_rate_init: 1e-3,
            alpha: 1e-4,
            batch_size: None,
            tol: 1e-4,
            n_iter_no_change: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    n_in: usize,
    n_out: usize,
    /// `n_in * n_out`, indexed `[i * n_out + j]`
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl Dense {
    fn glorot(n_in: usize, n_out: usize, rng: &mut StdRng) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let bound = (6.0 / (n_in + n_out) as f64).sqrt();
        Self {
            n_in,
            n_out,
            weights: (0..n_in * n_out)
                .map(|_| rng.gen_range(-bound..bound))
                .collect(),
            biases: (0..n_out).map(|_| rng.gen_range(-bound..bound)).collect(),
        }
    }

    fn forward(&self, input: &[f64], relu: bool) -> Vec<f64> {
        let mut out = self.biases.clone();
        for (i, &a) in input.iter().enumerate() {
            let row = &self.weights[i * self.n_out..(i + 1) * self.n_out];
            for (o, w) in out.iter_mut().zip(row) {
                *o += a * w;
            }
        }
        if relu {
            for o in &mut out {
                *o = o.max(0.0);
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
struct Moments {
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl Moments {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            biases: vec![0.0; layer.biases.len()],
        }
    }

    fn clear(&mut self) {
        self.weights.iter_mut().for_each(|g| *g = 0.0);
        self.biases.iter_mut().for_each(|g| *g = 0.0);
    }
}

fn adam_step(params: &mut [f64], grads: &[f64], m: &mut [f64], v: &mut [f64], step: f64) {
    for (((p, g), m), v) in params.iter_mut().zip(grads).zip(m.iter_mut()).zip(v.iter_mut()) {
        *m = BETA_1 * *m + (1.0 - BETA_1) * g;
        *v = BETA_2 * *v + (1.0 - BETA_2) * g * g;
        *p -= step * *m / (v.sqrt() + EPSILON);
    }
}

/// Multi-layer perceptron regressor with a built-in [`StandardScaler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpRegressor {
    config: MlpConfig,
    scaler: Option<StandardScaler>,
    layers: Vec<Dense>,
    n_iter: usize,
}

impl MlpRegressor {
    /// Create an unfitted network.
    #[must_use]
    pub const fn new(config: MlpConfig) -> Self {
        Self {
            config,
            scaler: None,
            layers: Vec::new(),
            n_iter: 0,
        }
    }

    /// Hyperparameters.
    #[must_use]
    pub const fn config(&self) -> &MlpConfig {
        &self.config
    }

    /// Epochs run by the last fit.
    #[must_use]
    pub const fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn forward_all(layers: &[Dense], input: Vec<f64>) -> Vec<Vec<f64>> {
        let mut activations = Vec::with_capacity(layers.len() + 1);
        activations.push(input);
        for (l, layer) in layers.iter().enumerate() {
            let relu = l + 1 < layers.len();
            let next = layer.forward(&activations[l], relu);
            activations.push(next);
        }
        activations
    }
}

impl Regressor for MlpRegressor {
    #[allow(clippy::cast_precision_loss)]
    fn fit_with(&mut self, x: &Matrix, y: &[f64], cancel: &CancellationToken) -> Result<()> {
        check_training_data(x, y)?;
        if self.config.hidden_layer_sizes.iter().any(|&h| h == 0) {
            return Err(Error::Computation(
                "hidden layer sizes must be positive".to_string(),
            ));
        }

        let n = x.n_rows();
        let mut scaler = StandardScaler::new();
        let scaled = Matrix::from_f32(&scaler.fit_transform(&x.to_f32()?)?)?;
        let inputs: Vec<Vec<f64>> = scaled.rows().map(<[f64]>::to_vec).collect();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut sizes = vec![x.n_cols()];
        sizes.extend(&self.config.hidden_layer_sizes);
        sizes.push(1);
        let mut layers: Vec<Dense> = sizes
            .windows(2)
            .map(|w| Dense::glorot(w[0], w[1], &mut rng))
            .collect();

        let mut grads: Vec<Moments> = layers.iter().map(Moments::zeros_like).collect();
        let mut first: Vec<Moments> = grads.clone();
        let mut second: Vec<Moments> = grads.clone();

        let batch = self
            .config
            .batch_size
            .unwrap_or(DEFAULT_BATCH)
            .clamp(1, n);
        let mut order: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        let mut step_count = 0_i32;
        let mut epochs = 0;

        for epoch in 0..self.config.max_iter {
            cancel.check()?;
            order.shuffle(&mut rng);
            let mut accumulated = 0.0;

            for chunk in order.chunks(batch) {
                grads.iter_mut().for_each(Moments::clear);
                let mut squared = 0.0;

                for &i in chunk {
                    let activations = Self::forward_all(&layers, inputs[i].clone());
                    let output = activations[layers.len()][0];
                    let diff = output - y[i];
                    squared += diff * diff;

                    let mut delta = vec![diff];
                    for l in (0..layers.len()).rev() {
                        let layer = &layers[l];
                        let input = &activations[l];
                        for (a, &act) in input.iter().enumerate() {
                            let row = &mut grads[l].weights[a * layer.n_out..(a + 1) * layer.n_out];
                            for (g, d) in row.iter_mut().zip(&delta) {
                                *g += act * d;
                            }
                        }
                        for (g, d) in grads[l].biases.iter_mut().zip(&delta) {
                            *g += d;
                        }
                        if l > 0 {
                            delta = (0..layer.n_in)
                                .map(|a| {
                                    if input[a] <= 0.0 {
                                        return 0.0;
                                    }
                                    let row = &layer.weights[a * layer.n_out..(a + 1) * layer.n_out];
                                    row.iter().zip(&delta).map(|(w, d)| w * d).sum()
                                })
                                .collect();
                        }
                    }
                }

                let m = chunk.len() as f64;
                let mut penalty = 0.0;
                for (layer, grad) in layers.iter().zip(grads.iter_mut()) {
                    for (g, w) in grad.weights.iter_mut().zip(&layer.weights) {
                        *g = *g / m + self.config.alpha * w / m;
                        penalty += w * w;
                    }
                    for g in &mut grad.biases {
                        *g /= m;
                    }
                }
                let batch_loss = squared / (2.0 * m) + 0.5 * self.config.alpha * penalty / m;
                accumulated += batch_loss * m;

                step_count = step_count.saturating_add(1);
                let step = self.config.learning_rate_init
                    * (1.0 - BETA_2.powi(step_count)).sqrt()
                    / (1.0 - BETA_1.powi(step_count));
                for (((layer, grad), m1), m2) in layers
                    .iter_mut()
                    .zip(&grads)
                    .zip(first.iter_mut())
                    .zip(second.iter_mut())
                {
                    adam_step(&mut layer.weights, &grad.weights, &mut m1.weights, &mut m2.weights, step);
                    adam_step(&mut layer.biases, &grad.biases, &mut m1.biases, &mut m2.biases, step);
                }
            }

            epochs = epoch + 1;
            let loss = accumulated / n as f64;
            if !loss.is_finite() {
                return Err(Error::Computation(format!(
                    "network loss diverged at epoch {epochs}"
                )));
            }
            if loss > best_loss - self.config.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(loss);
            if no_improvement > self.config.n_iter_no_change {
                debug!(epochs, loss, "network converged");
                break;
            }
        }

        self.scaler = Some(scaler);
        self.layers = layers;
        self.n_iter = epochs;
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        let scaler = self.scaler.as_ref().filter(|s| s.is_fitted());
        check_prediction_data(x, scaler.map(|s| s.mean().len()))?;
        let scaler = scaler.ok_or_else(|| Error::Computation("model is not fitted".to_string()))?;
        let scaled = Matrix::from_f32(&scaler.transform(&x.to_f32()?)?)?;
        Ok(scaled
            .rows()
            .map(|row| {
                let activations = Self::forward_all(&self.layers, row.to_vec());
                activations
                    .last()
                    .and_then(|out| out.first())
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::metrics::rmse;

    fn linear() -> (Matrix, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![f64::from(i) * 10.0, f64::from(i % 4)])
            .collect();
        let y = rows.iter().map(|r| 0.05 * r[0] + r[1]).collect();
        (Matrix::from_rows(&rows).unwrap(), y)
    }

    fn small(max_iter: usize) -> MlpConfig {
        MlpConfig {
            hidden_layer_sizes: vec![16, 8],
            max_iter,
            learning_rate_init: 0.01,
            ..MlpConfig::default()
        }
    }

    #[test]
    fn test_constant_feature_is_tolerated() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![f64::from(i), 5.0]).collect();
        let y: Vec<f64> = rows.iter().map(|r| 2.0 * r[0]).collect();
        let x = Matrix::from_rows(&rows).unwrap();
        let mut model = MlpRegressor::new(small(10));
        model.fit(&x, &y).unwrap();
        assert!(model.predict(&x).unwrap().iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_unfitted_network_is_an_error() {
        let model = MlpRegressor::new(small(1));
        assert!(model.predict(&Matrix::zeros(1, 2).unwrap()).is_err());
    }

    #[test]
    fn test_mlp_learns_linear_signal() {
        let (x, y) = linear();
        let mean = y.iter().sum::<f64>() / 40.0;
        let baseline = rmse(&y, &vec![mean; 40]);

        let mut model = MlpRegressor::new(small(300));
        model.fit(&x, &y).unwrap();
        let error = rmse(&y, &model.predict(&x).unwrap());
        assert!(error < baseline * 0.5, "{error} vs {baseline}");
        assert!(model.n_iter() >= 1);
    }

    #[test]
    fn test_mlp_is_deterministic() {
        let (x, y) = linear();
        let mut a = MlpRegressor::new(small(20));
        let mut b = MlpRegressor::new(small(20));
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_mlp_serde_roundtrip() {
        let (x, y) = linear();
        let mut model = MlpRegressor::new(small(5));
        model.fit(&x, &y).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: MlpRegressor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict(&x).unwrap(), model.predict(&x).unwrap());
    }

    #[test]
    fn test_mlp_rejects_zero_width() {
        let (x, y) = linear();
        let mut model = MlpRegressor::new(MlpConfig {
            hidden_layer_sizes: vec![0],
            ..MlpConfig::default()
        });
        assert!(model.fit(&x, &y).is_err());
    }
}
