//! Gradient-boosted regression trees.
//!
//! One implementation covers the catboost, lightgbm, xgboost and gbr families;
//! they differ only in [`TreeParams`] (growth mode, regularization, limits) and
//! row subsampling.
//!
//! # Algorithm
//!
//! 1. Start every row at the target mean
//! 2. Each round: squared-error gradients `pred - y` (hessian 1), fit one tree
//!    on a row subsample, add `learning_rate * tree(x)` to every prediction
//! 3. Prediction = mean + shrunken sum of tree outputs

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::tree::{RegressionTree, TreeParams};
use super::{check_training_data, Matrix, Regressor};
use crate::cancel::CancellationToken;
use crate::{Error, Result};

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingConfig {
    /// Boosting rounds.
    pub n_estimators: usize,
    /// Shrinkage applied to each tree.
    pub learning_rate: f64,
    /// Fraction of rows sampled (without replacement) per round.
    pub subsample: f64,
    /// Per-tree limits.
    pub tree: TreeParams,
    /// Sampling seed.
    pub seed: u64,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            subsample: 1.0,
            tree: TreeParams::default(),
            seed: 42,
        }
    }
}

/// Gradient boosting regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    config: BoostingConfig,
    base_score: f64,
    n_features: Option<usize>,
    trees: Vec<RegressionTree>,
}

impl GradientBoostingRegressor {
    /// Create an unfitted regressor.
    #[must_use]
    pub const fn new(config: BoostingConfig) -> Self {
        Self {
            config,
            base_score: 0.0,
            n_features: None,
            trees: Vec::new(),
        }
    }

    /// Hyperparameters.
    #[must_use]
    pub const fn config(&self) -> &BoostingConfig {
        &self.config
    }

    /// Number of fitted trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn sample_rows(&self, n: usize, rng: &mut StdRng) -> Vec<usize> {
        if self.config.subsample >= 1.0 {
            return (0..n).collect();
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let amount = ((n as f64) * self.config.subsample).round().max(1.0) as usize;
        let mut rows = sample(rng, n, amount.min(n)).into_vec();
        rows.sort_unstable();
        rows
    }
}

impl Regressor for GradientBoostingRegressor {
    fn fit_with(&mut self, x: &Matrix, y: &[f64], cancel: &CancellationToken) -> Result<()> {
        check_training_data(x, y)?;
        if self.config.learning_rate.is_nan() || self.config.learning_rate <= 0.0 {
            return Err(Error::Computation(format!(
                "learning_rate must be positive (got {})",
                self.config.learning_rate
            )));
        }

        let n = x.n_rows();
        #[allow(clippy::cast_precision_loss)]
        let base_score = y.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![base_score; n];
        let hess = vec![1.0; n];
        let mut grad = vec![0.0; n];
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut trees = Vec::with_capacity(self.config.n_estimators);

        for round in 0..self.config.n_estimators {
            cancel.check()?;
            for i in 0..n {
                grad[i] = predictions[i] - y[i];
            }
            let rows = self.sample_rows(n, &mut rng);
            let tree = RegressionTree::fit(x, &grad, &hess, &rows, &self.config.tree);
            for (i, prediction) in predictions.iter_mut().enumerate() {
                *prediction += self.config.learning_rate * tree.predict_row(x.row(i));
            }
            trees.push(tree);
            if round % 100 == 0 {
                trace!(round, "boosting round");
            }
        }

        self.base_score = base_score;
        self.n_features = Some(x.n_cols());
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        super::check_prediction_data(x, self.n_features)?;
        Ok(x.rows()
            .map(|row| {
                self.base_score
                    + self.config.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            })
            .collect())
    }
}
