//! Random forest of `aprender` CART regression trees.
//!
//! Each [`aprender::tree::DecisionTreeRegressor`] is fitted on its own
//! bootstrap sample drawn from a per-tree seed (`seed + tree_index`). Trees
//! are grown in parallel with rayon, so results do not depend on thread
//! scheduling.

use aprender::primitives::Vector;
use aprender::tree::DecisionTreeRegressor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{check_prediction_data, check_training_data, Matrix, Regressor};
use crate::cancel::CancellationToken;
use crate::Result;

/// Forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees.
    pub n_estimators: usize,
    /// Depth limit per tree (`None` = grow until pure).
    pub max_depth: Option<usize>,
    /// Minimum rows to split a node.
    pub min_samples_split: usize,
    /// Minimum rows per leaf.
    pub min_samples_leaf: usize,
    /// Bootstrap seed.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(10),
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// Bootstrap-aggregated regression trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    n_features: Option<usize>,
    trees: Vec<DecisionTreeRegressor>,
}

impl RandomForestRegressor {
    /// Create an unfitted forest.
    #[must_use]
    pub const fn new(config: ForestConfig) -> Self {
        Self {
            config,
            n_features: None,
            trees: Vec::new(),
        }
    }

    /// Hyperparameters.
    #[must_use]
    pub const fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Number of fitted trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn tree(&self) -> DecisionTreeRegressor {
        let tree = DecisionTreeRegressor::new()
            .with_min_samples_split(self.config.min_samples_split)
            .with_min_samples_leaf(self.config.min_samples_leaf);
        match self.config.max_depth {
            Some(depth) => tree.with_max_depth(depth),
            None => tree,
        }
    }
}

impl Regressor for RandomForestRegressor {
    #[allow(clippy::cast_possible_truncation)]
    fn fit_with(&mut self, x: &Matrix, y: &[f64], cancel: &CancellationToken) -> Result<()> {
        check_training_data(x, y)?;
        let n = x.n_rows();

        let trees = (0..self.config.n_estimators)
            .into_par_iter()
            .map(|t| {
                cancel.check()?;
                let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(t as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let sample_x = x.select_rows(&bootstrap)?.to_f32()?;
                let sample_y = Vector::from_vec(bootstrap.iter().map(|&i| y[i] as f32).collect());

                let mut tree = self.tree();
                tree.fit(&sample_x, &sample_y)?;
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;

        self.n_features = Some(x.n_cols());
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        check_prediction_data(x, self.n_features)?;
        if self.trees.is_empty() {
            return Ok(vec![0.0; x.n_rows()]);
        }
        let dense = x.to_f32()?;
        let mut sums = vec![0.0_f64; x.n_rows()];
        for tree in &self.trees {
            for (sum, value) in sums.iter_mut().zip(tree.predict(&dense).as_slice()) {
                *sum += f64::from(*value);
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let n_trees = self.trees.len() as f64;
        Ok(sums.into_iter().map(|s| s / n_trees).collect())
    }
}
