//! Model-agnostic feature attributions (sampling Shapley values).
//!
//! For every explained row, features are switched from a background row to the
//! explained row in random order; the change in prediction at each switch is
//! that feature's marginal contribution. Averaging over permutations estimates
//! the Shapley value. Every permutation costs one batched `predict` call of
//! `n_features + 1` rows.
//!
//! Attribution is best-effort: callers turn an `Err` into "no explanation".

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ExplainConfig;
use crate::model::{Matrix, Regressor};
use crate::{Error, Result};

/// Attributions for a set of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Feature names, in attribution order.
    pub feature_names: Vec<String>,
    /// Mean prediction over the background set.
    pub base_value: f64,
    /// Dataset row index of each explained row.
    pub rows: Vec<usize>,
    /// Per-row, per-feature attributions.
    pub values: Vec<Vec<f64>>,
    /// Per-row feature values that were explained.
    pub data: Vec<Vec<f64>>,
}

impl Explanation {
    /// Mean absolute attribution per feature.
    #[must_use]
    pub fn mean_abs(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.feature_names.len()];
        for row in &self.values {
            for (t, v) in totals.iter_mut().zip(row) {
                *t += v.abs();
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.values.len().max(1) as f64;
        totals.into_iter().map(|t| t / n).collect()
    }
}

/// Estimate Shapley values of `model` for `samples` against `background`.
///
/// `rows` gives the dataset index of each sample row; only the first
/// `config.max_samples` rows are explained and at most `config.max_background`
/// background rows are used.
///
/// # Errors
///
/// Returns [`Error::Explainability`] if the inputs are unusable, a prediction
/// fails, or an attribution is not finite.
pub fn shapley_values<M: Regressor + Sync>(
    model: &M,
    background: &Matrix,
    samples: &Matrix,
    rows: &[usize],
    feature_names: &[String],
    config: &ExplainConfig,
    seed: u64,
) -> Result<Explanation> {
    let n_features = feature_names.len();
    if background.n_rows() == 0 {
        return Err(Error::Explainability("empty background set".to_string()));
    }
    if config.permutations == 0 {
        return Err(Error::Explainability(
            "at least one permutation is required".to_string(),
        ));
    }
    if samples.n_cols() != n_features || background.n_cols() != n_features {
        return Err(Error::Explainability(format!(
            "expected {n_features} features, got {} (samples) / {} (background)",
            samples.n_cols(),
            background.n_cols()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let background = if background.n_rows() > config.max_background.max(1) {
        let picked = sample(&mut rng, background.n_rows(), config.max_background.max(1)).into_vec();
        background
            .select_rows(&picked)
            .map_err(|e| Error::Explainability(e.to_string()))?
    } else {
        background.clone()
    };

    let reference = model
        .predict(&background)
        .map_err(|e| Error::Explainability(format!("background prediction failed: {e}")))?;
    #[allow(clippy::cast_precision_loss)]
    let base_value = reference.iter().sum::<f64>() / reference.len() as f64;

    let n_explained = samples.n_rows().min(config.max_samples).min(rows.len());
    if n_explained < samples.n_rows() {
        debug!(
            explained = n_explained,
            skipped = samples.n_rows() - n_explained,
            max_samples = config.max_samples,
            "attribution row cap reached"
        );
    }
    let values = (0..n_explained)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed ^ (rows[i] as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            explain_row(model, &background, samples.row(i), config.permutations, &mut rng)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Explanation {
        feature_names: feature_names.to_vec(),
        base_value,
        rows: rows[..n_explained].to_vec(),
        values,
        data: (0..n_explained).map(|i| samples.row(i).to_vec()).collect(),
    })
}

fn explain_row<M: Regressor>(
    model: &M,
    background: &Matrix,
    target: &[f64],
    permutations: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    let n_features = target.len();
    let mut phi = vec![0.0; n_features];
    let mut order: Vec<usize> = (0..n_features).collect();

    for _ in 0..permutations {
        order.shuffle(rng);
        let base = background.row(rng.gen_range(0..background.n_rows()));

        // Row k has the first k features of `order` taken from `target`
        let mut path = Matrix::zeros(n_features + 1, n_features)
            .map_err(|e| Error::Explainability(e.to_string()))?;
        let mut current = base.to_vec();
        for (k, slot) in std::iter::once(None).chain(order.iter().map(Some)).enumerate() {
            if let Some(&feature) = slot {
                current[feature] = target[feature];
            }
            for (j, value) in current.iter().enumerate() {
                path.set(k, j, *value);
            }
        }

        let predictions = model
            .predict(&path)
            .map_err(|e| Error::Explainability(format!("prediction failed: {e}")))?;
        for (k, &feature) in order.iter().enumerate() {
            phi[feature] += predictions[k + 1] - predictions[k];
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let scale = permutations as f64;
    let values: Vec<f64> = phi.into_iter().map(|v| v / scale).collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::Explainability(
            "non-finite attribution".to_string(),
        ));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;

    /// y = 2*x0 - 3*x1 + 1, exactly additive
    struct Linear;

    impl Regressor for Linear {
        fn fit_with(&mut self, _: &Matrix, _: &[f64], _: &CancellationToken) -> Result<()> {
            Ok(())
        }

        fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
            Ok(x.rows().map(|r| 2.0 * r[0] - 3.0 * r[1] + 1.0).collect())
        }
    }

    struct Broken;

    impl Regressor for Broken {
        fn fit_with(&mut self, _: &Matrix, _: &[f64], _: &CancellationToken) -> Result<()> {
            Ok(())
        }

        fn predict(&self, _: &Matrix) -> Result<Vec<f64>> {
            Err(Error::Computation("boom".to_string()))
        }
    }

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_linear_model_attributions_are_exact() {
        let background = Matrix::from_rows(&[vec![0.0, 0.0]]).unwrap();
        let samples = Matrix::from_rows(&[vec![1.0, 2.0], vec![-1.0, 0.5]]).unwrap();
        let config = ExplainConfig::default();

        let explanation =
            shapley_values(&Linear, &background, &samples, &[10, 11], &names(), &config, 42).unwrap();

        assert_eq!(explanation.rows, vec![10, 11]);
        assert!((explanation.base_value - 1.0).abs() < 1e-12);
        assert!((explanation.values[0][0] - 2.0).abs() < 1e-12);
        assert!((explanation.values[0][1] + 6.0).abs() < 1e-12);
        assert!((explanation.values[1][0] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_efficiency_with_single_background_row() {
        let background = Matrix::from_rows(&[vec![0.5, 0.5]]).unwrap();
        let samples = Matrix::from_rows(&[vec![3.0, -1.0]]).unwrap();
        let explanation = shapley_values(
            &Linear,
            &background,
            &samples,
            &[0],
            &names(),
            &ExplainConfig::default(),
            1,
        )
        .unwrap();
        let total: f64 = explanation.values[0].iter().sum();
        let prediction = 2.0 * 3.0 - 3.0 * -1.0 + 1.0;
        assert!((total - (prediction - explanation.base_value)).abs() < 1e-9);
    }

    #[test]
    fn test_max_samples_caps_rows() {
        let background = Matrix::from_rows(&[vec![0.0, 0.0]]).unwrap();
        let samples = Matrix::zeros(5, 2).unwrap();
        let config = ExplainConfig {
            max_samples: 2,
            ..ExplainConfig::default()
        };
        let explanation =
            shapley_values(&Linear, &background, &samples, &[0, 1, 2, 3, 4], &names(), &config, 0)
                .unwrap();
        assert_eq!(explanation.values.len(), 2);
        assert_eq!(explanation.mean_abs().len(), 2);
    }

    #[test]
    fn test_capped_explanation_lists_only_explained_rows() {
        let background = Matrix::from_rows(&[vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        let samples = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let config = ExplainConfig {
            max_samples: 2,
            ..ExplainConfig::default()
        };
        let explanation =
            shapley_values(&Linear, &background, &samples, &[7, 8, 9], &names(), &config, 0)
                .unwrap();
        assert_eq!(explanation.rows, vec![7, 8]);
        assert_eq!(explanation.data, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let uncapped = ExplainConfig {
            max_samples: 3,
            ..ExplainConfig::default()
        };
        let explanation =
            shapley_values(&Linear, &background, &samples, &[7, 8, 9], &names(), &uncapped, 0)
                .unwrap();
        assert_eq!(explanation.rows, vec![7, 8, 9]);
    }

    #[test]
    fn test_failures_are_explainability_errors() {
        let background = Matrix::from_rows(&[vec![0.0, 0.0]]).unwrap();
        let samples = Matrix::zeros(1, 2).unwrap();
        let config = ExplainConfig::default();

        let err = shapley_values(&Broken, &background, &samples, &[0], &names(), &config, 0)
            .unwrap_err();
        assert!(matches!(err, Error::Explainability(_)));

        let empty = Matrix::zeros(0, 2).unwrap();
        assert!(shapley_values(&Linear, &empty, &samples, &[0], &names(), &config, 0).is_err());
    }
}
