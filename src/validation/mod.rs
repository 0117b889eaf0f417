//! Grouped cross-validation.
//!
//! Leave-one-group-out: every distinct group value is held out once, in order
//! of first appearance, and a fresh estimator trained on the remaining rows
//! predicts it. Each row therefore receives exactly one out-of-fold prediction.

pub mod metrics;

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::ExplainConfig;
use crate::explain::{shapley_values, Explanation};
use crate::model::{create, Estimator, Matrix, ModelFamily, ModelParams, Regressor};
use crate::{Error, Result};
use metrics::{rmse, RegressionMetrics};

/// One held-out group and the row indices on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFold {
    /// Held-out group value.
    pub group: String,
    /// Held-in rows.
    pub train: Vec<usize>,
    /// Held-out rows.
    pub test: Vec<usize>,
}

/// Split rows into leave-one-group-out folds, in first-appearance order.
#[must_use]
pub fn leave_one_group_out(groups: &[String]) -> Vec<GroupFold> {
    let mut order: Vec<&str> = Vec::new();
    let mut members: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    for (row, group) in groups.iter().enumerate() {
        members
            .entry(group.as_str())
            .or_insert_with(|| {
                order.push(group.as_str());
                Vec::new()
            })
            .push(row);
    }

    order
        .into_iter()
        .map(|group| {
            let train = groups
                .iter()
                .enumerate()
                .filter(|(_, g)| g.as_str() != group)
                .map(|(i, _)| i)
                .collect();
            GroupFold {
                group: group.to_string(),
                train,
                test: members.remove(group).unwrap_or_default(),
            }
        })
        .collect()
}

/// Generate `cv1..cvN` labels, tiled over `n_rows` and shuffled with `seed`.
///
/// ```rust
/// use trueno_ml::validation::auto_groups;
///
/// let groups = auto_groups(12, 5, 42);
/// assert_eq!(groups.len(), 12);
/// assert_eq!(groups.iter().filter(|g| *g == "cv1").count(), 3);
/// ```
#[must_use]
pub fn auto_groups(n_rows: usize, n_folds: usize, seed: u64) -> Vec<String> {
    let n_folds = n_folds.max(1);
    let mut groups: Vec<String> = (0..n_rows)
        .map(|i| format!("cv{}", i % n_folds + 1))
        .collect();
    groups.shuffle(&mut StdRng::seed_from_u64(seed));
    groups
}

/// Out-of-fold results for one target.
#[derive(Debug, Clone)]
pub struct CvOutcome {
    /// One prediction per input row.
    pub predictions: Vec<f64>,
    /// Attributions keyed by held-out group; failed folds are absent.
    pub explanations: BTreeMap<String, Explanation>,
    /// Estimator refit on every row.
    pub final_model: Estimator,
    /// Metrics over the out-of-fold predictions.
    pub metrics: RegressionMetrics,
}

/// Grouped cross-validation over one feature matrix and target.
#[derive(Debug, Clone)]
pub struct CrossValidator<'a> {
    x: &'a Matrix,
    y: &'a [f64],
    folds: Vec<GroupFold>,
    explain: Option<(&'a [String], &'a ExplainConfig)>,
    seed: u64,
}

impl<'a> CrossValidator<'a> {
    /// Prepare folds for `groups`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if the inputs disagree in length or fewer
    /// than two distinct groups exist.
    pub fn new(x: &'a Matrix, y: &'a [f64], groups: &[String]) -> Result<Self> {
        if x.n_rows() != y.len() || y.len() != groups.len() {
            return Err(Error::Computation(format!(
                "rows ({}), targets ({}) and groups ({}) differ",
                x.n_rows(),
                y.len(),
                groups.len()
            )));
        }
        let folds = leave_one_group_out(groups);
        if folds.len() < 2 {
            return Err(Error::Computation(format!(
                "grouped cross-validation needs at least 2 groups, found {}",
                folds.len()
            )));
        }
        Ok(Self {
            x,
            y,
            folds,
            explain: None,
            seed: crate::config::DEFAULT_SEED,
        })
    }

    /// Compute per-fold attributions for the held-out rows.
    #[must_use]
    pub const fn with_explanations(
        mut self,
        feature_names: &'a [String],
        config: &'a ExplainConfig,
        seed: u64,
    ) -> Self {
        self.explain = Some((feature_names, config));
        self.seed = seed;
        self
    }

    /// The folds, in evaluation order.
    #[must_use]
    pub fn folds(&self) -> &[GroupFold] {
        &self.folds
    }

    fn fit_fold(
        &self,
        fold: &GroupFold,
        family: ModelFamily,
        params: &ModelParams,
        cancel: &CancellationToken,
    ) -> Result<(Estimator, Vec<f64>)> {
        let train_y: Vec<f64> = fold.train.iter().map(|&i| self.y[i]).collect();
        let mut model = create(family, params)?;
        model.fit_with(&self.x.select_rows(&fold.train)?, &train_y, cancel)?;
        let predictions = model.predict(&self.x.select_rows(&fold.test)?)?;
        Ok((model, predictions))
    }

    /// Mean per-fold RMSE, folds evaluated in parallel.
    ///
    /// # Errors
    ///
    /// Propagates the first fold failure; a non-finite mean is an
    /// [`Error::Computation`].
    pub fn mean_fold_rmse(
        &self,
        family: ModelFamily,
        params: &ModelParams,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        let scores = self
            .folds
            .par_iter()
            .map(|fold| {
                let (_, predictions) = self.fit_fold(fold, family, params, cancel)?;
                let truth: Vec<f64> = fold.test.iter().map(|&i| self.y[i]).collect();
                Ok(rmse(&truth, &predictions))
            })
            .collect::<Result<Vec<f64>>>()?;
        #[allow(clippy::cast_precision_loss)]
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        if mean.is_finite() {
            Ok(mean)
        } else {
            Err(Error::Computation("fold RMSE is not finite".to_string()))
        }
    }

    /// Run every fold sequentially, then refit on all rows.
    ///
    /// `on_fold(done, total)` is called after each fold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` trips, or the first fitting or
    /// prediction failure. Attribution failures are logged and skipped.
    pub fn run(
        &self,
        family: ModelFamily,
        params: &ModelParams,
        cancel: &CancellationToken,
        mut on_fold: impl FnMut(usize, usize),
    ) -> Result<CvOutcome> {
        let mut predictions = vec![0.0; self.y.len()];
        let mut explanations = BTreeMap::new();

        for (index, fold) in self.folds.iter().enumerate() {
            cancel.check()?;
            let (model, fold_predictions) = self.fit_fold(fold, family, params, cancel)?;
            for (&row, prediction) in fold.test.iter().zip(&fold_predictions) {
                predictions[row] = *prediction;
            }
            debug!(fold = %fold.group, held_out = fold.test.len(), "fold complete");

            if let Some((names, config)) = self.explain {
                let outcome = shapley_values(
                    &model,
                    &self.x.select_rows(&fold.train)?,
                    &self.x.select_rows(&fold.test)?,
                    &fold.test,
                    names,
                    config,
                    self.seed.wrapping_add(index as u64),
                );
                match outcome {
                    Ok(explanation) => {
                        explanations.insert(fold.group.clone(), explanation);
                    }
                    Err(e) => warn!(fold = %fold.group, error = %e, "skipping fold attributions"),
                }
            }
            on_fold(index + 1, self.folds.len());
        }

        cancel.check()?;
        let mut final_model = create(family, params)?;
        final_model.fit_with(self.x, self.y, cancel)?;

        Ok(CvOutcome {
            metrics: RegressionMetrics::compute(self.y, &predictions),
            predictions,
            explanations,
            final_model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamValue;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn dataset() -> (Matrix, Vec<f64>, Vec<String>) {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![f64::from(i), f64::from(i % 3)])
            .collect();
        let y = rows.iter().map(|r| 2.0 * r[0] + r[1]).collect();
        let groups = (0..30).map(|i| format!("g{}", i % 3)).collect();
        (Matrix::from_rows(&rows).unwrap(), y, groups)
    }

    fn small_gbr() -> ModelParams {
        let mut params = ModelParams::new();
        params.insert("n_estimators".into(), ParamValue::Int(20));
        params
    }

    #[test]
    fn test_logo_first_appearance_order() {
        let folds = leave_one_group_out(&labels(&["b", "a", "b", "c", "a"]));
        let names: Vec<&str> = folds.iter().map(|f| f.group.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(folds[0].test, vec![0, 2]);
        assert_eq!(folds[0].train, vec![1, 3, 4]);
        assert_eq!(folds[2].test, vec![3]);
    }

    #[test]
    fn test_auto_groups_balanced_and_deterministic() {
        let groups = auto_groups(23, 5, 42);
        assert_eq!(groups, auto_groups(23, 5, 42));
        let counts: Vec<usize> = (1..=5)
            .map(|k| groups.iter().filter(|g| **g == format!("cv{k}")).count())
            .collect();
        assert_eq!(counts, vec![5, 5, 5, 4, 4]);
    }

    #[test]
    fn test_single_group_is_rejected() {
        let (x, y, _) = dataset();
        let groups = vec!["only".to_string(); 30];
        let err = CrossValidator::new(&x, &y, &groups).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_run_predicts_every_row_and_reports_progress() {
        let (x, y, groups) = dataset();
        let cv = CrossValidator::new(&x, &y, &groups).unwrap();
        let mut ticks = Vec::new();
        let outcome = cv
            .run(
                ModelFamily::Gbr,
                &small_gbr(),
                &CancellationToken::new(),
                |done, total| ticks.push((done, total)),
            )
            .unwrap();

        assert_eq!(outcome.predictions.len(), 30);
        assert_eq!(ticks, vec![(1, 3), (2, 3), (3, 3)]);
        assert!(outcome.explanations.is_empty());
        assert!(outcome.metrics.rmse.is_finite());
        assert_eq!(outcome.final_model.predict(&x).unwrap().len(), 30);
    }

    #[test]
    fn test_run_with_explanations_keys_by_group() {
        let (x, y, groups) = dataset();
        let names = labels(&["a", "b"]);
        let config = ExplainConfig {
            permutations: 2,
            max_samples: 3,
            ..ExplainConfig::default()
        };
        let outcome = CrossValidator::new(&x, &y, &groups)
            .unwrap()
            .with_explanations(&names, &config, 42)
            .run(ModelFamily::Gbr, &small_gbr(), &CancellationToken::new(), |_, _| {})
            .unwrap();

        let keys: Vec<&String> = outcome.explanations.keys().collect();
        assert_eq!(keys, vec!["g0", "g1", "g2"]);
        assert!(outcome.explanations.values().all(|e| e.values.len() == 3));
    }

    #[test]
    fn test_mean_fold_rmse_matches_sequential_run() {
        let (x, y, groups) = dataset();
        let cv = CrossValidator::new(&x, &y, &groups).unwrap();
        let token = CancellationToken::new();
        let outcome = cv.run(ModelFamily::Gbr, &small_gbr(), &token, |_, _| {}).unwrap();

        let expected: f64 = cv
            .folds()
            .iter()
            .map(|f| {
                let truth: Vec<f64> = f.test.iter().map(|&i| y[i]).collect();
                let pred: Vec<f64> = f.test.iter().map(|&i| outcome.predictions[i]).collect();
                rmse(&truth, &pred)
            })
            .sum::<f64>()
            / 3.0;
        let mean = cv.mean_fold_rmse(ModelFamily::Gbr, &small_gbr(), &token).unwrap();
        assert!((mean - expected).abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_run() {
        let (x, y, groups) = dataset();
        let token = CancellationToken::new();
        token.cancel();
        let err = CrossValidator::new(&x, &y, &groups)
            .unwrap()
            .run(ModelFamily::Gbr, &small_gbr(), &token, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
