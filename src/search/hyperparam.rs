//! Hyperparameter search: TPE over a family's space, scored by mean
//! leave-one-group-out RMSE.

use tracing::{debug, info, warn};

use super::pareto::Direction;
use super::space::SearchSpace;
use super::tpe::TpeSampler;
use crate::cancel::CancellationToken;
use crate::model::{ModelFamily, ModelParams, ParamValue};
use crate::validation::CrossValidator;
use crate::{Error, Result};

/// Result of a successful search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Tuned values, pinned values and the seed; merge over the family defaults.
    pub best_params: ModelParams,
    /// Mean fold RMSE of `best_params`.
    pub best_score: f64,
    /// Trials attempted, successful or not.
    pub n_trials: usize,
    /// Trials that failed and were skipped.
    pub n_failed: usize,
}

/// TPE search for one family.
#[derive(Debug, Clone)]
pub struct HyperparameterSearch {
    family: ModelFamily,
    n_trials: usize,
    seed: u64,
    pinned: ModelParams,
}

impl HyperparameterSearch {
    /// Search `family` with `n_trials` evaluations.
    #[must_use]
    pub fn new(family: ModelFamily, n_trials: usize) -> Self {
        Self {
            family,
            n_trials,
            seed: crate::config::DEFAULT_SEED,
            pinned: ModelParams::new(),
        }
    }

    /// Sampler seed, also assigned to every candidate model.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fix parameters; they are removed from the searched space.
    #[must_use]
    pub fn pinned(mut self, pinned: ModelParams) -> Self {
        self.pinned = pinned;
        self
    }

    /// Trials [`HyperparameterSearch::run`] will attempt: one when every
    /// parameter is pinned.
    #[must_use]
    pub fn planned_trials(&self) -> usize {
        self.planned_for(&self.space())
    }

    fn space(&self) -> SearchSpace {
        SearchSpace::for_family(self.family).without(&self.pinned)
    }

    fn planned_for(&self, space: &SearchSpace) -> usize {
        if space.is_empty() {
            1
        } else {
            self.n_trials.max(1)
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn candidate(&self, space: &SearchSpace, point: &[f64]) -> ModelParams {
        let mut params = self.pinned.clone();
        params.extend(space.params(point));
        params
            .entry(self.family.seed_key().to_string())
            .or_insert(ParamValue::Int(self.seed as i64));
        params
    }

    /// Run the search.
    ///
    /// `on_trial(done, total)` is called after every trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when `cancel` trips and
    /// [`Error::Computation`] when no trial succeeds.
    pub fn run(
        &self,
        cv: &CrossValidator<'_>,
        cancel: &CancellationToken,
        mut on_trial: impl FnMut(usize, usize),
    ) -> Result<SearchOutcome> {
        let space = self.space();
        let n_trials = self.planned_for(&space);
        let mut sampler = TpeSampler::new(vec![Direction::Minimize], self.seed);
        let mut best: Option<(ModelParams, f64)> = None;
        let mut n_failed = 0;

        for trial in 0..n_trials {
            cancel.check()?;
            let point = sampler.suggest(space.len());
            let params = self.candidate(&space, &point);
            match cv.mean_fold_rmse(self.family, &params, cancel) {
                Ok(score) => {
                    debug!(trial, score, "trial complete");
                    let improved = match &best {
                        Some((_, best_score)) => score < *best_score,
                        None => true,
                    };
                    if improved {
                        best = Some((params, score));
                    }
                    sampler.observe(point, vec![score]);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(trial, error = %e, "trial failed");
                    n_failed += 1;
                }
            }
            on_trial(trial + 1, n_trials);
        }

        let (best_params, best_score) = best.ok_or_else(|| {
            Error::Computation(format!(
                "hyperparameter search for {} failed: all {n_trials} trials failed",
                self.family
            ))
        })?;
        info!(family = %self.family, best_score, n_trials, n_failed, "search complete");
        Ok(SearchOutcome {
            best_params,
            best_score,
            n_trials,
            n_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Matrix;

    fn dataset() -> (Matrix, Vec<f64>, Vec<String>) {
        let rows: Vec<Vec<f64>> = (0..24).map(|i| vec![f64::from(i)]).collect();
        let y = rows.iter().map(|r| r[0] * 0.5).collect();
        let groups = (0..24).map(|i| format!("g{}", i % 3)).collect();
        (Matrix::from_rows(&rows).unwrap(), y, groups)
    }

    fn pinned(n: i64) -> ModelParams {
        let mut p = ModelParams::new();
        p.insert("n_estimators".into(), ParamValue::Int(n));
        p
    }

    #[test]
    fn test_search_returns_best_of_trials() {
        let (x, y, groups) = dataset();
        let cv = CrossValidator::new(&x, &y, &groups).unwrap();
        let mut ticks = 0;
        let outcome = HyperparameterSearch::new(ModelFamily::Gbr, 4)
            .pinned(pinned(10))
            .run(&cv, &CancellationToken::new(), |_, _| ticks += 1)
            .unwrap();

        assert_eq!(outcome.n_trials, 4);
        assert_eq!(ticks, 4);
        assert_eq!(outcome.n_failed, 0);
        assert_eq!(outcome.best_params["n_estimators"], ParamValue::Int(10));
        assert_eq!(outcome.best_params["random_state"], ParamValue::Int(42));
        assert!(outcome.best_params.contains_key("learning_rate"));
        assert!(outcome.best_score.is_finite());
    }

    #[test]
    fn test_all_failing_trials_is_error() {
        let (x, y, groups) = dataset();
        let cv = CrossValidator::new(&x, &y, &groups).unwrap();
        let mut bad = pinned(5);
        bad.insert("learning_rate".into(), ParamValue::Float(-1.0));
        let err = HyperparameterSearch::new(ModelFamily::Gbr, 2)
            .pinned(bad)
            .run(&cv, &CancellationToken::new(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_planned_trials() {
        assert_eq!(HyperparameterSearch::new(ModelFamily::Gbr, 0).planned_trials(), 1);
        assert_eq!(HyperparameterSearch::new(ModelFamily::Gbr, 6).planned_trials(), 6);

        let mut all = ModelParams::new();
        for name in SearchSpace::for_family(ModelFamily::Gbr).names() {
            all.insert(name.to_string(), ParamValue::Float(0.1));
        }
        let fixed = HyperparameterSearch::new(ModelFamily::Gbr, 6).pinned(all);
        assert_eq!(fixed.planned_trials(), 1);
    }

    #[test]
    fn test_cancel_aborts() {
        let (x, y, groups) = dataset();
        let cv = CrossValidator::new(&x, &y, &groups).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = HyperparameterSearch::new(ModelFamily::Gbr, 3)
            .run(&cv, &token, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
