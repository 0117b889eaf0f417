//! Parameter-space optimization against fitted models.
//!
//! Each trial samples one value per [`ParameterConfig`], assembles a single
//! feature row, predicts every scored target with its paired model and turns
//! the predictions into objective scores. Studies with more than one scored
//! target report the Pareto-optimal trials instead of a single best.
//!
//! ```rust
//! use trueno_ml::optimize::{ParameterConfig, ParameterKind, TargetConfig, TargetMode};
//!
//! let parameter: ParameterConfig =
//!     serde_json::from_str(r#"{"name": "temp", "kind": "integer", "low": 800, "high": 1000}"#)?;
//! assert_eq!(parameter.kind, ParameterKind::Integer { low: 800, high: 1000 });
//!
//! let target: TargetConfig =
//!     serde_json::from_str(r#"{"name": "hardness", "mode": "target", "target_value": 60.0}"#)?;
//! assert_eq!(target.mode, TargetMode::Target);
//! assert!((target.score(58.5) - 1.5).abs() < 1e-12);
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::model::{Matrix, Regressor};
use crate::search::pareto::pareto_front;
use crate::search::{Direction, Domain, SearchSpace, TpeSampler};
use crate::storage::{Table, TableBuilder};
use crate::{Error, Result};

/// Sampling rule of one input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParameterKind {
    /// Uniform integer in `[low, high]`
    Integer {
        /// Lower bound (inclusive)
        low: i64,
        /// Upper bound (inclusive)
        high: i64,
    },
    /// Uniform real in `[low, high]`
    Real {
        /// Lower bound
        low: f64,
        /// Upper bound
        high: f64,
    },
    /// One of a fixed set of values
    Categorical {
        /// Candidate values
        choices: Vec<f64>,
    },
}

/// One optimized input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// Feature name fed to the models.
    pub name: String,
    /// Sampling rule.
    #[serde(flatten)]
    pub kind: ParameterKind,
}

impl ParameterConfig {
    /// Check bounds and choices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty name, `low > high`,
    /// non-finite bounds or an empty choice set.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("parameter name is empty".to_string()));
        }
        let valid = match &self.kind {
            ParameterKind::Integer { low, high } => low <= high,
            ParameterKind::Real { low, high } => low.is_finite() && high.is_finite() && low <= high,
            ParameterKind::Categorical { choices } => {
                !choices.is_empty() && choices.iter().all(|c| c.is_finite())
            }
        };
        if valid {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "parameter '{}': invalid range or choices {:?}",
                self.name, self.kind
            )))
        }
    }

    fn domain(&self) -> Domain {
        match &self.kind {
            ParameterKind::Integer { low, high } => Domain::Int {
                low: *low,
                high: *high,
            },
            ParameterKind::Real { low, high } => Domain::Real {
                low: *low,
                high: *high,
            },
            ParameterKind::Categorical { choices } => Domain::Choice(choices.clone()),
        }
    }
}

/// Objective applied to a target's prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// Maximize the prediction
    Maximize,
    /// Minimize the prediction
    Minimize,
    /// Minimize the distance to `target_value`
    Target,
}

/// One scored model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target column name.
    pub name: String,
    /// Objective.
    pub mode: TargetMode,
    /// Required for [`TargetMode::Target`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
}

impl TargetConfig {
    /// Check that `target_value` is present exactly for target mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] otherwise.
    pub fn validate(&self) -> Result<()> {
        match (self.mode, self.target_value) {
            (TargetMode::Target, Some(v)) if v.is_finite() => Ok(()),
            (TargetMode::Target, _) => Err(Error::Validation(format!(
                "target '{}': mode 'target' requires a finite target_value",
                self.name
            ))),
            (_, Some(_)) => Err(Error::Validation(format!(
                "target '{}': target_value is only valid with mode 'target'",
                self.name
            ))),
            (_, None) => Ok(()),
        }
    }

    /// Score a prediction.
    #[must_use]
    pub fn score(&self, prediction: f64) -> f64 {
        match (self.mode, self.target_value) {
            (TargetMode::Target, Some(target)) => (prediction - target).abs(),
            _ => prediction,
        }
    }

    /// Optimization direction of the score.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self.mode {
            TargetMode::Maximize => Direction::Maximize,
            TargetMode::Minimize | TargetMode::Target => Direction::Minimize,
        }
    }
}

/// One evaluated parameter assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTrial {
    /// Zero-based trial index.
    pub trial_number: usize,
    /// Sampled value per parameter name.
    pub parameters: BTreeMap<String, f64>,
    /// Objective score per scored target.
    pub scores: Vec<f64>,
    /// Raw prediction per scored target.
    pub predictions: Vec<f64>,
}

/// Best outcome of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BestTrials {
    /// Single objective: best parameters and score.
    Single {
        /// Parameters of the best trial
        params: BTreeMap<String, f64>,
        /// Its score
        score: f64,
    },
    /// Multiple objectives: Pareto-optimal trials in trial order.
    Pareto {
        /// Capped Pareto set
        trials: Vec<ParetoTrial>,
    },
}

/// One member of the Pareto set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoTrial {
    /// Trial index
    pub trial_number: usize,
    /// Parameter values
    pub params: BTreeMap<String, f64>,
    /// Score per objective
    pub scores: Vec<f64>,
}

/// A finished study.
#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    /// Every trial, in order.
    pub trials: Vec<OptimizationTrial>,
    /// Direction per scored target.
    pub directions: Vec<Direction>,
    /// Parameter names, in configuration order.
    pub parameter_names: Vec<String>,
}

impl Study {
    /// Number of scored objectives.
    #[must_use]
    pub fn n_objectives(&self) -> usize {
        self.directions.len()
    }

    /// Best trial (single objective) or the first `pareto_cap` Pareto trials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if the study has no trials.
    pub fn best(&self, pareto_cap: usize) -> Result<BestTrials> {
        if self.trials.is_empty() {
            return Err(Error::Computation("study has no trials".to_string()));
        }
        if let [direction] = self.directions.as_slice() {
            let best = self
                .trials
                .iter()
                .min_by(|a, b| {
                    direction
                        .oriented(a.scores[0])
                        .total_cmp(&direction.oriented(b.scores[0]))
                })
                .ok_or_else(|| Error::Computation("study has no trials".to_string()))?;
            return Ok(BestTrials::Single {
                params: best.parameters.clone(),
                score: best.scores[0],
            });
        }

        let scores: Vec<Vec<f64>> = self.trials.iter().map(|t| t.scores.clone()).collect();
        let trials = pareto_front(&scores, &self.directions)
            .into_iter()
            .take(pareto_cap)
            .map(|i| ParetoTrial {
                trial_number: self.trials[i].trial_number,
                params: self.trials[i].parameters.clone(),
                scores: self.trials[i].scores.clone(),
            })
            .collect();
        Ok(BestTrials::Pareto { trials })
    }

    /// Full history: `number`, `params_<name>...`, `values_<i>...`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be assembled.
    #[allow(clippy::cast_precision_loss)]
    pub fn history_table(&self) -> Result<Table> {
        let mut builder = TableBuilder::new().float_column(
            "number",
            self.trials.iter().map(|t| t.trial_number as f64).collect(),
        );
        for name in &self.parameter_names {
            builder = builder.float_column(
                &format!("params_{name}"),
                self.trials
                    .iter()
                    .map(|t| t.parameters.get(name).copied().unwrap_or(f64::NAN))
                    .collect(),
            );
        }
        for objective in 0..self.n_objectives() {
            builder = builder.float_column(
                &format!("values_{objective}"),
                self.trials.iter().map(|t| t.scores[objective]).collect(),
            );
        }
        builder.build()
    }
}

/// Optimization over a parameter space against fitted models.
#[derive(Debug, Clone)]
pub struct ParameterStudy<'a> {
    parameters: &'a [ParameterConfig],
    targets: &'a [TargetConfig],
    feature_order: Option<&'a [String]>,
    n_trials: usize,
    seed: u64,
}

impl<'a> ParameterStudy<'a> {
    /// Study over `parameters`, scoring `targets`.
    #[must_use]
    pub const fn new(parameters: &'a [ParameterConfig], targets: &'a [TargetConfig]) -> Self {
        Self {
            parameters,
            targets,
            feature_order: None,
            n_trials: 100,
            seed: crate::config::DEFAULT_SEED,
        }
    }

    /// Trial budget.
    #[must_use]
    pub const fn n_trials(mut self, n_trials: usize) -> Self {
        self.n_trials = n_trials;
        self
    }

    /// Sampler seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Column order the models were trained with.
    #[must_use]
    pub const fn feature_order(mut self, names: &'a [String]) -> Self {
        self.feature_order = Some(names);
        self
    }

    /// Index into the sampled values for every model input column.
    fn column_map(&self) -> Result<Vec<usize>> {
        let Some(order) = self.feature_order else {
            return Ok((0..self.parameters.len()).collect());
        };
        order
            .iter()
            .map(|feature| {
                self.parameters
                    .iter()
                    .position(|p| &p.name == feature)
                    .ok_or_else(|| {
                        Error::Computation(format!(
                            "model input '{feature}' has no parameter configuration"
                        ))
                    })
            })
            .collect()
    }

    /// Run the study.
    ///
    /// `on_trial(done, total)` is called after every trial. When more targets
    /// than models are configured only the first `models.len()` are scored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for bad configurations,
    /// [`Error::Computation`] if there is nothing to score or a prediction
    /// fails, and [`Error::Cancelled`] when `cancel` trips.
    pub fn run<M: Regressor>(
        &self,
        models: &[M],
        cancel: &CancellationToken,
        mut on_trial: impl FnMut(usize, usize),
    ) -> Result<Study> {
        for parameter in self.parameters {
            parameter.validate()?;
        }
        for target in self.targets {
            target.validate()?;
        }
        if models.len() != self.targets.len() {
            warn!(
                models = models.len(),
                targets = self.targets.len(),
                "model count differs from target count"
            );
        }
        let scored = &self.targets[..self.targets.len().min(models.len())];
        if scored.is_empty() || self.parameters.is_empty() {
            return Err(Error::Computation(
                "optimization needs at least one parameter, target and model".to_string(),
            ));
        }

        let columns = self.column_map()?;
        let space = self
            .parameters
            .iter()
            .fold(SearchSpace::new(), |space, p| space.add(&p.name, p.domain()));
        let directions: Vec<Direction> = scored.iter().map(TargetConfig::direction).collect();
        let mut sampler = TpeSampler::new(directions.clone(), self.seed);
        let mut trials = Vec::with_capacity(self.n_trials);

        for trial_number in 0..self.n_trials {
            cancel.check()?;
            let point = sampler.suggest(space.len());
            let values = space.decode(&point);
            let row: Vec<f64> = columns.iter().map(|&i| values[i]).collect();
            let x = Matrix::new(1, row.len(), row)?;

            let mut predictions = Vec::with_capacity(scored.len());
            for model in &models[..scored.len()] {
                let prediction = model.predict(&x)?.first().copied().ok_or_else(|| {
                    Error::Computation("model returned no prediction".to_string())
                })?;
                predictions.push(prediction);
            }
            let scores: Vec<f64> = scored
                .iter()
                .zip(&predictions)
                .map(|(target, p)| target.score(*p))
                .collect();
            if scores.iter().any(|s| !s.is_finite()) {
                return Err(Error::Computation(format!(
                    "trial {trial_number} produced a non-finite score"
                )));
            }
            debug!(trial = trial_number, ?scores, "trial complete");

            sampler.observe(point, scores.clone());
            trials.push(OptimizationTrial {
                trial_number,
                parameters: self
                    .parameters
                    .iter()
                    .map(|p| p.name.clone())
                    .zip(values)
                    .collect(),
                scores,
                predictions,
            });
            on_trial(trial_number + 1, self.n_trials);
        }

        info!(trials = trials.len(), objectives = directions.len(), "study complete");
        Ok(Study {
            trials,
            directions,
            parameter_names: self.parameters.iter().map(|p| p.name.clone()).collect(),
        })
    }
}
