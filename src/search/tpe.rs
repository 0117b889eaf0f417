//! Tree-structured Parzen Estimator sampler over the unit cube.
//!
//! Each coordinate is drawn by its own one-dimensional
//! [`aprender::automl::TPE`], rebuilt from the full history on every
//! suggestion (an independent, univariate TPE). Observations are scored
//! higher-is-better before they reach `aprender`:
//!
//! - one objective: the negated, minimize-oriented score
//! - several objectives: the negated non-domination rank
//!
//! # References
//!
//! Bergstra et al. (2011). Algorithms for Hyper-Parameter Optimization. `NeurIPS`.

use std::collections::HashMap;
use std::fmt;

use aprender::automl::params::ParamKey;
use aprender::automl::{SearchSpace as AxisSpace, SearchStrategy, Trial, TrialResult, TPE};

use super::pareto::{non_dominated_ranks, Direction};

/// TPE settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TpeConfig {
    /// Quantile of observations treated as good (default: 0.25)
    pub gamma: f32,
    /// Uniform suggestions before the model is used (default: 10)
    pub n_startup_trials: usize,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            gamma: 0.25,
            n_startup_trials: 10,
        }
    }
}

/// Key of the single `[0, 1]` axis each per-coordinate TPE models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Axis {
    Unit,
}

impl ParamKey for Axis {
    fn name(&self) -> &'static str {
        "unit"
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone)]
struct Observation {
    point: Vec<f64>,
    scores: Vec<f64>,
}

/// Sequential sampler over the unit cube.
#[derive(Debug, Clone)]
pub struct TpeSampler {
    config: TpeConfig,
    directions: Vec<Direction>,
    history: Vec<Observation>,
    seed: u64,
    n_suggested: u64,
}

impl TpeSampler {
    /// Sampler for objectives with the given directions.
    #[must_use]
    pub fn new(directions: Vec<Direction>, seed: u64) -> Self {
        Self {
            config: TpeConfig::default(),
            directions,
            history: Vec::new(),
            seed,
            n_suggested: 0,
        }
    }

    /// Replace the settings.
    #[must_use]
    pub fn with_config(mut self, config: TpeConfig) -> Self {
        self.config = config;
        self
    }

    /// Observations recorded so far.
    #[must_use]
    pub fn n_observations(&self) -> usize {
        self.history.len()
    }

    /// Record the scores of an evaluated point.
    pub fn observe(&mut self, point: Vec<f64>, scores: Vec<f64>) {
        self.history.push(Observation { point, scores });
    }

    /// Next point to evaluate, in `[0, 1]^n_dims`.
    pub fn suggest(&mut self, n_dims: usize) -> Vec<f64> {
        if n_dims == 0 {
            return Vec::new();
        }
        let scores = self.fitness();
        let space = AxisSpace::new().add_continuous(Axis::Unit, 0.0, 1.0);
        let step = self.n_suggested;
        self.n_suggested += 1;

        (0..n_dims)
            .map(|dim| {
                let mut tpe = TPE::new(1)
                    .with_seed(self.axis_seed(step, dim))
                    .with_gamma(self.config.gamma)
                    .with_startup_trials(self.config.n_startup_trials.max(2));
                let results: Vec<TrialResult<Axis>> = self
                    .history
                    .iter()
                    .zip(&scores)
                    .filter_map(|(observation, &score)| {
                        let u = *observation.point.get(dim)?;
                        Some(TrialResult {
                            trial: Trial {
                                values: HashMap::from([(Axis::Unit, u.into())]),
                            },
                            score,
                            metrics: HashMap::new(),
                        })
                    })
                    .collect();
                tpe.update(&results);
                tpe.suggest(&space, 1)
                    .first()
                    .and_then(|trial| trial.get_f64(&Axis::Unit))
                    .map_or(0.5, |u| u.clamp(0.0, 1.0))
            })
            .collect()
    }

    /// Seed for one coordinate of one suggestion.
    #[allow(clippy::cast_possible_truncation)]
    fn axis_seed(&self, step: u64, dim: usize) -> u64 {
        self.seed
            .wrapping_add(step.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .wrapping_add((dim as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9))
            | 1
    }

    /// Higher-is-better score per observation.
    #[allow(clippy::cast_precision_loss)]
    fn fitness(&self) -> Vec<f64> {
        if self.directions.len() > 1 {
            let scores: Vec<Vec<f64>> = self.history.iter().map(|o| o.scores.clone()).collect();
            non_dominated_ranks(&scores, &self.directions)
                .into_iter()
                .map(|rank| -(rank as f64))
                .collect()
        } else {
            let direction = self.directions.first().copied().unwrap_or(Direction::Minimize);
            self.history
                .iter()
                .map(|o| {
                    o.scores
                        .first()
                        .map(|s| -direction.oriented(*s))
                        .filter(|s| s.is_finite())
                        .unwrap_or(f64::MIN)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_is_uniform_and_seeded() {
        let mut a = TpeSampler::new(vec![Direction::Minimize], 42);
        let mut b = TpeSampler::new(vec![Direction::Minimize], 42);
        for _ in 0..5 {
            let point = a.suggest(3);
            assert_eq!(point, b.suggest(3));
            assert!(point.iter().all(|u| (0.0..=1.0).contains(u)));
        }
    }

    #[test]
    fn test_successive_suggestions_differ() {
        let mut sampler = TpeSampler::new(vec![Direction::Minimize], 3);
        let first = sampler.suggest(2);
        let second = sampler.suggest(2);
        assert_ne!(first, second);
    }

    #[test]
    fn test_model_phase_concentrates_near_optimum() {
        // Minimize (x - 0.8)^2
        let mut sampler = TpeSampler::new(vec![Direction::Minimize], 7);
        for _ in 0..60 {
            let point = sampler.suggest(1);
            let score = (point[0] - 0.8).powi(2);
            sampler.observe(point, vec![score]);
        }
        let late: Vec<f64> = (0..10).map(|_| sampler.suggest(1)[0]).collect();
        let close = late.iter().filter(|x| (*x - 0.8).abs() < 0.25).count();
        assert!(close >= 6, "late suggestions: {late:?}");
    }

    #[test]
    fn test_maximize_flips_fitness() {
        let mut sampler = TpeSampler::new(vec![Direction::Maximize], 1);
        sampler.observe(vec![0.1], vec![1.0]);
        sampler.observe(vec![0.9], vec![5.0]);
        let fitness = sampler.fitness();
        assert!(fitness[1] > fitness[0]);
    }

    #[test]
    fn test_multi_objective_fitness_uses_ranks() {
        let mut sampler = TpeSampler::new(vec![Direction::Minimize, Direction::Minimize], 1);
        sampler.observe(vec![0.2], vec![1.0, 1.0]);
        sampler.observe(vec![0.5], vec![2.0, 2.0]);
        sampler.observe(vec![0.8], vec![0.5, 3.0]);
        assert_eq!(sampler.fitness(), vec![0.0, -1.0, 0.0]);
        for _ in 0..12 {
            let point = sampler.suggest(1);
            assert!((0.0..=1.0).contains(&point[0]));
            sampler.observe(point.clone(), vec![point[0], 1.0 - point[0]]);
        }
        assert_eq!(sampler.n_observations(), 15);
    }

    #[test]
    fn test_non_finite_score_ranks_last() {
        let mut sampler = TpeSampler::new(vec![Direction::Minimize], 1);
        sampler.observe(vec![0.3], vec![f64::NAN]);
        sampler.observe(vec![0.6], vec![10.0]);
        let fitness = sampler.fitness();
        assert!(fitness[0] < fitness[1]);
    }

    #[test]
    fn test_empty_space() {
        let mut sampler = TpeSampler::new(vec![Direction::Minimize], 0);
        assert!(sampler.suggest(0).is_empty());
    }
}
