//! Service configuration.
//!
//! Built with a consuming builder (same shape as `Database::builder()`), or
//! read from the environment with [`ServiceConfig::from_env`].
//!
//! ```rust
//! use trueno_ml::config::{SearchFailurePolicy, ServiceConfig};
//!
//! let config = ServiceConfig::builder()
//!     .dataset_root("/tmp/datasets")
//!     .results_root("/tmp/results")
//!     .train_trials(10)
//!     .search_failure_policy(SearchFailurePolicy::Abort)
//!     .build()?;
//! assert_eq!(config.train_trials, 10);
//! # Ok::<(), trueno_ml::Error>(())
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default dataset directory (relative to the working directory).
pub const DEFAULT_DATASET_PATH: &str = "./data/datasets";
/// Default result/artifact directory.
pub const DEFAULT_RESULT_PATH: &str = "./data/results";
/// Seed used by every sampler and by estimator defaults.
pub const DEFAULT_SEED: u64 = 42;

/// What training does when hyperparameter search fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchFailurePolicy {
    /// Continue with the family's default hyperparameters.
    #[default]
    FallbackToDefaults,
    /// Fail the training run.
    Abort,
}

/// Feature attribution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Compute attributions at all.
    pub enabled: bool,
    /// Sampled feature permutations per explained row.
    pub permutations: usize,
    /// Background rows drawn from the reference set.
    pub max_background: usize,
    /// Rows explained per fold / prediction batch. Rows beyond the cap keep
    /// their predictions but get no attributions; the cut is logged at debug.
    pub max_samples: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            permutations: 8,
            max_background: 64,
            max_samples: 200,
        }
    }
}

/// Configuration shared by the registry and the run pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory datasets are resolved against.
    pub dataset_root: PathBuf,
    /// Directory holding one namespace per run.
    pub results_root: PathBuf,
    /// Hyperparameter search budget for training.
    pub train_trials: usize,
    /// Default trial budget for parameter optimization.
    pub optimize_trials: usize,
    /// Number of generated groups when no group column is usable.
    pub auto_group_folds: usize,
    /// Seed for samplers and generated groups.
    pub seed: u64,
    /// Capacity of the run event broadcast channel.
    pub event_capacity: usize,
    /// Behaviour when the hyperparameter search fails.
    pub search_failure_policy: SearchFailurePolicy,
    /// Feature attribution settings.
    pub explain: ExplainConfig,
    /// Maximum Pareto trials reported by multi-objective optimization.
    pub pareto_cap: usize,
    /// Maximum trials included in an optimization result payload.
    pub history_cap: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from(DEFAULT_DATASET_PATH),
            results_root: PathBuf::from(DEFAULT_RESULT_PATH),
            train_trials: 30,
            optimize_trials: 100,
            auto_group_folds: 5,
            seed: DEFAULT_SEED,
            event_capacity: 1024,
            search_failure_policy: SearchFailurePolicy::default(),
            explain: ExplainConfig::default(),
            pareto_cap: 5,
            history_cap: 20,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Read configuration from `ML_DATASET_PATH`, `ML_RESULT_PATH`,
    /// `ML_TRAIN_TRIALS` and `ML_OPTIMIZE_TRIALS`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a numeric variable does not parse or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Ok(path) = std::env::var("ML_DATASET_PATH") {
            builder = builder.dataset_root(path);
        }
        if let Ok(path) = std::env::var("ML_RESULT_PATH") {
            builder = builder.results_root(path);
        }
        if let Some(trials) = env_usize("ML_TRAIN_TRIALS")? {
            builder = builder.train_trials(trials);
        }
        if let Some(trials) = env_usize("ML_OPTIMIZE_TRIALS")? {
            builder = builder.optimize_trials(trials);
        }
        builder.build()
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.train_trials == 0 || self.optimize_trials == 0 {
            return Err(Error::Validation(
                "trial budgets must be greater than 0".to_string(),
            ));
        }
        if self.auto_group_folds < 2 {
            return Err(Error::Validation(format!(
                "auto_group_folds must be at least 2 (got {})",
                self.auto_group_folds
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Validation(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.pareto_cap == 0 {
            return Err(Error::Validation(
                "pareto_cap must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Validation(format!("{key}='{raw}' is not a count: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Set the dataset directory.
    #[must_use]
    pub fn dataset_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dataset_root = path.into();
        self
    }

    /// Set the results directory.
    #[must_use]
    pub fn results_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.results_root = path.into();
        self
    }

    /// Set the hyperparameter search budget.
    #[must_use]
    pub const fn train_trials(mut self, trials: usize) -> Self {
        self.config.train_trials = trials;
        self
    }

    /// Set the default optimization budget.
    #[must_use]
    pub const fn optimize_trials(mut self, trials: usize) -> Self {
        self.config.optimize_trials = trials;
        self
    }

    /// Set the number of generated CV groups.
    #[must_use]
    pub const fn auto_group_folds(mut self, folds: usize) -> Self {
        self.config.auto_group_folds = folds;
        self
    }

    /// Set the sampler seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Set the search failure policy.
    #[must_use]
    pub const fn search_failure_policy(mut self, policy: SearchFailurePolicy) -> Self {
        self.config.search_failure_policy = policy;
        self
    }

    /// Replace the attribution settings.
    #[must_use]
    pub fn explain(mut self, explain: ExplainConfig) -> Self {
        self.config.explain = explain;
        self
    }

    /// Disable feature attributions.
    #[must_use]
    pub const fn without_explanations(mut self) -> Self {
        self.config.explain.enabled = false;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if an invariant is violated.
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
