//! Search spaces over named dimensions.
//!
//! Samplers work in the unit cube; [`SearchSpace::decode`] maps a unit point to
//! concrete values and [`SearchSpace::params`] turns those into model
//! hyperparameters.

use crate::model::{ModelFamily, ModelParams, ParamValue};

/// Range of one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    /// Uniform integer in `[low, high]`.
    Int {
        /// Lower bound (inclusive)
        low: i64,
        /// Upper bound (inclusive)
        high: i64,
    },
    /// Uniform real in `[low, high]`.
    Real {
        /// Lower bound
        low: f64,
        /// Upper bound
        high: f64,
    },
    /// Log-uniform real in `[low, high]`, `low > 0`.
    LogReal {
        /// Lower bound
        low: f64,
        /// Upper bound
        high: f64,
    },
    /// One of a fixed set of numbers.
    Choice(Vec<f64>),
}

impl Domain {
    /// Map `u` in `[0, 1]` into this domain.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn decode(&self, u: f64) -> f64 {
        let u = u.clamp(0.0, 1.0);
        match self {
            Self::Int { low, high } => {
                let (low, high) = (i128::from(*low.min(high)), i128::from(*low.max(high)));
                let span = (high - low + 1) as f64;
                let offset = (u * span).floor() as i128;
                (low + offset).clamp(low, high) as f64
            }
            Self::Real { low, high } => low + u * (high - low),
            Self::LogReal { low, high } => {
                let (a, b) = (low.ln(), high.ln());
                (a + u * (b - a)).exp()
            }
            Self::Choice(choices) => {
                let index = ((u * choices.len() as f64).floor() as usize)
                    .min(choices.len().saturating_sub(1));
                choices.get(index).copied().unwrap_or(0.0)
            }
        }
    }

    const fn is_integer(&self) -> bool {
        matches!(self, Self::Int { .. })
    }
}

/// Ordered list of named dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSpace {
    dims: Vec<(String, Domain)>,
}

impl SearchSpace {
    /// Empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a dimension.
    #[must_use]
    pub fn add(mut self, name: &str, domain: Domain) -> Self {
        self.dims.push((name.to_string(), domain));
        self
    }

    /// Append an integer dimension.
    #[must_use]
    pub fn int(self, name: &str, low: i64, high: i64) -> Self {
        self.add(name, Domain::Int { low, high })
    }

    /// Append a log-uniform real dimension.
    #[must_use]
    pub fn log_real(self, name: &str, low: f64, high: f64) -> Self {
        self.add(name, Domain::LogReal { low, high })
    }

    /// Append a uniform real dimension.
    #[must_use]
    pub fn real(self, name: &str, low: f64, high: f64) -> Self {
        self.add(name, Domain::Real { low, high })
    }

    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    /// Whether the space has no dimensions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Dimension names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dims.iter().map(|(name, _)| name.as_str())
    }

    /// Drop dimensions whose name is a key of `pinned`.
    #[must_use]
    pub fn without(mut self, pinned: &ModelParams) -> Self {
        self.dims.retain(|(name, _)| !pinned.contains_key(name));
        self
    }

    /// Concrete values of a unit-cube point.
    #[must_use]
    pub fn decode(&self, unit: &[f64]) -> Vec<f64> {
        self.dims
            .iter()
            .zip(unit)
            .map(|((_, domain), u)| domain.decode(*u))
            .collect()
    }

    /// Hyperparameters for a unit-cube point.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn params(&self, unit: &[f64]) -> ModelParams {
        self.dims
            .iter()
            .zip(self.decode(unit))
            .map(|((name, domain), value)| {
                let value = if domain.is_integer() {
                    ParamValue::Int(value as i64)
                } else {
                    ParamValue::Float(value)
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Tuning space of `family`.
    #[must_use]
    pub fn for_family(family: ModelFamily) -> Self {
        let space = Self::new();
        match family {
            ModelFamily::CatBoost => space
                .int("iterations", 100, 1000)
                .log_real("learning_rate", 0.01, 0.3)
                .int("depth", 4, 10)
                .log_real("l2_leaf_reg", 1e-8, 10.0),
            ModelFamily::LightGbm => space
                .int("n_estimators", 100, 1000)
                .log_real("learning_rate", 0.01, 0.3)
                .int("max_depth", 3, 12)
                .int("num_leaves", 10, 100)
                .int("min_child_samples", 5, 50),
            ModelFamily::XgBoost => space
                .int("n_estimators", 100, 1000)
                .log_real("learning_rate", 0.01, 0.3)
                .int("max_depth", 3, 12)
                .int("min_child_weight", 1, 10)
                .real("subsample", 0.5, 1.0),
            ModelFamily::Mlp => space
                .int("hidden_layer_1", 50, 200)
                .int("hidden_layer_2", 20, 100)
                .log_real("learning_rate_init", 1e-4, 1e-2)
                .log_real("alpha", 1e-5, 1e-2),
            ModelFamily::RandomForest => space
                .int("n_estimators", 50, 300)
                .int("max_depth", 5, 20)
                .int("min_samples_split", 2, 20)
                .int("min_samples_leaf", 1, 10),
            ModelFamily::Gbr => space
                .int("n_estimators", 50, 300)
                .log_real("learning_rate", 0.01, 0.3)
                .int("max_depth", 3, 10)
                .int("min_samples_split", 2, 20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_covers_bounds() {
        let domain = Domain::Int { low: 3, high: 5 };
        assert!((domain.decode(0.0) - 3.0).abs() < f64::EPSILON);
        assert!((domain.decode(0.5) - 4.0).abs() < f64::EPSILON);
        assert!((domain.decode(1.0) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_int_extreme_bounds_stay_in_range() {
        let domain = Domain::Int { low: 0, high: i64::MAX };
        for u in [0.0, 0.5, 1.0] {
            let value = domain.decode(u);
            assert!((0.0..=i64::MAX as f64).contains(&value), "{u} -> {value}");
        }
        let full = Domain::Int { low: i64::MIN, high: i64::MAX };
        assert!((full.decode(0.0) - i64::MIN as f64).abs() < 1.0);
        assert!(full.decode(1.0) <= i64::MAX as f64);
    }

    #[test]
    fn test_int_reversed_bounds_are_ordered() {
        let domain = Domain::Int { low: 5, high: 3 };
        assert!((domain.decode(0.0) - 3.0).abs() < f64::EPSILON);
        assert!((domain.decode(1.0) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_log_real_endpoints() {
        let domain = Domain::LogReal { low: 0.01, high: 1.0 };
        assert!((domain.decode(0.0) - 0.01).abs() < 1e-12);
        assert!((domain.decode(0.5) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_choice() {
        let domain = Domain::Choice(vec![1.0, 2.0, 4.0]);
        assert!((domain.decode(0.99) - 4.0).abs() < f64::EPSILON);
        assert!((domain.decode(0.1) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_params_typed_by_domain() {
        let space = SearchSpace::for_family(ModelFamily::XgBoost);
        let params = space.params(&[0.0; 5]);
        assert_eq!(params["n_estimators"], ParamValue::Int(100));
        assert_eq!(params["subsample"], ParamValue::Float(0.5));
    }

    #[test]
    fn test_pinned_dimensions_removed() {
        let mut pinned = ModelParams::new();
        pinned.insert("n_estimators".into(), ParamValue::Int(10));
        let space = SearchSpace::for_family(ModelFamily::Gbr).without(&pinned);
        assert_eq!(space.len(), 3);
        assert!(space.names().all(|n| n != "n_estimators"));
    }

    #[test]
    fn test_every_family_has_a_space() {
        for family in ModelFamily::ALL {
            assert!(!SearchSpace::for_family(family).is_empty(), "{family}");
        }
    }
}
