//! Model Factory: regression estimator families and their defaults.
//!
//! | family     | estimator                                              |
//! |------------|--------------------------------------------------------|
//! | `catboost` | boosting, oblivious trees, `l2_leaf_reg`               |
//! | `lightgbm` | boosting, leaf-wise trees, `num_leaves`                |
//! | `xgboost`  | boosting, depth-wise trees, λ = 1, subsample           |
//! | `gbr`      | least-squares boosting of CART trees                   |
//! | `rf`       | bagged `aprender` CART regression trees                |
//! | `mlp`      | ReLU network behind `aprender`'s `StandardScaler`      |
//!
//! The boosting families share the second-order tree learner in [`tree`],
//! which supports oblivious and leaf-wise growth.
//!
//! Unknown family names fall back to `gbr`.
//!
//! ```rust
//! use trueno_ml::model::{create, Matrix, ModelFamily, ModelParams, ParamValue, Regressor};
//!
//! let mut params = ModelParams::new();
//! params.insert("n_estimators".into(), ParamValue::Int(20));
//! let mut model = create(ModelFamily::from_name("rf"), &params)?;
//!
//! let x = Matrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0], vec![4.0]])?;
//! model.fit(&x, &[1.0, 2.0, 3.0, 4.0])?;
//! assert_eq!(model.predict(&x)?.len(), 4);
//! # Ok::<(), trueno_ml::Error>(())
//! ```

mod boosting;
mod forest;
mod matrix;
mod mlp;
pub mod tree;

pub use boosting::{BoostingConfig, GradientBoostingRegressor};
pub use forest::{ForestConfig, RandomForestRegressor};
pub use matrix::Matrix;
pub use mlp::{MlpConfig, MlpRegressor};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::{Error, Result};
use tree::{Growth, TreeParams};

/// One hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Real value
    Float(f64),
    /// String value
    Text(String),
    /// Integer list (layer sizes)
    List(Vec<i64>),
}

impl ParamValue {
    /// Numeric view (integers widen).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view (integral floats narrow).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::List(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Named hyperparameters, ordered by name.
pub type ModelParams = BTreeMap<String, ParamValue>;

/// Estimator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelFamily {
    /// Oblivious-tree boosting
    CatBoost,
    /// Leaf-wise boosting
    LightGbm,
    /// Depth-wise regularized boosting
    XgBoost,
    /// Random forest
    RandomForest,
    /// Least-squares gradient boosting (the fallback family)
    Gbr,
    /// Multi-layer perceptron
    Mlp,
}

impl ModelFamily {
    /// All families.
    pub const ALL: [Self; 6] = [
        Self::CatBoost,
        Self::LightGbm,
        Self::XgBoost,
        Self::RandomForest,
        Self::Gbr,
        Self::Mlp,
    ];

    /// Parse a family name; unknown names map to [`ModelFamily::Gbr`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "catboost" => Self::CatBoost,
            "lightgbm" => Self::LightGbm,
            "xgboost" => Self::XgBoost,
            "rf" => Self::RandomForest,
            "mlp" => Self::Mlp,
            _ => Self::Gbr,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CatBoost => "catboost",
            Self::LightGbm => "lightgbm",
            Self::XgBoost => "xgboost",
            Self::RandomForest => "rf",
            Self::Gbr => "gbr",
            Self::Mlp => "mlp",
        }
    }

    /// Key holding the seed in this family's parameter set.
    #[must_use]
    pub const fn seed_key(self) -> &'static str {
        match self {
            Self::CatBoost => "random_seed",
            _ => "random_state",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for ModelFamily {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ModelFamily> for String {
    fn from(family: ModelFamily) -> Self {
        family.name().to_string()
    }
}

fn params(entries: &[(&str, ParamValue)]) -> ModelParams {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Default hyperparameters for `family` (seed fixed to 42).
#[must_use]
pub fn defaults(family: ModelFamily) -> ModelParams {
    use ParamValue::{Float, Int, List};
    match family {
        ModelFamily::CatBoost => params(&[
            ("iterations", Int(500)),
            ("learning_rate", Float(0.1)),
            ("depth", Int(6)),
            ("l2_leaf_reg", Float(3.0)),
            ("random_seed", Int(42)),
        ]),
        ModelFamily::LightGbm => params(&[
            ("n_estimators", Int(500)),
            ("learning_rate", Float(0.1)),
            ("max_depth", Int(6)),
            ("num_leaves", Int(31)),
            ("min_child_samples", Int(20)),
            ("random_state", Int(42)),
        ]),
        ModelFamily::XgBoost => params(&[
            ("n_estimators", Int(500)),
            ("learning_rate", Float(0.1)),
            ("max_depth", Int(6)),
            ("min_child_weight", Int(1)),
            ("subsample", Float(1.0)),
            ("random_state", Int(42)),
        ]),
        ModelFamily::RandomForest => params(&[
            ("n_estimators", Int(100)),
            ("max_depth", Int(10)),
            ("min_samples_split", Int(2)),
            ("min_samples_leaf", Int(1)),
            ("random_state", Int(42)),
        ]),
        ModelFamily::Gbr => params(&[
            ("n_estimators", Int(100)),
            ("learning_rate", Float(0.1)),
            ("max_depth", Int(5)),
            ("min_samples_split", Int(2)),
            ("random_state", Int(42)),
        ]),
        ModelFamily::Mlp => params(&[
            ("hidden_layer_sizes", List(vec![100, 50])),
            ("max_iter", Int(1000)),
            ("learning_rate_init", Float(1e-3)),
            ("alpha", Float(1e-4)),
            ("random_state", Int(42)),
        ]),
    }
}

/// Defaults merged with `overrides` (overrides win).
#[must_use]
pub fn merged_params(family: ModelFamily, overrides: &ModelParams) -> ModelParams {
    let mut merged = defaults(family);
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

struct ParamReader<'a> {
    family: ModelFamily,
    params: &'a ModelParams,
}

impl ParamReader<'_> {
    fn value(&self, key: &str) -> Result<&ParamValue> {
        self.params.get(key).ok_or_else(|| {
            Error::Validation(format!("{}: missing parameter '{key}'", self.family))
        })
    }

    fn mismatch(&self, key: &str, expected: &str, value: &ParamValue) -> Error {
        Error::Validation(format!(
            "{}: parameter '{key}' expects {expected}, got {value}",
            self.family
        ))
    }

    fn float(&self, key: &str) -> Result<f64> {
        let value = self.value(key)?;
        value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.mismatch(key, "a number", value))
    }

    fn float_or(&self, key: &str, default: f64) -> Result<f64> {
        if self.params.contains_key(key) {
            self.float(key)
        } else {
            Ok(default)
        }
    }

    fn count(&self, key: &str) -> Result<usize> {
        let value = self.value(key)?;
        value
            .as_i64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| self.mismatch(key, "a non-negative integer", value))
    }

    fn count_or(&self, key: &str, default: usize) -> Result<usize> {
        if self.params.contains_key(key) {
            self.count(key)
        } else {
            Ok(default)
        }
    }

    /// Depth limit; zero or negative means unbounded.
    fn depth(&self, key: &str) -> Result<Option<usize>> {
        let value = self.value(key)?;
        let depth = value
            .as_i64()
            .ok_or_else(|| self.mismatch(key, "an integer", value))?;
        Ok(usize::try_from(depth).ok().filter(|d| *d > 0))
    }

    fn seed(&self) -> Result<u64> {
        let key = self.family.seed_key();
        if !self.params.contains_key(key) {
            return Ok(crate::config::DEFAULT_SEED);
        }
        let value = self.value(key)?;
        value
            .as_i64()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| self.mismatch(key, "a non-negative integer", value))
    }

    fn hidden_layers(&self) -> Result<Vec<usize>> {
        if self.params.contains_key("hidden_layer_1") {
            let mut layers = vec![self.count("hidden_layer_1")?];
            if self.params.contains_key("hidden_layer_2") {
                layers.push(self.count("hidden_layer_2")?);
            }
            return Ok(layers);
        }
        let value = self.value("hidden_layer_sizes")?;
        let sizes = match value {
            ParamValue::List(sizes) => sizes.clone(),
            ParamValue::Int(size) => vec![*size],
            other => return Err(self.mismatch("hidden_layer_sizes", "a list of sizes", other)),
        };
        sizes
            .iter()
            .map(|&s| usize::try_from(s).ok().filter(|s| *s > 0))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.mismatch("hidden_layer_sizes", "positive layer sizes", value))
    }
}

/// Build an unfitted estimator for `family` from its defaults merged with
/// `overrides`.
///
/// # Errors
///
/// Returns [`Error::Validation`] if an override has the wrong type.
pub fn create(family: ModelFamily, overrides: &ModelParams) -> Result<Estimator> {
    let merged = merged_params(family, overrides);
    let reader = ParamReader {
        family,
        params: &merged,
    };
    let seed = reader.seed()?;

    let estimator = match family {
        ModelFamily::CatBoost => Estimator::Boosting(GradientBoostingRegressor::new(BoostingConfig {
            n_estimators: reader.count("iterations")?,
            learning_rate: reader.float("learning_rate")?,
            subsample: 1.0,
            tree: TreeParams {
                growth: Growth::Oblivious,
                max_depth: reader.depth("depth")?,
                lambda: reader.float("l2_leaf_reg")?,
                ..TreeParams::default()
            },
            seed,
        })),
        ModelFamily::LightGbm => Estimator::Boosting(GradientBoostingRegressor::new(BoostingConfig {
            n_estimators: reader.count("n_estimators")?,
            learning_rate: reader.float("learning_rate")?,
            subsample: reader.float_or("subsample", 1.0)?,
            tree: TreeParams {
                growth: Growth::LeafWise {
                    max_leaves: reader.count("num_leaves")?.max(2),
                },
                max_depth: reader.depth("max_depth")?,
                min_samples_leaf: reader.count("min_child_samples")?,
                min_child_weight: reader.float_or("min_child_weight", 1e-3)?,
                lambda: reader.float_or("reg_lambda", 0.0)?,
                ..TreeParams::default()
            },
            seed,
        })),
        ModelFamily::XgBoost => Estimator::Boosting(GradientBoostingRegressor::new(BoostingConfig {
            n_estimators: reader.count("n_estimators")?,
            learning_rate: reader.float("learning_rate")?,
            subsample: reader.float("subsample")?,
            tree: TreeParams {
                growth: Growth::DepthWise,
                max_depth: reader.depth("max_depth")?,
                min_child_weight: reader.float("min_child_weight")?,
                lambda: reader.float_or("reg_lambda", 1.0)?,
                min_gain: reader.float_or("gamma", 0.0)?,
                ..TreeParams::default()
            },
            seed,
        })),
        ModelFamily::Gbr => Estimator::Boosting(GradientBoostingRegressor::new(BoostingConfig {
            n_estimators: reader.count("n_estimators")?,
            learning_rate: reader.float("learning_rate")?,
            subsample: reader.float_or("subsample", 1.0)?,
            tree: TreeParams {
                growth: Growth::DepthWise,
                max_depth: reader.depth("max_depth")?,
                min_samples_split: reader.count("min_samples_split")?,
                min_samples_leaf: reader.count_or("min_samples_leaf", 1)?,
                ..TreeParams::default()
            },
            seed,
        })),
        ModelFamily::RandomForest => Estimator::Forest(RandomForestRegressor::new(ForestConfig {
            n_estimators: reader.count("n_estimators")?,
            max_depth: reader.depth("max_depth")?,
            min_samples_split: reader.count("min_samples_split")?,
            min_samples_leaf: reader.count("min_samples_leaf")?,
            seed,
        })),
        ModelFamily::Mlp => Estimator::Mlp(MlpRegressor::new(MlpConfig {
            hidden_layer_sizes: reader.hidden_layers()?,
            max_iter: reader.count("max_iter")?,
            learning_rate_init: reader.float("learning_rate_init")?,
            alpha: reader.float("alpha")?,
            seed,
            ..MlpConfig::default()
        })),
    };
    Ok(estimator)
}

/// Capability shared by every estimator.
pub trait Regressor {
    /// Fit, checking `cancel` at iteration boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] for unusable data and
    /// [`Error::Cancelled`] when the token trips.
    fn fit_with(&mut self, x: &Matrix, y: &[f64], cancel: &CancellationToken) -> Result<()>;

    /// Fit without cancellation.
    ///
    /// # Errors
    ///
    /// See [`Regressor::fit_with`].
    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<()> {
        self.fit_with(x, y, &CancellationToken::new())
    }

    /// Predict one value per row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if the model is unfitted or the feature
    /// count differs from training.
    fn predict(&self, x: &Matrix) -> Result<Vec<f64>>;
}

/// A constructed estimator of any family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "estimator", rename_all = "snake_case")]
pub enum Estimator {
    /// Gradient boosting (catboost, lightgbm, xgboost, gbr)
    Boosting(GradientBoostingRegressor),
    /// Random forest
    Forest(RandomForestRegressor),
    /// Neural network
    Mlp(MlpRegressor),
}

impl Regressor for Estimator {
    fn fit_with(&mut self, x: &Matrix, y: &[f64], cancel: &CancellationToken) -> Result<()> {
        match self {
            Self::Boosting(m) => m.fit_with(x, y, cancel),
            Self::Forest(m) => m.fit_with(x, y, cancel),
            Self::Mlp(m) => m.fit_with(x, y, cancel),
        }
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        match self {
            Self::Boosting(m) => m.predict(x),
            Self::Forest(m) => m.predict(x),
            Self::Mlp(m) => m.predict(x),
        }
    }
}

pub(crate) fn check_training_data(x: &Matrix, y: &[f64]) -> Result<()> {
    if x.n_rows() == 0 {
        return Err(Error::Computation("cannot fit with 0 samples".to_string()));
    }
    if x.n_rows() != y.len() {
        return Err(Error::Computation(format!(
            "feature rows ({}) and targets ({}) differ",
            x.n_rows(),
            y.len()
        )));
    }
    if y.iter().any(|v| !v.is_finite()) || x.rows().flatten().any(|v| !v.is_finite()) {
        return Err(Error::Computation(
            "training data contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_prediction_data(x: &Matrix, n_features: Option<usize>) -> Result<()> {
    let expected =
        n_features.ok_or_else(|| Error::Computation("model is not fitted".to_string()))?;
    if x.n_cols() != expected {
        return Err(Error::Computation(format!(
            "model expects {expected} features, got {}",
            x.n_cols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(family: ModelFamily) -> ModelParams {
        let mut p = ModelParams::new();
        match family {
            ModelFamily::CatBoost => {
                p.insert("iterations".into(), ParamValue::Int(10));
            }
            ModelFamily::Mlp => {
                p.insert("hidden_layer_sizes".into(), ParamValue::List(vec![4]));
                p.insert("max_iter".into(), ParamValue::Int(5));
            }
            _ => {
                p.insert("n_estimators".into(), ParamValue::Int(10));
            }
        }
        p
    }

    #[test]
    fn test_family_from_name() {
        assert_eq!(ModelFamily::from_name("CatBoost"), ModelFamily::CatBoost);
        assert_eq!(ModelFamily::from_name("rf"), ModelFamily::RandomForest);
        assert_eq!(ModelFamily::from_name("svm"), ModelFamily::Gbr);
        for family in ModelFamily::ALL {
            assert_eq!(ModelFamily::from_name(family.name()), family);
        }
    }

    #[test]
    fn test_family_serde_falls_back_to_gbr() {
        let family: ModelFamily = serde_json::from_str("\"unheard_of\"").unwrap();
        assert_eq!(family, ModelFamily::Gbr);
        assert_eq!(serde_json::to_string(&ModelFamily::Mlp).unwrap(), "\"mlp\"");
    }

    #[test]
    fn test_defaults_fix_seed() {
        for family in ModelFamily::ALL {
            let params = defaults(family);
            assert_eq!(params.get(family.seed_key()), Some(&ParamValue::Int(42)));
        }
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = ModelParams::new();
        overrides.insert("max_depth".into(), ParamValue::Int(3));
        let merged = merged_params(ModelFamily::Gbr, &overrides);
        assert_eq!(merged["max_depth"], ParamValue::Int(3));
        assert_eq!(merged["n_estimators"], ParamValue::Int(100));
    }

    #[test]
    fn test_create_maps_family_to_estimator() {
        match create(ModelFamily::CatBoost, &ModelParams::new()).unwrap() {
            Estimator::Boosting(m) => {
                assert_eq!(m.config().n_estimators, 500);
                assert_eq!(m.config().tree.growth, Growth::Oblivious);
                assert!((m.config().tree.lambda - 3.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected {other:?}"),
        }
        match create(ModelFamily::RandomForest, &ModelParams::new()).unwrap() {
            Estimator::Forest(m) => {
                assert_eq!(m.config().n_estimators, 100);
                assert_eq!(m.config().max_depth, Some(10));
                assert_eq!(m.config().min_samples_leaf, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match create(ModelFamily::Mlp, &ModelParams::new()).unwrap() {
            Estimator::Mlp(m) => assert_eq!(m.config().hidden_layer_sizes, vec![100, 50]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mlp_search_keys_build_layers() {
        let mut overrides = ModelParams::new();
        overrides.insert("hidden_layer_1".into(), ParamValue::Int(64));
        overrides.insert("hidden_layer_2".into(), ParamValue::Int(32));
        match create(ModelFamily::Mlp, &overrides).unwrap() {
            Estimator::Mlp(m) => assert_eq!(m.config().hidden_layer_sizes, vec![64, 32]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch_is_validation_error() {
        let mut overrides = ModelParams::new();
        overrides.insert("n_estimators".into(), ParamValue::Text("many".into()));
        assert!(matches!(
            create(ModelFamily::XgBoost, &overrides),
            Err(Error::Validation(_))
        ));

        let mut overrides = ModelParams::new();
        overrides.insert("max_depth".into(), ParamValue::Float(2.5));
        assert!(create(ModelFamily::Gbr, &overrides).is_err());
    }

    #[test]
    fn test_param_value_untagged_json() {
        let parsed: ModelParams =
            serde_json::from_str(r#"{"a": 3, "b": 0.5, "c": [10, 5], "d": "x", "e": true}"#)
                .unwrap();
        assert_eq!(parsed["a"], ParamValue::Int(3));
        assert_eq!(parsed["b"], ParamValue::Float(0.5));
        assert_eq!(parsed["c"], ParamValue::List(vec![10, 5]));
        assert_eq!(parsed["d"], ParamValue::Text("x".into()));
        assert_eq!(parsed["e"], ParamValue::Bool(true));
    }

    #[test]
    fn test_every_family_fits_and_roundtrips() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![f64::from(i), f64::from(i % 3)]).collect();
        let x = Matrix::from_rows(&rows).unwrap();
        let y: Vec<f64> = rows.iter().map(|r| r[0] * 0.5 + r[1]).collect();

        for family in ModelFamily::ALL {
            let mut model = create(family, &small(family)).unwrap();
            model.fit(&x, &y).unwrap();
            let predictions = model.predict(&x).unwrap();
            assert_eq!(predictions.len(), 30, "{family}");
            assert!(predictions.iter().all(|p| p.is_finite()), "{family}");

            let json = serde_json::to_string(&model).unwrap();
            let restored: Estimator = serde_json::from_str(&json).unwrap();
            assert_eq!(restored.predict(&x).unwrap(), predictions, "{family}");
        }
    }

    #[test]
    fn test_non_finite_training_data_rejected() {
        let x = Matrix::from_rows(&[vec![1.0], vec![f64::NAN]]).unwrap();
        let mut model = create(ModelFamily::Gbr, &small(ModelFamily::Gbr)).unwrap();
        assert!(matches!(
            model.fit(&x, &[1.0, 2.0]),
            Err(Error::Computation(_))
        ));
    }
}
