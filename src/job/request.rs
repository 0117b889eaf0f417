//! Job requests accepted by the registry.
//!
//! Requests are JSON objects tagged by `kind`:
//!
//! ```json
//! {"kind": "train", "dataset_id": "steel", "features": ["temp", "time"],
//!  "targets": ["hardness"], "model_family": "xgboost", "group_column": "lot"}
//! {"kind": "predict", "source_run_id": "…", "features": ["temp", "time"],
//!  "input": [{"temp": 850, "time": 1.5}]}
//! {"kind": "optimize", "source_run_id": "…",
//!  "parameters": [{"name": "temp", "kind": "integer", "low": 800, "high": 1000}],
//!  "targets": [{"name": "hardness", "mode": "maximize"}]}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::run::RunKind;
use crate::model::{create, ModelFamily, ModelParams};
use crate::optimize::{ParameterConfig, TargetConfig};
use crate::{Error, Result};

/// A job to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobRequest {
    /// Fit models with hyperparameter search and grouped cross-validation.
    Train(TrainRequest),
    /// Apply a training run's models.
    Predict(PredictRequest),
    /// Search inputs against a training run's models.
    Optimize(OptimizeRequest),
}

/// Train request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    /// Dataset file under the dataset root (`.csv` appended without extension).
    pub dataset_id: String,
    /// Feature columns.
    pub features: Vec<String>,
    /// Target columns; one model per target.
    pub targets: Vec<String>,
    /// Estimator family; unknown names fall back to `gbr`.
    #[serde(default = "default_family")]
    pub model_family: ModelFamily,
    /// Column holding cross-validation groups; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_column: Option<String>,
    /// Search budget; the service default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_trials: Option<usize>,
    /// Fixed hyperparameters, excluded from the search.
    #[serde(default, skip_serializing_if = "ModelParams::is_empty")]
    pub model_params: ModelParams,
}

const fn default_family() -> ModelFamily {
    ModelFamily::Gbr
}

/// Rows to predict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictInput {
    /// A dataset file.
    File {
        /// Path of a CSV or Parquet file
        path: PathBuf,
    },
    /// Inline records.
    Rows(Vec<Map<String, Value>>),
}

/// Predict request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Training run whose models are applied.
    pub source_run_id: String,
    /// Input columns, in model order.
    pub features: Vec<String>,
    /// Rows to predict.
    pub input: PredictInput,
}

/// Optimize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    /// Training run whose models are scored.
    pub source_run_id: String,
    /// Search space.
    pub parameters: Vec<ParameterConfig>,
    /// One objective per model, in model order.
    pub targets: Vec<TargetConfig>,
    /// Trial budget; the service default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_trials: Option<usize>,
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("'{field}' is required")))
    } else {
        Ok(())
    }
}

fn require_columns(field: &str, columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Err(Error::Validation(format!("'{field}' must not be empty")));
    }
    if let Some(blank) = columns.iter().position(|c| c.trim().is_empty()) {
        return Err(Error::Validation(format!("'{field}[{blank}]' is empty")));
    }
    Ok(())
}

impl JobRequest {
    /// Parse a JSON request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed JSON or missing fields.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Validation(format!("malformed request: {e}")))
    }

    /// Kind of run this request creates.
    #[must_use]
    pub const fn kind(&self) -> RunKind {
        match self {
            Self::Train(_) => RunKind::Train,
            Self::Predict(_) => RunKind::Predict,
            Self::Optimize(_) => RunKind::Optimize,
        }
    }

    /// Field-level checks that need no data access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty required fields, a zero trial
    /// budget, pinned model parameters of the wrong type or invalid
    /// parameter/target configurations.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Train(req) => {
                require_non_empty("dataset_id", &req.dataset_id)?;
                require_columns("features", &req.features)?;
                require_columns("targets", &req.targets)?;
                if req.n_trials == Some(0) {
                    return Err(Error::Validation("'n_trials' must be positive".to_string()));
                }
                create(req.model_family, &req.model_params).map(|_| ())
            }
            Self::Predict(req) => {
                require_non_empty("source_run_id", &req.source_run_id)?;
                require_columns("features", &req.features)?;
                match &req.input {
                    PredictInput::Rows(rows) if rows.is_empty() => {
                        Err(Error::Validation("'input' has no records".to_string()))
                    }
                    PredictInput::File { path } if path.as_os_str().is_empty() => {
                        Err(Error::Validation("'input.path' is empty".to_string()))
                    }
                    _ => Ok(()),
                }
            }
            Self::Optimize(req) => {
                require_non_empty("source_run_id", &req.source_run_id)?;
                if req.parameters.is_empty() {
                    return Err(Error::Validation("'parameters' must not be empty".to_string()));
                }
                if req.targets.is_empty() {
                    return Err(Error::Validation("'targets' must not be empty".to_string()));
                }
                if req.n_trials == Some(0) {
                    return Err(Error::Validation("'n_trials' must be positive".to_string()));
                }
                for parameter in &req.parameters {
                    parameter.validate()?;
                }
                for target in &req.targets {
                    target.validate()?;
                }
                Ok(())
            }
        }
    }
}
