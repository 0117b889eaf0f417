//! Error types for trueno-ml
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Only [`Error::Validation`] is surfaced synchronously to the submitter; every
//! other variant is recorded on the failing run and emitted as a terminal event.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-ml error types
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before any execution started
    #[error("Validation error: {0}")]
    Validation(String),

    /// No model artifact resolvable for a source run
    #[error("Model not found for run '{0}'\nTrain a model first or check the source run identifier.")]
    ModelNotFound(String),

    /// Dataset or artifact missing, unreadable or undecodable
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Failure while fitting, searching or scoring
    #[error("Computation error: {0}")]
    Computation(String),

    /// Feature attribution failed (recovered locally by callers)
    #[error("Explainability failure: {0}")]
    Explainability(String),

    /// Run was cancelled through its cancellation token
    #[error("Run cancelled")]
    Cancelled,

    /// Run identifier unknown to both the registry and the durable store
    #[error("Run '{0}' not found")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<aprender::error::AprenderError> for Error {
    fn from(err: aprender::error::AprenderError) -> Self {
        Self::Computation(err.to_string())
    }
}

impl Error {
    /// Whether this error is a synchronous submission rejection.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
