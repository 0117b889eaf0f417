//! Run record - one submitted job and its lifecycle

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::JobRequest;
use crate::pipeline::RunResult;
use crate::{Error, Result};

/// Opaque run identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// String form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Operation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Hyperparameter search + grouped cross-validation
    Train,
    /// Apply stored models to new rows
    Predict,
    /// Search input parameters against stored models
    Optimize,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Train => "train",
            Self::Predict => "predict",
            Self::Optimize => "optimize",
        })
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Executing in the background.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped through its cancellation token.
    Cancelled,
}

impl RunState {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A submitted job.
///
/// Created `running`; moves to exactly one terminal state, after which it is
/// immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    id: RunId,
    kind: RunKind,
    state: RunState,
    submitted_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    request: JobRequest,
    result: Option<RunResult>,
    error: Option<String>,
    last_progress: Option<u8>,
}

impl Run {
    /// New running record for `request`.
    #[must_use]
    pub fn new(id: RunId, request: JobRequest) -> Self {
        Self {
            id,
            kind: request.kind(),
            state: RunState::Running,
            submitted_at: Utc::now(),
            finished_at: None,
            request,
            result: None,
            error: None,
            last_progress: None,
        }
    }

    /// Get the run ID.
    #[must_use]
    pub const fn id(&self) -> &RunId {
        &self.id
    }

    /// Get the run kind.
    #[must_use]
    pub const fn kind(&self) -> RunKind {
        self.kind
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Get the submission timestamp.
    #[must_use]
    pub const fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Get the end timestamp, once terminal.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Get the submitted request.
    #[must_use]
    pub const fn request(&self) -> &JobRequest {
        &self.request
    }

    /// Get the result of a completed run.
    #[must_use]
    pub const fn result(&self) -> Option<&RunResult> {
        self.result.as_ref()
    }

    /// Get the error text of a failed run.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Get the last reported percent.
    #[must_use]
    pub const fn last_progress(&self) -> Option<u8> {
        self.last_progress
    }

    /// Record the latest percent of a running run.
    pub fn record_progress(&mut self, percent: u8) {
        if !self.state.is_terminal() {
            self.last_progress = Some(self.last_progress.map_or(percent, |p| p.max(percent)));
        }
    }

    fn finish(&mut self, state: RunState) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::Computation(format!(
                "run {} is already {:?}",
                self.id, self.state
            )));
        }
        self.state = state;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Transition to `completed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is already terminal.
    pub fn complete(&mut self, result: RunResult) -> Result<()> {
        self.finish(RunState::Completed)?;
        self.last_progress = Some(100);
        self.result = Some(result);
        Ok(())
    }

    /// Transition to `failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.finish(RunState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Transition to `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is already terminal.
    pub fn cancel(&mut self) -> Result<()> {
        self.finish(RunState::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::request::{OptimizeRequest, PredictInput, PredictRequest};

    fn request() -> JobRequest {
        JobRequest::Predict(PredictRequest {
            source_run_id: "src".into(),
            features: vec!["x".into()],
            input: PredictInput::File { path: "in.csv".into() },
        })
    }

    #[test]
    fn test_run_ids_are_unique_uuids() {
        let a = RunId::new();
        assert_ne!(a, RunId::new());
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = Run::new(RunId::new(), request());
        assert_eq!(run.kind(), RunKind::Predict);
        assert_eq!(run.state(), RunState::Running);
        run.record_progress(40);
        run.record_progress(20);
        assert_eq!(run.last_progress(), Some(40));

        run.fail("boom").unwrap();
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(run.error(), Some("boom"));
        assert!(run.finished_at().is_some());
    }

    #[test]
    fn test_second_terminal_transition_rejected() {
        let mut run = Run::new(
            RunId::new(),
            JobRequest::Optimize(OptimizeRequest {
                source_run_id: "src".into(),
                parameters: vec![],
                targets: vec![],
                n_trials: None,
            }),
        );
        run.cancel().unwrap();
        assert!(run.fail("late").is_err());
        assert!(run.cancel().is_err());
        assert_eq!(run.state(), RunState::Cancelled);
        assert!(run.error().is_none());
    }
}
