//! Kind-specific run bodies.
//!
//! Each pipeline is synchronous and CPU-bound; the registry runs it on the
//! blocking pool with a [`RunContext`] carrying the run's cancellation token
//! and progress reporter.

mod optimize;
mod predict;
mod train;

pub use optimize::OptimizeSummary;
pub use predict::PredictSummary;
pub use train::{TargetSummary, TrainSummary, AUTO_GROUP_COLUMN};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactStore;
use crate::cancel::CancellationToken;
use crate::config::ServiceConfig;
use crate::job::{JobRequest, ProgressReporter, RunId};
use crate::storage::Table;
use crate::Result;

/// Structured result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunResult {
    /// Training metrics and artifact location
    Train(TrainSummary),
    /// Predictions
    Predict(PredictSummary),
    /// Best parameters or Pareto set
    Optimize(OptimizeSummary),
}

/// Everything a pipeline needs besides its request.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run being executed.
    pub run_id: RunId,
    /// Service settings.
    pub config: Arc<ServiceConfig>,
    /// Artifact namespace root.
    pub artifacts: ArtifactStore,
    /// Cancellation flag of this run.
    pub cancel: CancellationToken,
    /// Progress channel of this run.
    pub progress: ProgressReporter,
}

/// Run `request` to completion.
///
/// `prepared` is a table already loaded and validated at submission, if any.
///
/// # Errors
///
/// Propagates the pipeline's failure; [`crate::Error::Cancelled`] when the
/// token trips.
pub fn execute(request: &JobRequest, prepared: Option<Table>, ctx: &RunContext) -> Result<RunResult> {
    match request {
        JobRequest::Train(req) => train::run(req, prepared, ctx).map(RunResult::Train),
        JobRequest::Predict(req) => predict::run(req, prepared, ctx).map(RunResult::Predict),
        JobRequest::Optimize(req) => optimize::run(req, ctx).map(RunResult::Optimize),
    }
}
