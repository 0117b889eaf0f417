//! Parameter optimization against a training run's models.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::RunContext;
use crate::job::OptimizeRequest;
use crate::optimize::{BestTrials, OptimizationTrial, ParameterStudy};
use crate::Result;

const RESULT_FILE: &str = "optimization_result.csv";

/// Result of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeSummary {
    /// Best parameters (one objective) or the Pareto set (several).
    pub best: BestTrials,
    /// Trials run.
    pub n_trials: usize,
    /// Objectives scored.
    pub n_objectives: usize,
    /// Leading trials, in trial order.
    pub history: Vec<OptimizationTrial>,
    /// Full trial history table.
    pub result_path: PathBuf,
}

pub(super) fn run(req: &OptimizeRequest, ctx: &RunContext) -> Result<OptimizeSummary> {
    let progress = &ctx.progress;
    progress.report("Loading models", 0);
    let bundle = ctx.artifacts.resolve_bundle(&req.source_run_id)?;
    if bundle.models.len() != req.targets.len() {
        warn!(
            run_id = %ctx.run_id,
            models = bundle.models.len(),
            targets = req.targets.len(),
            "scoring only the targets that have a model"
        );
        progress.note(format!(
            "{} models for {} targets",
            bundle.models.len(),
            req.targets.len()
        ));
    }
    progress.report(format!("Loaded {} models", bundle.models.len()), 10);

    let n_trials = req.n_trials.unwrap_or(ctx.config.optimize_trials);
    progress.report(format!("Optimizing ({n_trials} trials)"), 20);
    let mut study = ParameterStudy::new(&req.parameters, &req.targets)
        .n_trials(n_trials)
        .seed(ctx.config.seed);
    if let Some(manifest) = &bundle.manifest {
        study = study.feature_order(&manifest.features);
    }
    let study = study.run(&bundle.models, &ctx.cancel, |done, total| {
        progress.report_fraction(format!("Trial {done}/{total} complete"), 20, 90, done, total);
    })?;

    progress.report("Saving results", 90);
    let best = study.best(ctx.config.pareto_cap)?;
    ctx.artifacts.create_run_dir(ctx.run_id.as_str())?;
    let result_path = ctx
        .artifacts
        .save_table(ctx.run_id.as_str(), RESULT_FILE, &study.history_table()?)?;
    info!(run_id = %ctx.run_id, trials = study.trials.len(), objectives = study.n_objectives(), "optimization complete");
    progress.report("Optimization complete", 100);

    Ok(OptimizeSummary {
        best,
        n_trials: study.trials.len(),
        n_objectives: study.n_objectives(),
        history: study.trials.iter().take(ctx.config.history_cap).cloned().collect(),
        result_path,
    })
}
