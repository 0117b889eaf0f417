//! Training: hyperparameter search, grouped cross-validation and artifacts
//! for every target.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::RunContext;
use crate::artifact::{ExplanationMap, Manifest};
use crate::config::SearchFailurePolicy;
use crate::explain::Explanation;
use crate::job::TrainRequest;
use crate::model::{merged_params, Estimator, ModelFamily, ModelParams};
use crate::search::{HyperparameterSearch, SearchOutcome};
use crate::storage::{self, Table, TableBuilder};
use crate::validation::metrics::RegressionMetrics;
use crate::validation::{auto_groups, CrossValidator};
use crate::{Error, Result};

/// Group column name used when groups are generated.
pub const AUTO_GROUP_COLUMN: &str = "cv_group";

const SETUP_DONE: u8 = 20;
const SAVING: u8 = 85;

/// Outcome for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    /// Target column.
    pub target: String,
    /// Out-of-fold metrics.
    pub metrics: RegressionMetrics,
    /// Full hyperparameters of the saved model.
    pub best_params: ModelParams,
    /// Mean fold RMSE of the best trial; absent after a fallback.
    pub search_score: Option<f64>,
    /// Search trials that completed; 0 after a fallback.
    pub search_trials: usize,
    /// Search trials that failed and were skipped.
    #[serde(default)]
    pub failed_trials: usize,
    /// The search failed and defaults were used.
    pub search_fallback: bool,
    /// Folds with attributions.
    pub explained_folds: usize,
}

/// Result of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    /// Estimator family.
    pub model_family: ModelFamily,
    /// Per-target outcomes, in request order.
    pub targets: Vec<TargetSummary>,
    /// Column the folds were built from.
    pub group_column: String,
    /// Whether the groups were generated.
    pub auto_groups: bool,
    /// Number of folds.
    pub n_folds: usize,
    /// Rows in the dataset.
    pub n_rows: usize,
    /// Run namespace holding the artifacts.
    pub artifact_dir: PathBuf,
}

type FoldExplanations = BTreeMap<String, Explanation>;

/// Parameters chosen for one target and how the search got there.
#[derive(Debug, Clone, PartialEq)]
struct SearchTally {
    params: ModelParams,
    score: Option<f64>,
    succeeded: usize,
    failed: usize,
    fallback: bool,
}

impl SearchTally {
    fn searched(outcome: SearchOutcome) -> Self {
        Self {
            params: outcome.best_params,
            score: Some(outcome.best_score),
            succeeded: outcome.n_trials.saturating_sub(outcome.n_failed),
            failed: outcome.n_failed,
            fallback: false,
        }
    }

    /// Pinned params over the family defaults; every planned trial is counted as failed.
    const fn fallback(pinned: ModelParams, planned: usize) -> Self {
        Self {
            params: pinned,
            score: None,
            succeeded: 0,
            failed: planned,
            fallback: true,
        }
    }
}

struct TargetRun {
    summary: TargetSummary,
    predictions: Vec<f64>,
    truth: Vec<f64>,
    model: Estimator,
}

fn load_table(req: &TrainRequest, prepared: Option<Table>, ctx: &RunContext) -> Result<Table> {
    if let Some(table) = prepared {
        return Ok(table);
    }
    let path = storage::resolve_dataset_path(&ctx.config.dataset_root, &req.dataset_id)?;
    let table = storage::load(path)?;
    storage::validate_columns(&table, &req.features, &req.targets)?;
    Ok(table)
}

fn groups_for(req: &TrainRequest, table: &Table, ctx: &RunContext) -> Result<(String, Vec<String>, bool)> {
    match req.group_column.as_deref() {
        Some(column) if table.has_column(column) => {
            Ok((column.to_string(), table.string_column(column)?, false))
        }
        requested => {
            if let Some(column) = requested {
                warn!(run_id = %ctx.run_id, column, "group column not in dataset, generating groups");
            }
            let groups = auto_groups(
                table.num_rows(),
                ctx.config.auto_group_folds,
                ctx.config.seed,
            );
            ctx.progress.report(
                format!(
                    "Generated {} CV groups in '{AUTO_GROUP_COLUMN}'",
                    ctx.config.auto_group_folds
                ),
                18,
            );
            Ok((AUTO_GROUP_COLUMN.to_string(), groups, true))
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn band(index: usize, total: usize) -> (u8, u8) {
    let width = usize::from(SAVING - SETUP_DONE);
    let start = usize::from(SETUP_DONE) + width * index / total;
    let end = usize::from(SETUP_DONE) + width * (index + 1) / total;
    (start as u8, end as u8)
}

fn train_target(
    req: &TrainRequest,
    ctx: &RunContext,
    cv: &CrossValidator<'_>,
    (index, target): (usize, &str),
) -> Result<(TargetRun, FoldExplanations)> {
    let family = req.model_family;
    let total = req.targets.len();
    let (start, end) = band(index, total);
    let search_end = start + (end - start) / 2;
    let progress = &ctx.progress;
    let label = format!("{}/{total}: {target}", index + 1);

    progress.report(format!("Hyperparameter search ({label})"), start);
    let n_trials = req.n_trials.unwrap_or(ctx.config.train_trials);
    let search = HyperparameterSearch::new(family, n_trials)
        .seed(ctx.config.seed)
        .pinned(req.model_params.clone());
    let planned = search.planned_trials();
    let searched = search.run(cv, &ctx.cancel, |done, of| {
        progress.report_fraction(format!("Trial {done}/{of} ({label})"), start, search_end, done, of);
    });

    let tally = match searched {
        Ok(outcome) => SearchTally::searched(outcome),
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) if ctx.config.search_failure_policy == SearchFailurePolicy::Abort => return Err(e),
        Err(e) => {
            warn!(run_id = %ctx.run_id, target, error = %e, failed = planned, "search failed, using defaults");
            progress.note(format!("Hyperparameter search failed for {target}; using defaults"));
            SearchTally::fallback(req.model_params.clone(), planned)
        }
    };

    progress.report(format!("Cross-validation ({label})"), search_end);
    let outcome = cv.run(family, &tally.params, &ctx.cancel, |done, of| {
        progress.report_fraction(format!("Fold {done}/{of} ({label})"), search_end, end - 1, done, of);
    })?;
    progress.report(
        format!("{target} trained (RMSE: {:.4})", outcome.metrics.rmse),
        end,
    );
    info!(run_id = %ctx.run_id, target, rmse = outcome.metrics.rmse, r2 = outcome.metrics.r2, "target trained");

    let run = TargetRun {
        summary: TargetSummary {
            target: target.to_string(),
            metrics: outcome.metrics,
            best_params: merged_params(family, &tally.params),
            search_score: tally.score,
            search_trials: tally.succeeded,
            failed_trials: tally.failed,
            search_fallback: tally.fallback,
            explained_folds: outcome.explanations.len(),
        },
        predictions: outcome.predictions,
        truth: Vec::new(),
        model: outcome.final_model,
    };
    Ok((run, outcome.explanations))
}

/// Run a training job.
pub(super) fn run(req: &TrainRequest, prepared: Option<Table>, ctx: &RunContext) -> Result<TrainSummary> {
    let progress = &ctx.progress;
    progress.report("Loading dataset", 0);
    let table = load_table(req, prepared, ctx)?;
    progress.report(format!("Dataset loaded ({} rows)", table.num_rows()), 10);

    progress.report("Setting up cross-validation", 15);
    let (group_column, groups, generated) = groups_for(req, &table, ctx)?;
    let x = table.feature_matrix(&req.features)?;
    progress.report("Preparing models", SETUP_DONE);

    let mut runs = Vec::with_capacity(req.targets.len());
    let mut explanations = ExplanationMap::new();
    let mut n_folds = 0;
    for (index, target) in req.targets.iter().enumerate() {
        ctx.cancel.check()?;
        let y = table.numeric_column(target)?;
        let cv = CrossValidator::new(&x, &y, &groups)?;
        n_folds = cv.folds().len();
        let cv = if ctx.config.explain.enabled {
            cv.with_explanations(&req.features, &ctx.config.explain, ctx.config.seed)
        } else {
            cv
        };
        let (mut run, folds) = train_target(req, ctx, &cv, (index, target))?;
        run.truth = y;
        if !folds.is_empty() {
            explanations.insert(target.clone(), folds);
        }
        runs.push(run);
    }

    progress.report("Saving results", SAVING);
    ctx.cancel.check()?;
    let run_id = ctx.run_id.as_str();
    let artifact_dir = ctx.artifacts.create_run_dir(run_id)?;
    let models: Vec<Estimator> = runs.iter().map(|r| r.model.clone()).collect();
    ctx.artifacts.save_models(run_id, &models)?;
    ctx.artifacts.save_manifest(&Manifest {
        run_id: run_id.to_string(),
        family: req.model_family,
        features: req.features.clone(),
        targets: req.targets.clone(),
        best_params: runs.iter().map(|r| r.summary.best_params.clone()).collect(),
        created_at: Utc::now(),
    })?;
    let cv_table = cv_result_table(&table, req, &group_column, &groups, &runs)?;
    ctx.artifacts.save_table(run_id, "cv_result.csv", &cv_table)?;
    if !explanations.is_empty() {
        ctx.artifacts.save_explanations(run_id, &explanations)?;
    }
    progress.report("Training complete", 100);

    Ok(TrainSummary {
        model_family: req.model_family,
        targets: runs.into_iter().map(|r| r.summary).collect(),
        group_column,
        auto_groups: generated,
        n_folds,
        n_rows: table.num_rows(),
        artifact_dir,
    })
}

/// Features, group, each target and `predicted_<target>` per row.
fn cv_result_table(
    table: &Table,
    req: &TrainRequest,
    group_column: &str,
    groups: &[String],
    runs: &[TargetRun],
) -> Result<Table> {
    let mut seen = BTreeSet::new();
    let mut builder = TableBuilder::new();
    for feature in &req.features {
        if seen.insert(feature.clone()) {
            builder = builder.float_column(feature, table.numeric_column(feature)?);
        }
    }
    if seen.insert(group_column.to_string()) {
        builder = builder.text_column(group_column, groups.to_vec());
    }
    for run in runs {
        let target = &run.summary.target;
        if seen.insert(target.clone()) {
            builder = builder.float_column(target, run.truth.clone());
        }
        let predicted = format!("predicted_{target}");
        if seen.insert(predicted.clone()) {
            builder = builder.float_column(&predicted, run.predictions.clone());
        }
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamValue;

    #[test]
    fn test_fallback_reports_no_successful_trials() {
        let mut pinned = ModelParams::new();
        pinned.insert("n_estimators".into(), ParamValue::Int(10));
        let tally = SearchTally::fallback(pinned.clone(), 5);
        assert_eq!(tally.succeeded, 0);
        assert_eq!(tally.failed, 5);
        assert!(tally.fallback);
        assert!(tally.score.is_none());
        assert_eq!(tally.params, pinned);
    }

    #[test]
    fn test_partial_failures_are_split_out() {
        let tally = SearchTally::searched(SearchOutcome {
            best_params: ModelParams::new(),
            best_score: 0.5,
            n_trials: 8,
            n_failed: 3,
        });
        assert_eq!((tally.succeeded, tally.failed), (5, 3));
        assert!(!tally.fallback);
        assert_eq!(tally.score, Some(0.5));
    }

    #[test]
    fn test_band_splits_progress_evenly() {
        assert_eq!(band(0, 2), (SETUP_DONE, 52));
        assert_eq!(band(1, 2), (52, SAVING));
    }
}
