//! Prediction with a training run's models.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::RunContext;
use crate::artifact::ExplanationMap;
use crate::explain::shapley_values;
use crate::job::{PredictInput, PredictRequest};
use crate::model::Regressor;
use crate::storage::{self, Table, TableBuilder};
use crate::Result;

const RESULT_FILE: &str = "prediction_result.csv";

/// Result of a prediction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictSummary {
    /// One record per input row: the features plus one `predicted_*` value per model.
    pub predictions: Vec<BTreeMap<String, f64>>,
    /// Models applied.
    pub n_models: usize,
    /// Rows predicted.
    pub n_rows: usize,
    /// Saved result table.
    pub result_path: PathBuf,
}

fn input_table(req: &PredictRequest, prepared: Option<Table>, ctx: &RunContext) -> Result<Table> {
    if let Some(table) = prepared {
        return Ok(table);
    }
    match &req.input {
        PredictInput::File { path } if path.is_absolute() => storage::load(path),
        PredictInput::File { path } => storage::load(ctx.config.dataset_root.join(path)),
        PredictInput::Rows(rows) => Table::from_records(rows, &req.features),
    }
}

/// Run a prediction job.
pub(super) fn run(req: &PredictRequest, prepared: Option<Table>, ctx: &RunContext) -> Result<PredictSummary> {
    let progress = &ctx.progress;
    progress.report("Preparing input", 0);
    let table = input_table(req, prepared, ctx)?;
    progress.report(format!("Input ready ({} rows)", table.num_rows()), 10);

    progress.report("Loading models", 20);
    let bundle = ctx.artifacts.resolve_bundle(&req.source_run_id)?;
    let features = match &bundle.manifest {
        Some(manifest) => {
            let mut requested = req.features.clone();
            let mut trained = manifest.features.clone();
            requested.sort();
            trained.sort();
            if requested != trained {
                warn!(run_id = %ctx.run_id, requested = ?req.features, trained = ?manifest.features, "feature list differs from the training run");
            }
            manifest.features.clone()
        }
        None => req.features.clone(),
    };
    let x = table.feature_matrix(&features)?;
    let names: Vec<String> = match &bundle.manifest {
        Some(manifest) if manifest.targets.len() == bundle.models.len() => manifest
            .targets
            .iter()
            .map(|t| format!("predicted_{t}"))
            .collect(),
        _ => (0..bundle.models.len())
            .map(|i| format!("predicted_target_{i}"))
            .collect(),
    };

    let n_models = bundle.models.len();
    let rows: Vec<usize> = (0..x.n_rows()).collect();
    let mut outputs = Vec::with_capacity(n_models);
    let mut explanations = ExplanationMap::new();
    for (index, (model, name)) in bundle.models.iter().zip(&names).enumerate() {
        ctx.cancel.check()?;
        progress.report_fraction(
            format!("Predicting with model {}/{n_models}", index + 1),
            30,
            85,
            index,
            n_models,
        );
        outputs.push(model.predict(&x)?);

        if ctx.config.explain.enabled {
            let target = name.trim_start_matches("predicted_").to_string();
            match shapley_values(model, &x, &x, &rows, &features, &ctx.config.explain, ctx.config.seed) {
                Ok(explanation) => {
                    explanations.insert(target, BTreeMap::from([("input".to_string(), explanation)]));
                }
                Err(e) => warn!(run_id = %ctx.run_id, target = %target, error = %e, "skipping attributions"),
            }
        }
    }

    progress.report("Saving results", 90);
    let mut builder = TableBuilder::new();
    for (col, feature) in features.iter().enumerate() {
        builder = builder.float_column(feature, x.column(col));
    }
    for (name, values) in names.iter().zip(&outputs) {
        builder = builder.float_column(name, values.clone());
    }
    let result = builder.build()?;
    ctx.artifacts.create_run_dir(ctx.run_id.as_str())?;
    let result_path = ctx.artifacts.save_table(ctx.run_id.as_str(), RESULT_FILE, &result)?;
    if !explanations.is_empty() {
        ctx.artifacts.save_explanations(ctx.run_id.as_str(), &explanations)?;
    }

    let predictions = (0..x.n_rows())
        .map(|row| {
            features
                .iter()
                .enumerate()
                .map(|(col, f)| (f.clone(), x.get(row, col)))
                .chain(names.iter().zip(&outputs).map(|(n, v)| (n.clone(), v[row])))
                .collect()
        })
        .collect();
    info!(run_id = %ctx.run_id, rows = x.n_rows(), models = n_models, "prediction complete");
    progress.report("Prediction complete", 100);

    Ok(PredictSummary {
        predictions,
        n_models,
        n_rows: x.n_rows(),
        result_path,
    })
}
