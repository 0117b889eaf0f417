//! Train / Predict / Optimize Example
//!
//! Generates a small heat-treatment dataset, trains one model per target with
//! grouped cross-validation, predicts two new settings and searches the
//! settings that trade hardness against cost.
//!
//! Run with: cargo run --example train_predict_optimize

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::RecvError};
use trueno_ml::config::ServiceConfig;
use trueno_ml::job::{JobRegistry, JobRequest, RunEvent, RunId, RunState};
use trueno_ml::optimize::BestTrials;
use trueno_ml::pipeline::RunResult;
use trueno_ml::storage::{self, TableBuilder};
use trueno_ml::telemetry::init_logging;

#[allow(clippy::cast_precision_loss)]
fn write_dataset(dir: &std::path::Path) -> Result<()> {
    let n = 60;
    let temp: Vec<f64> = (0..n).map(|i| 800.0 + (i * 53 % 200) as f64).collect();
    let time: Vec<f64> = (0..n).map(|i| 0.5 + (i % 8) as f64 * 0.4).collect();
    let hardness = temp
        .iter()
        .zip(&time)
        .map(|(t, h)| 0.04 * t + 4.0 * h.ln_1p())
        .collect();
    let cost = temp.iter().zip(&time).map(|(t, h)| 0.02 * t * h).collect();
    let lots = (0..n).map(|i| format!("lot-{}", i % 5)).collect();

    let table = TableBuilder::new()
        .float_column("temp", temp)
        .float_column("time", time)
        .float_column("hardness", hardness)
        .float_column("cost", cost)
        .text_column("lot", lots)
        .build()?;
    storage::save(&table, dir.join("steel.csv"))?;
    Ok(())
}

/// Print this run's events until its terminal event arrives.
async fn follow(
    registry: &JobRegistry,
    id: &RunId,
    events: &mut broadcast::Receiver<RunEvent>,
) -> Result<RunResult> {
    loop {
        match events.recv().await {
            Ok(event) if event.run_id() != id => {}
            Ok(RunEvent::Progress { message, percent, .. }) => match percent {
                Some(p) => println!("   [{p:>3}%] {message}"),
                None => println!("   [ -- ] {message}"),
            },
            Ok(_) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => println!("   ... {skipped} events skipped"),
        }
    }
    let run = registry.wait(id).await?;
    if run.state() != RunState::Completed {
        bail!("run {id} ended {:?}: {}", run.state(), run.error().unwrap_or_default());
    }
    run.result().cloned().context("completed run without result")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("warn");
    println!("=== Trueno-ML: Train, Predict, Optimize ===\n");

    let workspace = TempDir::new()?;
    let datasets = workspace.path().join("datasets");
    write_dataset(&datasets)?;

    let config = ServiceConfig::builder()
        .dataset_root(&datasets)
        .results_root(workspace.path().join("results"))
        .train_trials(8)
        .optimize_trials(60)
        .build()?;
    let registry = JobRegistry::new(config);
    let mut events = registry.subscribe();

    // -------------------------------------------------------------------------
    // 1. Train
    // -------------------------------------------------------------------------
    println!("1. Training gradient boosting per target...");
    let train = registry
        .submit(JobRequest::from_json(
            r#"{"kind":"train","dataset_id":"steel","features":["temp","time"],
                "targets":["hardness","cost"],"group_column":"lot","model_family":"gbr"}"#,
        )?)
        .await?;
    if let RunResult::Train(summary) = follow(&registry, &train, &mut events).await? {
        for target in &summary.targets {
            println!(
                "   {}: RMSE {:.3}, MAE {:.3}, R² {:.3}",
                target.target, target.metrics.rmse, target.metrics.mae, target.metrics.r2
            );
        }
        println!("   Artifacts: {}", summary.artifact_dir.display());
    }

    // -------------------------------------------------------------------------
    // 2. Predict
    // -------------------------------------------------------------------------
    println!("\n2. Predicting new settings...");
    let predict = registry
        .submit(JobRequest::from_json(&format!(
            r#"{{"kind":"predict","source_run_id":"{train}","features":["temp","time"],
                "input":[{{"temp":850,"time":1.0}},{{"temp":960,"time":2.5}}]}}"#
        ))?)
        .await?;
    if let RunResult::Predict(summary) = follow(&registry, &predict, &mut events).await? {
        for record in &summary.predictions {
            println!("   {record:?}");
        }
    }

    // -------------------------------------------------------------------------
    // 3. Optimize (two objectives)
    // -------------------------------------------------------------------------
    println!("\n3. Searching hardness/cost trade-offs...");
    let optimize = registry
        .submit(JobRequest::from_json(&format!(
            r#"{{"kind":"optimize","source_run_id":"{train}",
                "parameters":[{{"name":"temp","kind":"integer","low":800,"high":1000}},
                              {{"name":"time","kind":"real","low":0.5,"high":3.3}}],
                "targets":[{{"name":"hardness","mode":"maximize"}},
                           {{"name":"cost","mode":"minimize"}}]}}"#
        ))?)
        .await?;
    if let RunResult::Optimize(summary) = follow(&registry, &optimize, &mut events).await? {
        match summary.best {
            BestTrials::Pareto { trials } => {
                for trial in trials {
                    println!("   #{:<3} {:?} -> {:?}", trial.trial_number, trial.params, trial.scores);
                }
            }
            BestTrials::Single { params, score } => println!("   {params:?} -> {score:.3}"),
        }
        println!("   History: {}", summary.result_path.display());
    }

    println!("\n=== {} runs completed ===", registry.runs().len());
    Ok(())
}
