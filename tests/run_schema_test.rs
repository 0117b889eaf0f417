//! Run record and wire schema tests
//!
//! Covers the JSON shapes exchanged with callers: requests, run records,
//! events and status reports.

use std::collections::BTreeMap;

use chrono::Utc;
use trueno_ml::job::{JobRequest, Run, RunEvent, RunId, RunKind, RunState, StatusReport};
use trueno_ml::optimize::{BestTrials, ParameterKind, TargetMode};
use trueno_ml::pipeline::{OptimizeSummary, RunResult};

fn optimize_request() -> JobRequest {
    JobRequest::from_json(
        r#"{
            "kind": "optimize",
            "source_run_id": "train-1",
            "parameters": [
                {"name": "temp", "kind": "integer", "low": 800, "high": 1000},
                {"name": "time", "kind": "real", "low": 0.5, "high": 4.0},
                {"name": "grade", "kind": "categorical", "choices": [1, 2, 3]}
            ],
            "targets": [
                {"name": "hardness", "mode": "maximize"},
                {"name": "cost", "mode": "target", "target_value": 10.0}
            ],
            "n_trials": 25
        }"#,
    )
    .unwrap()
}

fn optimize_result() -> RunResult {
    RunResult::Optimize(OptimizeSummary {
        best: BestTrials::Single {
            params: BTreeMap::from([("temp".to_string(), 900.0)]),
            score: 61.5,
        },
        n_trials: 25,
        n_objectives: 1,
        history: Vec::new(),
        result_path: "results/opt-1/optimization_result.csv".into(),
    })
}

// =============================================================================
// Request Tests
// =============================================================================

#[test]
fn test_optimize_request_parses_canonical_names() {
    let JobRequest::Optimize(req) = optimize_request() else {
        panic!("expected optimize request");
    };
    assert_eq!(req.parameters[0].kind, ParameterKind::Integer { low: 800, high: 1000 });
    assert_eq!(
        req.parameters[2].kind,
        ParameterKind::Categorical {
            choices: vec![1.0, 2.0, 3.0]
        }
    );
    assert_eq!(req.targets[1].mode, TargetMode::Target);
    assert_eq!(req.targets[1].target_value, Some(10.0));
    assert_eq!(req.n_trials, Some(25));
    assert!(optimize_request().validate().is_ok());
}

#[test]
fn test_alternate_parameter_names_rejected() {
    let err = JobRequest::from_json(
        r#"{"kind":"optimize","source_run_id":"r",
            "parameters":[{"name":"temp","type":"int","min":1,"max":2}],
            "targets":[{"name":"y","mode":"maximize"}]}"#,
    )
    .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_inverted_bounds_rejected() {
    let req = JobRequest::from_json(
        r#"{"kind":"optimize","source_run_id":"r",
            "parameters":[{"name":"temp","kind":"real","low":5,"high":1}],
            "targets":[{"name":"y","mode":"minimize"}]}"#,
    )
    .unwrap();
    assert!(req.validate().unwrap_err().is_validation());
}

// =============================================================================
// Run Record Tests
// =============================================================================

#[test]
fn test_run_record_creation() {
    let run = Run::new(RunId::from("opt-1"), optimize_request());

    assert_eq!(run.id().as_str(), "opt-1");
    assert_eq!(run.kind(), RunKind::Optimize);
    assert_eq!(run.state(), RunState::Running);
    assert!(run.submitted_at().timestamp() > 0);
    assert!(run.finished_at().is_none());
    assert!(run.result().is_none());
}

#[test]
fn test_run_record_json_roundtrip() {
    let mut run = Run::new(RunId::from("opt-1"), optimize_request());
    run.record_progress(55);
    run.complete(optimize_result()).unwrap();

    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["state"], "completed");
    assert_eq!(json["kind"], "optimize");
    assert_eq!(json["id"], "opt-1");
    assert_eq!(json["result"]["kind"], "optimize");
    assert_eq!(json["result"]["best"]["kind"], "single");
    assert_eq!(json["last_progress"], 100);

    let restored: Run = serde_json::from_value(json).unwrap();
    assert_eq!(restored, run);
}

#[test]
fn test_completed_run_is_immutable() {
    let mut run = Run::new(RunId::from("opt-1"), optimize_request());
    run.complete(optimize_result()).unwrap();
    assert!(run.fail("late failure").is_err());
    assert!(run.cancel().is_err());
    assert_eq!(run.state(), RunState::Completed);
}

// =============================================================================
// Event and Status Tests
// =============================================================================

#[test]
fn test_event_json_shapes() {
    let progress = RunEvent::Progress {
        run_id: RunId::from("r"),
        message: "Trial 3/10 complete".to_string(),
        percent: Some(41),
        timestamp: Utc::now(),
    };
    let json = serde_json::to_value(&progress).unwrap();
    assert_eq!(json["type"], "progress");
    assert_eq!(json["percent"], 41);
    assert!(!progress.is_terminal());

    let failed = RunEvent::Failed {
        run_id: RunId::from("r"),
        error: "boom".to_string(),
        timestamp: Utc::now(),
    };
    let json = serde_json::to_value(&failed).unwrap();
    assert_eq!(json["type"], "failed");
    assert_eq!(json["error"], "boom");
    assert!(failed.is_terminal());
}

#[test]
fn test_status_report_from_run() {
    let mut run = Run::new(RunId::from("r"), optimize_request());
    run.record_progress(30);
    assert_eq!(
        StatusReport::from(&run),
        StatusReport::Running {
            last_progress: Some(30)
        }
    );

    run.fail("Computation error: diverged").unwrap();
    assert_eq!(
        StatusReport::from(&run),
        StatusReport::Failed {
            error: "Computation error: diverged".to_string()
        }
    );
    let json = serde_json::to_value(StatusReport::Unknown).unwrap();
    assert_eq!(json["status"], "unknown");
}
