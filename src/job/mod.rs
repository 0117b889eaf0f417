//! Run orchestration.
//!
//! A [`JobRequest`] submitted to the [`JobRegistry`] is validated, becomes a
//! `running` [`Run`] and executes in the background. Progress and the single
//! terminal outcome are published as [`RunEvent`]s; terminal records are
//! mirrored to the registry's [`crate::kv::KvStore`] under `<run_id>/run.json`.

mod event;
mod registry;
mod request;
mod run;

pub use event::{ProgressReporter, RunEvent};
pub use registry::{JobRegistry, StatusReport};
pub use request::{JobRequest, OptimizeRequest, PredictInput, PredictRequest, TrainRequest};
pub use run::{Run, RunId, RunKind, RunState};
