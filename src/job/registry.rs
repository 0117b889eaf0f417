//! Job registry - submits runs, tracks their lifecycle and answers status queries

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::event::{ProgressReporter, RunEvent};
use super::request::{JobRequest, PredictInput};
use super::run::{Run, RunId, RunState};
use crate::artifact::ArtifactStore;
use crate::cancel::CancellationToken;
use crate::config::ServiceConfig;
use crate::kv::{FsKvStore, KvStore, MemoryKvStore};
use crate::pipeline::{self, RunContext, RunResult};
use crate::storage::{self, Table};
use crate::validation::leave_one_group_out;
use crate::{Error, Result};

const RUN_RECORD: &str = "run.json";

/// Answer to a status query; unknown identifiers are a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusReport {
    /// Still executing.
    Running {
        /// Last reported percent
        last_progress: Option<u8>,
    },
    /// Finished with a result.
    Completed {
        /// Structured result
        result: Box<RunResult>,
    },
    /// Finished with an error.
    Failed {
        /// Error text
        error: String,
    },
    /// Stopped through cancellation.
    Cancelled,
    /// Never submitted, or not retained.
    Unknown,
}

impl From<&Run> for StatusReport {
    fn from(run: &Run) -> Self {
        match run.state() {
            RunState::Running => Self::Running {
                last_progress: run.last_progress(),
            },
            RunState::Completed => run.result().map_or(Self::Unknown, |result| Self::Completed {
                result: Box::new(result.clone()),
            }),
            RunState::Failed => Self::Failed {
                error: run.error().unwrap_or_default().to_string(),
            },
            RunState::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Debug)]
struct Handle {
    cancel: CancellationToken,
    progress: ProgressReporter,
    done: watch::Sender<bool>,
}

#[derive(Debug)]
struct Inner<S> {
    config: Arc<ServiceConfig>,
    store: S,
    artifacts: ArtifactStore,
    runs: DashMap<RunId, Run>,
    handles: DashMap<RunId, Handle>,
    events: broadcast::Sender<RunEvent>,
}

/// Registry of submitted runs.
///
/// Cloning is cheap; clones share the run table. Runs execute on the tokio
/// blocking pool, so a runtime must be active when submitting.
///
/// # Example
///
/// ```rust,no_run
/// use trueno_ml::config::ServiceConfig;
/// use trueno_ml::job::{JobRegistry, JobRequest, StatusReport};
///
/// # async fn example() -> trueno_ml::Result<()> {
/// let registry = JobRegistry::new(ServiceConfig::from_env()?);
/// let request = JobRequest::from_json(
///     r#"{"kind":"train","dataset_id":"steel","features":["temp"],"targets":["hardness"]}"#,
/// )?;
/// let id = registry.submit(request).await?;
/// let run = registry.wait(&id).await?;
/// println!("{:?}", run.state());
/// assert!(matches!(registry.query(&"nope".into()).await, StatusReport::Unknown));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JobRegistry<S: KvStore + 'static = FsKvStore> {
    inner: Arc<Inner<S>>,
}

impl<S: KvStore + 'static> Clone for JobRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl JobRegistry<FsKvStore> {
    /// Registry mirroring run records under `results_root`.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        let store = FsKvStore::new(config.results_root.clone());
        Self::with_store(config, store)
    }
}

impl JobRegistry<MemoryKvStore> {
    /// Registry that keeps run records in process memory only.
    ///
    /// Artifacts are still written under `results_root`, but `run.json` is
    /// never mirrored there, so finished runs are unknown after a restart.
    #[must_use]
    pub fn in_memory(config: ServiceConfig) -> Self {
        Self::with_store(config, MemoryKvStore::new())
    }

    /// Keys of the records kept for run `id`.
    #[must_use]
    pub fn record_keys(&self, id: &RunId) -> Vec<String> {
        self.inner.store.keys_under(id.as_str())
    }
}

impl<S: KvStore + 'static> JobRegistry<S> {
    /// Registry mirroring run records to `store`.
    #[must_use]
    pub fn with_store(config: ServiceConfig, store: S) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let artifacts = ArtifactStore::new(config.results_root.clone());
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                store,
                artifacts,
                runs: DashMap::new(),
                handles: DashMap::new(),
                events,
            }),
        }
    }

    /// Service configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Receive events of every run submitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Validate `request`, register a running run and start it.
    ///
    /// Returns as soon as the run is registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed request, missing or
    /// non-numeric columns in a readable dataset, or a declared group column
    /// with fewer than two groups. No run is created in that case. A dataset
    /// that cannot be read does not fail here; the run fails instead.
    pub async fn submit(&self, request: JobRequest) -> Result<RunId> {
        request.validate()?;
        let prepared = self.prepare(&request).await?;

        let id = RunId::new();
        self.inner.artifacts.create_run_dir(id.as_str())?;
        let cancel = CancellationToken::new();
        let progress = ProgressReporter::new(id.clone(), self.inner.events.clone());
        let (done, _) = watch::channel(false);

        let kind = request.kind();
        self.inner.runs.insert(id.clone(), Run::new(id.clone(), request.clone()));
        self.inner.handles.insert(
            id.clone(),
            Handle {
                cancel: cancel.clone(),
                progress: progress.clone(),
                done,
            },
        );

        let ctx = RunContext {
            run_id: id.clone(),
            config: Arc::clone(&self.inner.config),
            artifacts: self.inner.artifacts.clone(),
            cancel,
            progress,
        };
        let registry = self.clone();
        let run_id = id.clone();
        tokio::spawn(async move {
            let outcome =
                tokio::task::spawn_blocking(move || pipeline::execute(&request, prepared, &ctx))
                    .await
                    .unwrap_or_else(|e| Err(Error::Computation(format!("run panicked: {e}"))));
            registry.finish(&run_id, outcome).await;
        });

        info!(run_id = %id, %kind, "run submitted");
        Ok(id)
    }

    /// Checks that need the data, run before the run exists.
    async fn prepare(&self, request: &JobRequest) -> Result<Option<Table>> {
        match request {
            JobRequest::Train(req) => {
                let path = storage::resolve_dataset_path(&self.inner.config.dataset_root, &req.dataset_id)?;
                let loaded = tokio::task::spawn_blocking(move || storage::load(path))
                    .await
                    .map_err(|e| Error::Computation(format!("dataset load panicked: {e}")))?;
                let table = match loaded {
                    Ok(table) => table,
                    Err(e) => {
                        debug!(dataset = %req.dataset_id, error = %e, "dataset unreadable at submit");
                        return Ok(None);
                    }
                };
                storage::validate_columns(&table, &req.features, &req.targets)?;
                if let Some(column) = req.group_column.as_deref().filter(|c| table.has_column(c)) {
                    let groups = leave_one_group_out(&table.string_column(column)?).len();
                    if groups < 2 {
                        return Err(Error::Validation(format!(
                            "group column '{column}' has {groups} distinct value(s), need at least 2"
                        )));
                    }
                }
                Ok(Some(table))
            }
            JobRequest::Predict(req) => match &req.input {
                PredictInput::Rows(rows) => Table::from_records(rows, &req.features).map(Some),
                PredictInput::File { .. } => Ok(None),
            },
            JobRequest::Optimize(_) => Ok(None),
        }
    }

    /// Record the terminal state, publish it and mirror the run record.
    async fn finish(&self, id: &RunId, outcome: Result<RunResult>) {
        let last_percent = self
            .inner
            .handles
            .get(id)
            .and_then(|h| h.progress.last_percent());

        let (snapshot, event) = {
            let Some(mut run) = self.inner.runs.get_mut(id) else {
                warn!(run_id = %id, "finished run is not registered");
                return;
            };
            if let Some(percent) = last_percent {
                run.record_progress(percent);
            }
            let timestamp = chrono::Utc::now();
            let (transition, event) = match outcome {
                Ok(result) => (
                    run.complete(result.clone()),
                    RunEvent::Completed {
                        run_id: id.clone(),
                        result: Box::new(result),
                        timestamp,
                    },
                ),
                Err(Error::Cancelled) => (
                    run.cancel(),
                    RunEvent::Cancelled {
                        run_id: id.clone(),
                        timestamp,
                    },
                ),
                Err(e) => {
                    warn!(run_id = %id, error = %e, "run failed");
                    let error = e.to_string();
                    (
                        run.fail(error.clone()),
                        RunEvent::Failed {
                            run_id: id.clone(),
                            error,
                            timestamp,
                        },
                    )
                }
            };
            if let Err(e) = transition {
                warn!(run_id = %id, error = %e, "ignoring second terminal transition");
                return;
            }
            (run.clone(), event)
        };
        info!(run_id = %id, state = ?snapshot.state(), "run finished");

        // No subscribers is not an error
        let _ = self.inner.events.send(event);
        let key = format!("{id}/{RUN_RECORD}");
        if let Err(e) = self.inner.store.set_json(&key, &snapshot).await {
            warn!(run_id = %id, error = %e, "failed to persist run record");
        }
        if let Some((_, handle)) = self.inner.handles.remove(id) {
            handle.done.send_replace(true);
        }
    }

    /// Current snapshot of a run, from memory or the durable store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if neither knows the run, or a store error.
    pub async fn status(&self, id: &RunId) -> Result<Run> {
        if let Some(run) = self.inner.runs.get(id) {
            let mut run = run.clone();
            if let Some(percent) = self.inner.handles.get(id).and_then(|h| h.progress.last_percent()) {
                run.record_progress(percent);
            }
            return Ok(run);
        }
        if self.inner.artifacts.run_dir(id.as_str()).is_err() {
            return Err(Error::NotFound(id.to_string()));
        }
        self.inner
            .store
            .get_json(&format!("{id}/{RUN_RECORD}"))
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Status of a run; never fails.
    pub async fn query(&self, id: &RunId) -> StatusReport {
        match self.status(id).await {
            Ok(run) => StatusReport::from(&run),
            Err(Error::NotFound(_)) => StatusReport::Unknown,
            Err(e) => {
                warn!(run_id = %id, error = %e, "status lookup failed");
                StatusReport::Unknown
            }
        }
    }

    /// Request cancellation of a running run.
    ///
    /// Returns `false` if the run is unknown or already finished.
    pub fn cancel(&self, id: &RunId) -> bool {
        match self.inner.handles.get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                info!(run_id = %id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Wait for a run to finish and return its terminal snapshot.
    ///
    /// # Errors
    ///
    /// As [`JobRegistry::status`].
    pub async fn wait(&self, id: &RunId) -> Result<Run> {
        let receiver = self.inner.handles.get(id).map(|h| h.done.subscribe());
        if let Some(mut receiver) = receiver {
            // A dropped sender means the run already finished
            let _ = receiver.wait_for(|done| *done).await;
        }
        self.status(id).await
    }

    /// Snapshot of in-memory runs, oldest first.
    #[must_use]
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.inner.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_by_key(Run::submitted_at);
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableBuilder;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> JobRegistry<MemoryKvStore> {
        let config = ServiceConfig::builder()
            .dataset_root(dir.path().join("datasets"))
            .results_root(dir.path().join("results"))
            .train_trials(2)
            .without_explanations()
            .build()
            .unwrap();
        JobRegistry::in_memory(config)
    }

    fn write_dataset(dir: &TempDir, name: &str) {
        let n = 24;
        let x: Vec<f64> = (0..n).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let groups: Vec<String> = (0..n).map(|i| format!("g{}", i % 3)).collect();
        let table = TableBuilder::new()
            .float_column("x", x)
            .float_column("y", y)
            .text_column("lot", groups)
            .build()
            .unwrap();
        storage::save(&table, dir.path().join("datasets").join(format!("{name}.csv"))).unwrap();
    }

    fn train(targets: &[&str]) -> JobRequest {
        JobRequest::from_json(&format!(
            r#"{{"kind":"train","dataset_id":"d","features":["x"],"targets":{targets:?},
                "group_column":"lot","model_family":"rf","n_trials":1}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_target_rejected_before_start() {
        let dir = TempDir::new().unwrap();
        write_dataset(&dir, "d");
        let registry = registry(&dir);

        let err = registry.submit(train(&["nope"])).await.unwrap_err();
        assert!(err.is_validation());
        assert!(registry.runs().is_empty());
        assert!(!dir.path().join("results").exists());
    }

    #[tokio::test]
    async fn test_unreadable_dataset_creates_failed_run() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let id = registry.submit(train(&["y"])).await.unwrap();
        let run = registry.wait(&id).await.unwrap();
        assert_eq!(run.state(), RunState::Failed);
        assert!(run.error().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_train_completes_and_mirrors_record() {
        let dir = TempDir::new().unwrap();
        write_dataset(&dir, "d");
        let registry = registry(&dir);
        let mut events = registry.subscribe();

        let id = registry.submit(train(&["y"])).await.unwrap();
        let run = registry.wait(&id).await.unwrap();
        assert_eq!(run.state(), RunState::Completed, "{:?}", run.error());
        assert_eq!(run.last_progress(), Some(100));
        assert!(matches!(registry.query(&id).await, StatusReport::Completed { .. }));
        assert_eq!(registry.record_keys(&id), vec![format!("{id}/run.json")]);
        assert!(!dir.path().join("results").join(id.as_str()).join("run.json").exists());
        assert!(dir
            .path()
            .join("results")
            .join(id.as_str())
            .join("models/trained_model_0.json")
            .exists());

        let mut last = 0;
        let mut terminal = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                RunEvent::Progress { percent: Some(p), .. } => {
                    assert!(p >= last);
                    last = p;
                }
                RunEvent::Progress { .. } => {}
                _ => terminal += 1,
            }
        }
        assert_eq!(terminal, 1);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let id = RunId::from("never-submitted");
        assert_eq!(registry.query(&id).await, StatusReport::Unknown);
        assert!(matches!(registry.status(&id).await, Err(Error::NotFound(_))));
        assert!(matches!(
            registry.query(&RunId::from("../escape")).await,
            StatusReport::Unknown
        ));
        assert!(!registry.cancel(&id));
    }

    #[tokio::test]
    async fn test_predict_unknown_source_fails_with_model_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let request = JobRequest::from_json(
            r#"{"kind":"predict","source_run_id":"missing","features":["x"],"input":[{"x":1}]}"#,
        )
        .unwrap();
        let id = registry.submit(request).await.unwrap();
        let run = registry.wait(&id).await.unwrap();
        assert_eq!(run.state(), RunState::Failed);
        assert!(run.error().unwrap().contains("missing"));
    }
}
