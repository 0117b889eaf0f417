//! # Trueno-ML: Run Orchestration for Tabular Regression
//!
//! **Version**: 0.1.0
//!
//! Trueno-ML turns tabular regression work into observable, cancellable
//! background runs: training with hyperparameter search and grouped
//! cross-validation, prediction with stored models, and single- or
//! multi-objective optimization of model inputs.
//!
//! ## Design Principles
//!
//! - **Validate early**: malformed requests and missing columns are rejected
//!   before a run exists
//! - **Fire and observe**: `submit` returns immediately; progress and the one
//!   terminal outcome arrive as broadcast events
//! - **Cooperative cancellation**: a token is checked between trials, folds,
//!   boosting rounds and epochs
//! - **Deterministic**: every sampler is seeded from the service configuration
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_ml::config::ServiceConfig;
//! use trueno_ml::job::{JobRegistry, JobRequest, RunEvent};
//!
//! # async fn example() -> trueno_ml::Result<()> {
//! let registry = JobRegistry::new(ServiceConfig::from_env()?);
//! let mut events = registry.subscribe();
//!
//! let id = registry
//!     .submit(JobRequest::from_json(
//!         r#"{"kind":"train","dataset_id":"steel","features":["temp","time"],
//!             "targets":["hardness"],"group_column":"lot"}"#,
//!     )?)
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let RunEvent::Progress { message, percent, .. } = &event {
//!         println!("{percent:?} {message}");
//!     }
//!     if event.is_terminal() && event.run_id() == &id {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod cancel;
pub mod config;
pub mod error;
pub mod explain;
pub mod job;
pub mod kv;
pub mod model;
pub mod optimize;
pub mod pipeline;
pub mod search;
pub mod storage;
pub mod telemetry;
pub mod validation;

pub use error::{Error, Result};
