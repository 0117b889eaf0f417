//! Run events and the per-run progress reporter.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::run::RunId;
use crate::pipeline::RunResult;

/// Event published on the registry's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Intermediate progress.
    Progress {
        /// Run
        run_id: RunId,
        /// Human-readable step
        message: String,
        /// 0-100, non-decreasing per run
        percent: Option<u8>,
        /// Emission time
        timestamp: DateTime<Utc>,
    },
    /// Terminal success.
    Completed {
        /// Run
        run_id: RunId,
        /// Structured result
        result: Box<RunResult>,
        /// Emission time
        timestamp: DateTime<Utc>,
    },
    /// Terminal failure.
    Failed {
        /// Run
        run_id: RunId,
        /// Error text
        error: String,
        /// Emission time
        timestamp: DateTime<Utc>,
    },
    /// Terminal cancellation.
    Cancelled {
        /// Run
        run_id: RunId,
        /// Emission time
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    /// Run this event belongs to.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        match self {
            Self::Progress { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id, .. } => run_id,
        }
    }

    /// Whether this is the last event of its run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Emits progress events for one run.
///
/// Percents are clamped to `0..=100` and never decrease: a lower value is
/// raised to the last emitted one.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    run_id: RunId,
    events: broadcast::Sender<RunEvent>,
    // percent + 1; 0 means nothing reported yet
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    /// Reporter publishing to `events`.
    #[must_use]
    pub fn new(run_id: RunId, events: broadcast::Sender<RunEvent>) -> Self {
        Self {
            run_id,
            events,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Run being reported.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Last emitted percent.
    #[must_use]
    pub fn last_percent(&self) -> Option<u8> {
        self.last.load(Ordering::SeqCst).checked_sub(1)
    }

    /// Emit a message with a percent.
    pub fn report(&self, message: impl Into<String>, percent: u8) {
        let encoded = percent.min(100) + 1;
        let previous = self.last.fetch_max(encoded, Ordering::SeqCst);
        self.send(message.into(), Some(previous.max(encoded) - 1));
    }

    /// Emit a message without a percent.
    pub fn note(&self, message: impl Into<String>) {
        self.send(message.into(), None);
    }

    /// Emit `percent` scaled into `[from, to]` by `done / total`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn report_fraction(&self, message: impl Into<String>, from: u8, to: u8, done: usize, total: usize) {
        let fraction = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        let span = f64::from(to.saturating_sub(from));
        let percent = f64::from(from) + (span * fraction.clamp(0.0, 1.0)).floor();
        self.report(message, percent as u8);
    }

    fn send(&self, message: String, percent: Option<u8>) {
        debug!(run_id = %self.run_id, ?percent, %message, "progress");
        // No subscribers is not an error
        let _ = self.events.send(RunEvent::Progress {
            run_id: self.run_id.clone(),
            message,
            percent,
            timestamp: Utc::now(),
        });
    }
}
