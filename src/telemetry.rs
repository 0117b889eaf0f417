//! Logging setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is left to
//! the embedding binary (or tests) through [`init_logging`].

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Install a formatting subscriber once per process.
///
/// Filter precedence: `RUST_LOG`, then `LOG_LEVEL`, then `default_level`.
/// Subsequent calls are no-ops, and an already-installed global subscriber
/// (e.g. from a test harness) is left in place.
pub fn init_logging(default_level: &str) {
    INIT.get_or_init(|| {
        let level = std::env::var("LOG_LEVEL")
            .ok()
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
