#![forbid(unsafe_code)]

//! Subscriber setup for binaries embedding hookrt.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the application. [`init_tracing`] installs a `fmt` subscriber filtered
//! by the `HOOKRT_LOG` environment variable (same syntax as `RUST_LOG`),
//! defaulting to `warn`.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const ENV_LOG: &str = "HOOKRT_LOG";

/// Filter used when `HOOKRT_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// A global subscriber was already installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryError(String);

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to install tracing subscriber: {}", self.0)
    }
}

impl std::error::Error for TelemetryError {}

/// Build the filter from `directives`, falling back to [`DEFAULT_FILTER`].
#[must_use]
pub fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global `fmt` subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn init_tracing() -> Result<(), TelemetryError> {
    let directives = std::env::var(ENV_LOG).ok();
    tracing_subscriber::fmt()
        .with_env_filter(filter_from(directives.as_deref()))
        .with_target(true)
        .try_init()
        .map_err(|e| TelemetryError(e.to_string()))
}
