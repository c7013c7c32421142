//! Logging, step timing and counters.
//!
//! All output goes to stderr so stdout stays reserved for command results.
//! Counters are ordinary events on the `salsag::metrics` target; route them
//! with a filter such as `SALSAG_LOG=salsag::metrics=info`.

use std::fmt::Display;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Environment variable that overrides `logging.level`.
pub const LOG_ENV: &str = "SALSAG_LOG";

/// Target used for counter events.
pub const METRICS_TARGET: &str = "salsag::metrics";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter {directive:?}: {message}")]
    Filter { directive: String, message: String },

    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let directive = std::env::var(LOG_ENV).unwrap_or_else(|_| config.level.clone());
    let filter = EnvFilter::try_new(&directive).map_err(|e| TelemetryError::Filter {
        directive: directive.clone(),
        message: e.to_string(),
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Run one named pipeline step inside a span, logging start, end,
/// `duration_ms` and outcome.
pub fn run_step<T, E, F>(step: &'static str, f: F) -> Result<T, E>
where
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    let span = info_span!("step", step);
    let _entered = span.enter();

    let start = Instant::now();
    info!(phase = "start", "step started");
    let result = f();
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(phase = "end", duration_ms, outcome = "success", "step finished"),
        Err(e) => error!(
            phase = "end",
            duration_ms,
            outcome = "error",
            error = %e,
            "step failed"
        ),
    }
    result
}

/// Emit a counter increment.
pub fn metric_count(name: &str) {
    info!(target: METRICS_TARGET, metric = name, value = 1u64, unit = "count", "metric");
}
