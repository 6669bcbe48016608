//! Telemetry error types.

use thiserror::Error;

/// Failures while installing the global subscriber or metrics recorder.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The Prometheus recorder could not be installed.
    #[error("metrics recorder not installed: {0}")]
    MetricsInit(String),

    /// The subscriber could not be installed or the filter is invalid.
    #[error("logging not initialized: {0}")]
    LoggingInit(String),

    /// The scrape listener address does not parse.
    #[error("bad metrics listener address '{0}'")]
    InvalidAddress(String),
}
