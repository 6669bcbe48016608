//! Logging and metrics for Strata.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output and an
//!   `EnvFilter` directive ([`logging`]).
//! - **Metrics**: Prometheus exposition through the `metrics` facade
//!   ([`metrics`]). The executor and builder in `strata-middleware` record
//!   into it; nothing is collected until [`init_metrics`] installs a
//!   recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strata_telemetry::TelemetryError> {
//!     let config = TelemetryConfig::builder()
//!         .log_level("info,strata_middleware=debug")
//!         .metrics_addr("0.0.0.0:9464")
//!         .build();
//!
//!     init_telemetry(&config)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use crate::metrics::{init_metrics, render_metrics, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}
