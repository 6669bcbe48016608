//! Prometheus metrics for pipeline execution.
//!
//! Recording goes through the `metrics` facade, so every `record_*`
//! function is a no-op until a recorder is installed with [`init_metrics`].
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `strata_executions_total` | Counter | `route`, `outcome`, `status` | Finished executions |
//! | `strata_execution_duration_seconds` | Histogram | `route`, `outcome` | Forward-pass latency |
//! | `strata_in_flight_executions` | Gauge | - | Executions currently running |
//! | `strata_short_circuits_total` | Counter | `route`, `unit` | Units that answered without continuing |
//! | `strata_terminate_failures_total` | Counter | `unit` | Terminate hooks that returned an error |
//! | `strata_sequences_compiled_total` | Counter | - | Sequences resolved by the builder |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global handle for rendering the scrape output.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder.
    pub enabled: bool,

    /// Scrape listener address. `None` installs the recorder only; render
    /// with [`render_metrics`].
    pub addr: Option<String>,

    /// Histogram buckets for execution duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
            duration_buckets: vec![
                0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// With an address configured, the scrape listener is spawned on the
/// current tokio runtime.
///
/// # Errors
///
/// - `TelemetryError::InvalidAddress` if the address does not parse
/// - `TelemetryError::MetricsInit` if a recorder is already installed, the
///   buckets are invalid, or a listener is requested outside a runtime
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets(&config.duration_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                TelemetryError::MetricsInit("scrape listener requires a tokio runtime".to_string())
            })?;

            let (recorder, exporter) = builder
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

            runtime.spawn(async move {
                if exporter.await.is_err() {
                    tracing::error!("metrics scrape listener stopped");
                }
            });
            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "strata_executions_total",
        "Pipeline executions by route, outcome and final status"
    );
    describe_histogram!(
        "strata_execution_duration_seconds",
        "Time from entering the first unit to the final response"
    );
    describe_gauge!(
        "strata_in_flight_executions",
        "Pipeline executions currently running"
    );
    describe_counter!(
        "strata_short_circuits_total",
        "Responses produced by a unit without invoking its continuation"
    );
    describe_counter!(
        "strata_terminate_failures_total",
        "Terminate hooks that returned an error"
    );
    describe_counter!(
        "strata_sequences_compiled_total",
        "Middleware sequences resolved by the pipeline builder"
    );
}

/// Records a finished execution.
pub fn record_execution(route: &str, outcome: &str, status_code: u16, duration: Duration) {
    counter!(
        "strata_executions_total",
        "route" => route.to_string(),
        "outcome" => outcome.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "strata_execution_duration_seconds",
        "route" => route.to_string(),
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a unit that answered without running the rest of the sequence.
pub fn record_short_circuit(route: &str, unit: &str) {
    counter!(
        "strata_short_circuits_total",
        "route" => route.to_string(),
        "unit" => unit.to_string()
    )
    .increment(1);
}

/// Records a failed terminate hook.
pub fn record_terminate_failure(unit: &str) {
    counter!("strata_terminate_failures_total", "unit" => unit.to_string()).increment(1);
}

/// Records a compiled sequence.
pub fn record_sequence_compiled() {
    counter!("strata_sequences_compiled_total").increment(1);
}

/// Keeps `strata_in_flight_executions` raised while alive.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the gauge; it is decremented when the guard drops.
    #[must_use]
    pub fn new() -> Self {
        gauge!("strata_in_flight_executions").increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("strata_in_flight_executions").decrement(1.0);
    }
}
