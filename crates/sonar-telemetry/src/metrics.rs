//! Prometheus metrics for Sonar.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `sonar_pings_total` | Counter | `method` | Calls that reached the probe service |
//! | `sonar_request_duration_seconds` | Histogram | `method`, `success` | Endpoint call latency |
//! | `sonar_circuit_breaker_transitions_total` | Counter | `breaker`, `to` | Breaker state changes |
//!
//! The middleware records through the `metrics` facade. Until
//! [`init_metrics`] installs a recorder those calls are no-ops.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, Counter};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Counter of probe calls.
pub const PINGS_TOTAL: &str = "sonar_pings_total";

/// Histogram of endpoint call durations.
pub const REQUEST_DURATION_SECONDS: &str = "sonar_request_duration_seconds";

/// Counter of circuit breaker transitions.
pub const BREAKER_TRANSITIONS_TOTAL: &str = "sonar_circuit_breaker_transitions_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are exported.
    pub enabled: bool,

    /// Address of the Prometheus scrape endpoint.
    pub addr: String,

    /// Histogram buckets for request duration.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Initializes the metrics subsystem.
///
/// Installs the Prometheus recorder and spawns its HTTP listener on the
/// current tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "metrics exporter stopped");
        }
    });

    register_metric_descriptions();
    tracing::info!(%addr, "metrics endpoint listening");
    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Returns the counter handed to the service instrumenting decorator.
pub fn pings_counter(method: &'static str) -> Counter {
    counter!(PINGS_TOTAL, "method" => method)
}

fn register_metric_descriptions() {
    describe_counter!(PINGS_TOTAL, "Total number of probe calls that reached the service");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Endpoint call duration in seconds"
    );
    describe_counter!(
        BREAKER_TRANSITIONS_TOTAL,
        "Circuit breaker state transitions"
    );
}
