//! Observability bootstrap for Sonar.
//!
//! - **Logging**: `tracing-subscriber` with JSON or human-readable output
//! - **Metrics**: Prometheus exposition via the `metrics` facade
//! - **Tracing**: OpenTelemetry with OTLP export and W3C propagation
//!
//! Only binaries call the `init_*` functions. Libraries emit through the
//! `tracing`, `metrics` and `opentelemetry` facades and stay silent until
//! something is installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use sonar_telemetry::{init_telemetry, TelemetryConfig, TracingConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig {
//!         tracing: TracingConfig { enabled: true, ..Default::default() },
//!         ..Default::default()
//!     };
//!
//!     let _guard = init_telemetry(config).expect("Failed to init telemetry");
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, pings_counter, render_metrics, MetricsConfig};
pub use tracing::{
    extract_context, init_tracing, inject_context, HeaderExtractor, HeaderInjector, TracingConfig,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Settings for the three subsystems started by [`init_telemetry`].
///
/// Binaries fill it from the `[telemetry]` section of their configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Logging settings.
    pub logging: LogConfig,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// OpenTelemetry settings.
    pub tracing: TracingConfig,
}

/// Guard that flushes and shuts down the tracer provider on drop.
///
/// Keep it alive for the lifetime of the application.
pub struct TelemetryGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TelemetryGuard {
    /// Creates a new telemetry guard.
    #[must_use]
    pub fn new(tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>) -> Self {
        Self { tracer_provider }
    }

    /// Returns `true` if a tracer provider is installed.
    #[must_use]
    pub fn tracing_enabled(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("tracing_enabled", &self.tracing_enabled())
            .finish()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    eprintln!("Error flushing tracer provider: {e}");
                }
            }
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {e}");
            }
        }
    }
}

/// Initializes logging, metrics and tracing, in that order.
///
/// Must be called from within a tokio runtime when metrics or tracing are
/// enabled.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    let tracer_provider = init_tracing(&config.tracing)?;
    Ok(TelemetryGuard::new(tracer_provider))
}
