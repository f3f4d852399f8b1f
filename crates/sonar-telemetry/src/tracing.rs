//! OpenTelemetry distributed tracing for Sonar.
//!
//! Tracing is off unless enabled: without an installed provider the global
//! tracer is a no-op and the tracing middleware costs next to nothing.
//! When enabled, spans are exported over OTLP (gRPC) and the W3C
//! `traceparent`/`tracestate` propagator is installed globally.
//!
//! Transports propagate the context with [`inject_context`] and
//! [`extract_context`], which always speak W3C Trace Context regardless
//! of the global propagator.
//!
//! # Example
//!
//! ```rust,ignore
//! use sonar_telemetry::tracing::{TracingConfig, init_tracing};
//!
//! let config = TracingConfig { enabled: true, ..Default::default() };
//! let provider = init_tracing(&config)?;
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether tracing is enabled.
    pub enabled: bool,

    /// OTLP endpoint (e.g., `http://localhost:4317`).
    pub otlp_endpoint: String,

    /// Service name for spans.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,

    /// Sampling ratio (0.0 to 1.0).
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "sonar".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sample_ratio: 1.0,
        }
    }
}

/// Initializes the tracing subsystem.
///
/// Returns the provider so the caller can flush it on shutdown, or `None`
/// when tracing is disabled.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }

    if !(0.0..=1.0).contains(&config.sample_ratio) {
        return Err(TelemetryError::InvalidConfig(format!(
            "sample_ratio must be between 0.0 and 1.0, got {}",
            config.sample_ratio
        )));
    }

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            config.service_version.clone(),
        ),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    let sampler = if config.sample_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sample_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sample_ratio)
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(Sampler::ParentBased(Box::new(sampler)))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(Some(provider))
}

/// Shuts down the global tracer provider.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}

/// Returns a tracer for creating spans.
///
/// No-op until [`init_tracing`] installs a provider.
#[must_use]
pub fn tracer(name: &'static str) -> global::BoxedTracer {
    global::tracer(name)
}

/// Extracts a W3C trace context from a carrier.
pub fn extract_context<T: Extractor>(carrier: &T) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(carrier)
}

/// Injects the W3C trace context of `context` into a carrier.
///
/// Nothing is written when the context holds no valid span.
pub fn inject_context<T: Injector>(context: &opentelemetry::Context, carrier: &mut T) {
    TraceContextPropagator::new().inject_context(context, carrier);
}

/// HTTP header extractor for `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// HTTP header injector for `http::HeaderMap`.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}
