//! Configuration schema types.
//!
//! Every section rejects unknown fields so a typo in a file fails loudly
//! instead of silently falling back to a default.

use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// Each transport listens only when its address is set. An empty address
/// in the environment disables the transport.
///
/// # Example
///
/// ```
/// use sonar_config::ServerConfig;
///
/// let config = ServerConfig {
///     grpc_addr: None,
///     ..Default::default()
/// };
/// assert_eq!(config.http_addr.as_deref(), Some("0.0.0.0:8081"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP/JSON listen address. An empty string disables it.
    #[serde(default = "default_http_addr", deserialize_with = "listen_addr")]
    pub http_addr: Option<String>,

    /// gRPC listen address. An empty string disables it.
    #[serde(default = "default_grpc_addr", deserialize_with = "listen_addr")]
    pub grpc_addr: Option<String>,

    /// Thrift listen address. An empty string disables it.
    #[serde(default = "default_thrift_addr", deserialize_with = "listen_addr")]
    pub thrift_addr: Option<String>,

    /// Thrift protocol. Only `binary` is supported.
    #[serde(default = "default_thrift_protocol")]
    pub thrift_protocol: String,

    /// Use the framed Thrift transport instead of the buffered one.
    #[serde(default)]
    pub thrift_framed: bool,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            grpc_addr: default_grpc_addr(),
            thrift_addr: default_thrift_addr(),
            thrift_protocol: default_thrift_protocol(),
            thrift_framed: false,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn listen_addr<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let addr = Option::<String>::deserialize(deserializer)?;
    Ok(addr.filter(|addr| !addr.is_empty()))
}

#[allow(clippy::unnecessary_wraps)]
fn default_http_addr() -> Option<String> {
    Some("0.0.0.0:8081".to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn default_grpc_addr() -> Option<String> {
    Some("0.0.0.0:8082".to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn default_thrift_addr() -> Option<String> {
    Some("0.0.0.0:8083".to_string())
}

fn default_thrift_protocol() -> String {
    "binary".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Probe service configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Probability in `[0, 1]` that a ping fails with the domain error.
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Fixed RNG seed. Drawn from OS entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            failure_rate: default_failure_rate(),
            seed: None,
        }
    }
}

fn default_failure_rate() -> f64 {
    0.1
}

/// Rate limiter configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_per_sec: default_refill_per_sec(),
            burst: default_burst(),
        }
    }
}

fn default_refill_per_sec() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    100
}

/// Circuit breaker configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive endpoint errors that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before admitting a trial call.
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> u64 {
    60
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable metrics collection and export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus metrics endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    /// Enable span export.
    #[serde(default)]
    pub enabled: bool,

    /// OTLP exporter endpoint (e.g., `http://localhost:4317`).
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Sampling ratio (0.0 to 1.0).
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

fn default_sampling_ratio() -> f64 {
    1.0
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs.
    #[default]
    Json,
    /// Human-readable format.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (trace, debug, info, warn, error, or per target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service name reported in logs and spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Tracing settings.
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            metrics: MetricsConfig::default(),
            tracing: TracingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "sonar".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}
