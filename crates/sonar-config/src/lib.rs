//! Typed configuration for Sonar.
//!
//! - TOML and JSON configuration files
//! - `.env` files and `SONAR__SECTION__KEY` environment overrides
//! - Strict parsing (unknown fields are errors)
//! - Validation of every range the middleware and transports rely on
//!
//! Only the binaries load configuration. Library crates take plain values.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8081"
//! grpc_addr = "0.0.0.0:8082"
//! thrift_addr = "0.0.0.0:8083"
//! thrift_protocol = "binary"
//! thrift_framed = false
//! shutdown_timeout_secs = 30
//!
//! [probe]
//! failure_rate = 0.1
//!
//! [rate_limit]
//! refill_per_sec = 1.0
//! burst = 100
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! reset_timeout_secs = 60
//!
//! [telemetry]
//! service_name = "sonar"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [telemetry.tracing]
//! enabled = false
//! sampling_ratio = 1.0
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::SonarConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::{
    CircuitBreakerConfig, LogFormat, LoggingConfig, MetricsConfig, ProbeConfig, RateLimitConfig,
    ServerConfig, TelemetrySection, TracingConfig,
};
