//! Top-level configuration type.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{
    CircuitBreakerConfig, ConfigError, LogFormat, ProbeConfig, RateLimitConfig, ServerConfig,
    TelemetrySection,
};

/// Complete Sonar configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and
/// environment variables on top of the defaults.
///
/// # Example
///
/// ```
/// use sonar_config::SonarConfig;
///
/// let config = SonarConfig::default();
/// assert_eq!(config.rate_limit.burst, 100);
/// assert_eq!(config.circuit_breaker.failure_threshold, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SonarConfig {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Probe service behavior.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Server-side rate limiter.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Server-side circuit breaker.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Logging, metrics and tracing.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl SonarConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for the first field that is out
    /// of range or unparseable, and `ConfigError::ValidationError` when no
    /// transport is enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let listeners = [
            ("server.http_addr", &self.server.http_addr),
            ("server.grpc_addr", &self.server.grpc_addr),
            ("server.thrift_addr", &self.server.thrift_addr),
        ];
        for (field, addr) in listeners {
            if let Some(addr) = addr {
                parse_addr(field, addr)?;
            }
        }
        if listeners.iter().all(|(_, addr)| addr.is_none()) {
            return Err(ConfigError::validation_error(
                "at least one of server.http_addr, server.grpc_addr, server.thrift_addr must be set",
            ));
        }

        if !self.server.thrift_protocol.eq_ignore_ascii_case("binary") {
            return Err(ConfigError::invalid_value(
                "server.thrift_protocol",
                format!(
                    "unsupported protocol '{}', only 'binary' is available",
                    self.server.thrift_protocol
                ),
            ));
        }

        if !(0.0..=1.0).contains(&self.probe.failure_rate) {
            return Err(ConfigError::invalid_value(
                "probe.failure_rate",
                "must be between 0.0 and 1.0",
            ));
        }

        if !self.rate_limit.refill_per_sec.is_finite() || self.rate_limit.refill_per_sec < 0.0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.refill_per_sec",
                "must be a non-negative number",
            ));
        }
        if self.rate_limit.burst == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.burst",
                "must be at least 1",
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid_value(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker.reset_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "circuit_breaker.reset_timeout_secs",
                "must be at least 1",
            ));
        }

        if self.telemetry.metrics.enabled {
            parse_addr("telemetry.metrics.addr", &self.telemetry.metrics.addr)?;
        }

        if !(0.0..=1.0).contains(&self.telemetry.tracing.sampling_ratio) {
            return Err(ConfigError::invalid_value(
                "telemetry.tracing.sampling_ratio",
                "must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset: pretty, colored debug
    /// logs and no metrics listener.
    ///
    /// # Example
    ///
    /// ```
    /// use sonar_config::{LogFormat, SonarConfig};
    ///
    /// let config = SonarConfig::development();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.metrics.enabled = false;
        config.telemetry.environment = "development".to_string();
        config
    }

    /// Create a production configuration preset: JSON logs at info level.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.environment = "production".to_string();
        config
    }

    /// Converts the telemetry section into the bootstrap configuration
    /// understood by `sonar-telemetry`. The service name and environment
    /// are stamped on both log lines and spans.
    #[must_use]
    pub fn telemetry_config(&self) -> sonar_telemetry::TelemetryConfig {
        let section = &self.telemetry;

        let logging = sonar_telemetry::LogConfig {
            enabled: section.logging.enabled,
            level: section.logging.level.clone(),
            json_format: section.logging.format == LogFormat::Json,
            ansi: section.logging.ansi_enabled,
            service_name: section.service_name.clone(),
            ..sonar_telemetry::LogConfig::default()
        };

        let metrics = sonar_telemetry::MetricsConfig {
            enabled: section.metrics.enabled,
            addr: section.metrics.addr.clone(),
            ..sonar_telemetry::MetricsConfig::default()
        };

        let tracing_defaults = sonar_telemetry::TracingConfig::default();
        let tracing = sonar_telemetry::TracingConfig {
            enabled: section.tracing.enabled,
            otlp_endpoint: section
                .tracing
                .otlp_endpoint
                .clone()
                .unwrap_or(tracing_defaults.otlp_endpoint),
            service_name: section.service_name.clone(),
            environment: section.environment.clone(),
            sample_ratio: section.tracing.sampling_ratio,
            ..tracing_defaults
        };

        sonar_telemetry::TelemetryConfig {
            logging,
            metrics,
            tracing,
        }
    }
}

fn parse_addr(field: &str, addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|_| ConfigError::invalid_value(field, format!("invalid socket address: {addr}")))
}
