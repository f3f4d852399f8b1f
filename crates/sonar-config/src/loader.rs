//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, LogFormat, SonarConfig};

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "SONAR";

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. `.env` file, if requested
/// 4. Environment variables (`PREFIX__SECTION__KEY`)
///
/// # Example
///
/// ```no_run
/// use sonar_config::ConfigLoader;
///
/// # fn main() -> Result<(), sonar_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("sonar.toml")?
///     .with_dotenv()
///     .with_env_prefix("SONAR")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: SonarConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new loader starting from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SonarConfig::default(),
            env_prefix: None,
        }
    }

    /// Reset to the default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = SonarConfig::default();
        self
    }

    /// Start from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = SonarConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = SonarConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is picked from the extension: `.toml` or `.json`.
    /// Sections missing from the file keep their default values.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, malformed, or contains
    /// unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format (`toml` or
    /// `json`).
    ///
    /// # Example
    ///
    /// ```
    /// use sonar_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [probe]
    ///     failure_rate = 0.5
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert!((config.probe.failure_rate - 0.5).abs() < f64::EPSILON);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// With prefix `SONAR`:
    /// - `SONAR__SERVER__HTTP_ADDR=0.0.0.0:9000`
    /// - `SONAR__PROBE__FAILURE_RATE=0.5`
    /// - `SONAR__TELEMETRY__LOGGING__LEVEL=debug`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file from the current directory into the process
    /// environment. A missing file is ignored.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        let _ = dotenvy::dotenv();
        self
    }

    /// Apply environment overrides and validate.
    ///
    /// # Example
    ///
    /// ```
    /// use sonar_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().load().unwrap();
    /// assert_eq!(config.server.http_addr.as_deref(), Some("0.0.0.0:8081"));
    /// ```
    pub fn load(mut self) -> Result<SonarConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> SonarConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<SonarConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // SONARQUBE_TOKEN and friends share the prefix but not the separator
            return Ok(());
        };

        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = optional(value),
            ["SERVER", "GRPC_ADDR"] => config.server.grpc_addr = optional(value),
            ["SERVER", "THRIFT_ADDR"] => config.server.thrift_addr = optional(value),
            ["SERVER", "THRIFT_PROTOCOL"] => config.server.thrift_protocol = value.to_string(),
            ["SERVER", "THRIFT_FRAMED"] => config.server.thrift_framed = parse_flag(key, value)?,
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_num(key, value, "expected integer")?;
            }

            ["PROBE", "FAILURE_RATE"] => {
                config.probe.failure_rate = parse_num(key, value, "expected float")?;
            }
            ["PROBE", "SEED"] => {
                config.probe.seed = if value.is_empty() {
                    None
                } else {
                    Some(parse_num(key, value, "expected integer")?)
                };
            }

            ["RATE_LIMIT", "REFILL_PER_SEC"] => {
                config.rate_limit.refill_per_sec = parse_num(key, value, "expected float")?;
            }
            ["RATE_LIMIT", "BURST"] => {
                config.rate_limit.burst = parse_num(key, value, "expected integer")?;
            }

            ["CIRCUIT_BREAKER", "FAILURE_THRESHOLD"] => {
                config.circuit_breaker.failure_threshold =
                    parse_num(key, value, "expected integer")?;
            }
            ["CIRCUIT_BREAKER", "RESET_TIMEOUT_SECS"] => {
                config.circuit_breaker.reset_timeout_secs =
                    parse_num(key, value, "expected integer")?;
            }

            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "ENVIRONMENT"] => config.telemetry.environment = value.to_string(),

            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => config.telemetry.metrics.addr = value.to_string(),

            ["TELEMETRY", "TRACING", "ENABLED"] => {
                config.telemetry.tracing.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "TRACING", "OTLP_ENDPOINT"] => {
                config.telemetry.tracing.otlp_endpoint = optional(value);
            }
            ["TELEMETRY", "TRACING", "SAMPLING_RATIO"] => {
                config.telemetry.tracing.sampling_ratio = parse_num(key, value, "expected float")?;
            }

            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => config.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                config.telemetry.logging.ansi_enabled = parse_flag(key, value)?;
            }

            _ => {}
        }

        Ok(())
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str, reason: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, reason))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, SonarConfig::default());
    }

    #[test]
    fn test_loader_with_development() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.telemetry.logging.level, "debug");
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"rate_limit": {"refill_per_sec": 5.0, "burst": 10}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.rate_limit.burst, 10);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_loader_with_string_unknown_format() {
        assert!(ConfigLoader::new().with_string("", "yaml").is_err());
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/sonar.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/sonar.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config, SonarConfig::default());
    }

    #[test]
    fn test_load_validates() {
        let toml = "[probe]\nfailure_rate = 2.0\n";
        let loader = ConfigLoader::new().with_string(toml, "toml").unwrap();
        assert!(matches!(loader.load(), Err(ConfigError::InvalidValue { .. })));

        let loader = ConfigLoader::new().with_string(toml, "toml").unwrap();
        assert!((loader.load_unvalidated().probe.failure_rate - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_apply_env_var_server() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__SERVER__HTTP_ADDR", "127.0.0.1:9000", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SERVER__GRPC_ADDR", "", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SERVER__THRIFT_FRAMED", "yes", "TEST")
            .unwrap();
        assert_eq!(
            loader.config.server.http_addr.as_deref(),
            Some("127.0.0.1:9000")
        );
        assert!(loader.config.server.grpc_addr.is_none());
        assert!(loader.config.server.thrift_framed);
    }

    #[test]
    fn test_apply_env_var_middleware_sections() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__RATE_LIMIT__BURST", "7", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__CIRCUIT_BREAKER__RESET_TIMEOUT_SECS", "15", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__PROBE__SEED", "42", "TEST")
            .unwrap();
        assert_eq!(loader.config.rate_limit.burst, 7);
        assert_eq!(loader.config.circuit_breaker.reset_timeout_secs, 15);
        assert_eq!(loader.config.probe.seed, Some(42));
    }

    #[test]
    fn test_apply_env_var_telemetry() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "pretty", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__TELEMETRY__TRACING__ENABLED", "on", "TEST")
            .unwrap();
        assert_eq!(loader.config.telemetry.logging.format, LogFormat::Pretty);
        assert!(loader.config.telemetry.tracing.enabled);
    }

    #[test]
    fn test_apply_env_var_invalid_values() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("TEST__RATE_LIMIT__BURST", "lots", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__TELEMETRY__METRICS__ENABLED", "maybe", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "xml", "TEST")
            .is_err());
    }

    #[test]
    fn test_apply_env_var_ignores_foreign_keys() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TESTING_TOKEN", "x", "TEST").unwrap();
        loader.apply_env_var("TEST__UNKNOWN__KEY", "x", "TEST").unwrap();
        assert_eq!(loader.config, SonarConfig::default());
    }

    #[test]
    fn test_parse_bool() {
        for s in ["true", "True", "1", "yes", "on"] {
            assert_eq!(parse_bool(s), Some(true));
        }
        for s in ["false", "FALSE", "0", "no", "off"] {
            assert_eq!(parse_bool(s), Some(false));
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }
}
