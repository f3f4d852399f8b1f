//! Loading configuration from files on disk.

use std::io::Write;

use sonar_config::{ConfigError, ConfigLoader, LogFormat};

fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_complete_toml_file() {
    let file = write_file(
        ".toml",
        r#"
        [server]
        http_addr = "127.0.0.1:18081"
        thrift_addr = "127.0.0.1:18083"
        thrift_framed = true
        shutdown_timeout_secs = 5

        [probe]
        failure_rate = 0.25
        seed = 99

        [rate_limit]
        refill_per_sec = 10.0
        burst = 20

        [circuit_breaker]
        failure_threshold = 3
        reset_timeout_secs = 10

        [telemetry]
        service_name = "probe-north"

        [telemetry.metrics]
        enabled = false

        [telemetry.logging]
        level = "sonar=debug"
        format = "pretty"
        "#,
    );

    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();

    assert_eq!(config.server.http_addr.as_deref(), Some("127.0.0.1:18081"));
    assert_eq!(config.server.grpc_addr.as_deref(), Some("0.0.0.0:8082"));
    assert!(config.server.thrift_framed);
    assert_eq!(config.probe.seed, Some(99));
    assert_eq!(config.rate_limit.burst, 20);
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.telemetry.service_name, "probe-north");
    assert!(!config.telemetry.metrics.enabled);
    assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
}

#[test]
fn test_json_file() {
    let file = write_file(".json", r#"{"probe": {"failure_rate": 1.0}}"#);
    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
    assert!((config.probe.failure_rate - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_unknown_field_in_file() {
    let file = write_file(".toml", "[rate_limit]\nrefill = 3.0\n");
    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlError(_))));
}

#[test]
fn test_unsupported_extension() {
    let file = write_file(".yaml", "probe: {}\n");
    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_environment_overrides_file() {
    let file = write_file(".toml", "[rate_limit]\nburst = 20\n");
    std::env::set_var("SONARFILETEST__RATE_LIMIT__BURST", "3");

    let config = ConfigLoader::new()
        .with_file(file.path())
        .unwrap()
        .with_env_prefix("SONARFILETEST")
        .load()
        .unwrap();

    std::env::remove_var("SONARFILETEST__RATE_LIMIT__BURST");
    assert_eq!(config.rate_limit.burst, 3);
}
