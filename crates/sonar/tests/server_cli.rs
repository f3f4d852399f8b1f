//! End-to-end tests of the assembled server and the command-line client.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use sonar::client::{connect, Target};
use sonar::config::{ConfigLoader, SonarConfig};
use sonar::core::{CallContext, ProbeService};
use sonar::middleware::LogSink;
use sonar::server::{BoundAddrs, SonarServer};
use sonar::transport::{ShutdownSignal, TransportMode};

fn config(failure_rate: f64, framed: bool) -> SonarConfig {
    let mut config = SonarConfig::default();
    config.server.http_addr = Some("127.0.0.1:0".to_string());
    config.server.grpc_addr = Some("127.0.0.1:0".to_string());
    config.server.thrift_addr = Some("127.0.0.1:0".to_string());
    config.server.thrift_framed = framed;
    config.probe.failure_rate = failure_rate;
    config.probe.seed = Some(42);
    config
}

async fn start(config: SonarConfig) -> (BoundAddrs, ShutdownSignal) {
    let server = SonarServer::bind(config).await.unwrap();
    let addrs = server.local_addrs();
    let shutdown = ShutdownSignal::new();
    tokio::spawn(server.serve(shutdown.clone()));
    (addrs, shutdown)
}

fn targets(addrs: BoundAddrs, mode: TransportMode) -> Vec<Target> {
    let addr = |a: Option<SocketAddr>| a.unwrap().to_string();
    vec![
        Target::Http(addr(addrs.http)),
        Target::Grpc(addr(addrs.grpc)),
        Target::Thrift {
            addr: addr(addrs.thrift),
            mode,
            buffer_size: 4096,
        },
    ]
}

#[tokio::test]
async fn test_every_transport_answers_pong() {
    for mode in [TransportMode::Buffered, TransportMode::Framed] {
        let (addrs, shutdown) = start(config(0.0, mode == TransportMode::Framed)).await;

        for target in targets(addrs, mode) {
            let client = connect(&target, Some(Duration::from_secs(5)), LogSink::discard()).unwrap();
            let payload = client.ping(&CallContext::new()).await.unwrap();
            assert_eq!(payload, "pong", "{target:?}");
        }
        shutdown.trigger();
    }
}

#[tokio::test]
async fn test_every_transport_reports_domain_failure() {
    let (addrs, shutdown) = start(config(1.0, false)).await;

    for target in targets(addrs, TransportMode::Buffered) {
        let client = connect(&target, Some(Duration::from_secs(5)), LogSink::discard()).unwrap();
        let err = client.ping(&CallContext::new()).await.unwrap_err();
        assert!(err.is_domain(), "{target:?}: {err:?}");
        assert_eq!(err.to_string(), "probe failed");
    }
    shutdown.trigger();
}

#[tokio::test]
async fn test_server_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[server]
http_addr = "127.0.0.1:0"
grpc_addr = ""
thrift_addr = "127.0.0.1:0"
thrift_framed = true

[probe]
failure_rate = 0.0
"#
    )
    .unwrap();

    let config = ConfigLoader::new()
        .with_defaults()
        .with_file(file.path())
        .unwrap()
        .with_env_prefix("SONARFACADETEST")
        .load()
        .unwrap();
    let (addrs, shutdown) = start(config).await;
    assert!(addrs.grpc.is_none());

    let target = Target::Thrift {
        addr: addrs.thrift.unwrap().to_string(),
        mode: TransportMode::Framed,
        buffer_size: 0,
    };
    let client = connect(&target, None, LogSink::discard()).unwrap();
    assert_eq!(client.ping(&CallContext::new()).await.unwrap(), "pong");
    shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_binary() {
    let (addrs, shutdown) = start(config(0.0, false)).await;
    let cli = env!("CARGO_BIN_EXE_sonar-cli");

    let output = tokio::process::Command::new(cli)
        .args(["--http-addr", &addrs.http.unwrap().to_string()])
        .output()
        .await
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "ping = pong");

    let output = tokio::process::Command::new(cli)
        .args([
            "--thrift-addr",
            &addrs.thrift.unwrap().to_string(),
            "--thrift-protocol",
            "compact",
        ])
        .output()
        .await
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error: "));

    let output = tokio::process::Command::new(cli)
        .args(["--grpc-addr", &addrs.grpc.unwrap().to_string(), "--method", "pong"])
        .output()
        .await
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid method"));

    shutdown.trigger();
}
