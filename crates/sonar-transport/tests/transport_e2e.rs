//! End-to-end tests over real sockets.
//!
//! Each test starts servers on ephemeral ports and talks to them through
//! the matching client set, checking that the three transports agree:
//!
//! 1. Success carries the same payload everywhere
//! 2. A domain failure reaches the caller as the same domain error
//! 3. Endpoint errors surface through each protocol's error channel

use std::time::Duration;

use sonar_core::{BasicService, CallContext, ProbeError, ProbeService, SonarError};
use sonar_middleware::{EndpointSet, LogSink, SetOptions};
use sonar_transport::{
    grpc, http, thrift, GrpcServer, HttpServer, ShutdownSignal, ThriftServer, TransportMode,
};
use tokio::net::TcpListener;

struct Servers {
    http: String,
    grpc: String,
    thrift: String,
    shutdown: ShutdownSignal,
}

impl Servers {
    async fn start(failure_rate: f64, options: &SetOptions) -> Self {
        let endpoints = EndpointSet::server(BasicService::seeded(failure_rate, 21).unwrap(), options);
        let shutdown = ShutdownSignal::new();

        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let grpc_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let thrift_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let servers = Self {
            http: http_listener.local_addr().unwrap().to_string(),
            grpc: grpc_listener.local_addr().unwrap().to_string(),
            thrift: thrift_listener.local_addr().unwrap().to_string(),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(HttpServer::new(endpoints.clone()).serve(http_listener, shutdown.clone()));
        tokio::spawn(GrpcServer::new(endpoints.clone()).serve(grpc_listener, shutdown.clone()));
        tokio::spawn(
            ThriftServer::new(endpoints, TransportMode::Framed).serve(thrift_listener, shutdown),
        );
        servers
    }

    fn clients(&self) -> Vec<(&'static str, EndpointSet)> {
        let timeout = Some(Duration::from_secs(5));
        vec![
            (
                "http",
                http::client::new_client(&self.http, timeout, &quiet(SetOptions::http_client()))
                    .unwrap(),
            ),
            (
                "grpc",
                grpc::client::new_client(&self.grpc, timeout, &quiet(SetOptions::grpc_client()))
                    .unwrap(),
            ),
            (
                "thrift",
                thrift::client::new_client(
                    &self.thrift,
                    TransportMode::Framed,
                    0,
                    timeout,
                    &quiet(SetOptions::thrift_client()),
                )
                .unwrap(),
            ),
        ]
    }
}

impl Drop for Servers {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn quiet(options: SetOptions) -> SetOptions {
    options.logger(LogSink::discard())
}

#[tokio::test]
async fn test_raw_http_ping() {
    let servers = Servers::start(0.0, &quiet(SetOptions::new())).await;
    let url = format!("http://{}/ping", servers.http);

    let response = reqwest::Client::new()
        .post(&url)
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), r#"{"p":"pong"}"#);

    let response = reqwest::Client::new().get(&url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_transports_agree_on_success() {
    let servers = Servers::start(0.0, &quiet(SetOptions::new())).await;
    let ctx = CallContext::new();

    for (name, client) in servers.clients() {
        assert_eq!(client.ping(&ctx).await.unwrap(), "pong", "{name}");
    }
}

#[tokio::test]
async fn test_transports_agree_on_domain_failure() {
    let servers = Servers::start(1.0, &quiet(SetOptions::new())).await;
    let ctx = CallContext::new();

    for (name, client) in servers.clients() {
        let err = client.ping(&ctx).await.unwrap_err();
        assert!(err.is_domain(), "{name}: {err:?}");
        assert_eq!(err, SonarError::Probe(ProbeError::remote("probe failed")), "{name}");
    }
}

#[tokio::test]
async fn test_server_rejection_is_not_a_domain_failure() {
    let servers = Servers::start(0.0, &quiet(SetOptions::new().rate_limit(0.0, 1))).await;
    let ctx = CallContext::new();
    let clients = servers.clients();

    assert!(clients[0].1.ping(&ctx).await.is_ok());
    for (name, client) in &clients {
        let err = client.ping(&ctx).await.unwrap_err();
        assert!(!err.is_domain(), "{name}: {err:?}");
        assert!(err.to_string().contains("rate limit exceeded"), "{name}: {err}");
    }
}

#[tokio::test]
async fn test_client_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    // accepts but never answers
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = thrift::client::new_client(
        &addr,
        TransportMode::Buffered,
        0,
        None,
        &quiet(SetOptions::thrift_client()),
    )
    .unwrap();
    let ctx = CallContext::new().with_timeout(Duration::from_millis(100));
    assert_eq!(client.ping(&ctx).await, Err(SonarError::DeadlineExceeded));
}
