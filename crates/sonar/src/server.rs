//! Server assembly.
//!
//! [`SonarServer::bind`] builds the probe service, wraps it in the
//! server-side Endpoint Set and binds one listener per configured
//! transport. [`SonarServer::serve`] runs them all until shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use sonar_config::{ProbeConfig, SonarConfig};
use sonar_core::{BasicService, ProbeService, SonarResult, PING_METHOD};
use sonar_middleware::{EndpointSet, LogSink, ServiceExt, SetOptions};
use sonar_telemetry::pings_counter;
use sonar_transport::{
    bind, GrpcServer, HttpServer, ServeError, ShutdownSignal, ThriftServer, TransportMode,
};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::AppError;

/// Overrides taken from the command line, applied after the config file
/// and environment.
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    /// HTTP listen address; empty disables HTTP.
    pub http_addr: Option<String>,
    /// gRPC listen address; empty disables gRPC.
    pub grpc_addr: Option<String>,
    /// Thrift listen address; empty disables Thrift.
    pub thrift_addr: Option<String>,
    /// Forces the framed Thrift transport.
    pub thrift_framed: bool,
    /// Probe failure rate.
    pub failure_rate: Option<f64>,
}

impl ServerOverrides {
    /// Applies the overrides and re-validates the result.
    pub fn apply(self, mut config: SonarConfig) -> Result<SonarConfig, AppError> {
        let listen = |addr: String| (!addr.is_empty()).then_some(addr);

        if let Some(addr) = self.http_addr {
            config.server.http_addr = listen(addr);
        }
        if let Some(addr) = self.grpc_addr {
            config.server.grpc_addr = listen(addr);
        }
        if let Some(addr) = self.thrift_addr {
            config.server.thrift_addr = listen(addr);
        }
        if self.thrift_framed {
            config.server.thrift_framed = true;
        }
        if let Some(rate) = self.failure_rate {
            config.probe.failure_rate = rate;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Server-side Endpoint Set options from configuration.
#[must_use]
pub fn set_options(config: &SonarConfig) -> SetOptions {
    SetOptions::new()
        .rate_limit(config.rate_limit.refill_per_sec, config.rate_limit.burst)
        .breaker_policy(
            config.circuit_breaker.failure_threshold,
            Duration::from_secs(config.circuit_breaker.reset_timeout_secs),
        )
}

/// Builds the probe service with its logging and counting decorators.
pub fn probe_service(config: &ProbeConfig, sink: LogSink) -> SonarResult<impl ProbeService> {
    let service = match config.seed {
        Some(seed) => BasicService::seeded(config.failure_rate, seed)?,
        None => BasicService::new(config.failure_rate)?,
    };
    Ok(service
        .logged(sink)
        .instrumented(pings_counter(PING_METHOD)))
}

/// Addresses the listeners ended up bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundAddrs {
    /// HTTP listener, if enabled.
    pub http: Option<SocketAddr>,
    /// gRPC listener, if enabled.
    pub grpc: Option<SocketAddr>,
    /// Thrift listener, if enabled.
    pub thrift: Option<SocketAddr>,
}

/// All configured transports, bound and ready to serve.
#[derive(Debug)]
pub struct SonarServer {
    endpoints: EndpointSet,
    http: Option<TcpListener>,
    grpc: Option<TcpListener>,
    thrift: Option<TcpListener>,
    thrift_mode: TransportMode,
    shutdown_timeout: Duration,
}

impl SonarServer {
    /// Validates `config`, builds the Endpoint Set and binds every
    /// configured listener.
    pub async fn bind(config: SonarConfig) -> Result<Self, AppError> {
        config.validate()?;

        let service = probe_service(&config.probe, LogSink::global())?;
        let endpoints = EndpointSet::server(service, &set_options(&config));

        Ok(Self {
            endpoints,
            http: bind_optional("http", config.server.http_addr.as_deref()).await?,
            grpc: bind_optional("grpc", config.server.grpc_addr.as_deref()).await?,
            thrift: bind_optional("thrift", config.server.thrift_addr.as_deref()).await?,
            thrift_mode: TransportMode::from_framed(config.server.thrift_framed),
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout_secs),
        })
    }

    /// Returns the bound addresses.
    #[must_use]
    pub fn local_addrs(&self) -> BoundAddrs {
        let addr = |listener: &Option<TcpListener>| {
            listener.as_ref().and_then(|l| l.local_addr().ok())
        };
        BoundAddrs {
            http: addr(&self.http),
            grpc: addr(&self.grpc),
            thrift: addr(&self.thrift),
        }
    }

    /// Returns the server-side Endpoint Set.
    #[must_use]
    pub const fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Serves every transport until `shutdown` triggers.
    ///
    /// If one server fails the others are shut down too and the first
    /// error is returned.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), AppError> {
        let mut tasks = JoinSet::new();

        if let Some(listener) = self.http {
            let server =
                HttpServer::new(self.endpoints.clone()).shutdown_timeout(self.shutdown_timeout);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { ("http", server.serve(listener, shutdown).await) });
        }
        if let Some(listener) = self.grpc {
            let server =
                GrpcServer::new(self.endpoints.clone()).shutdown_timeout(self.shutdown_timeout);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { ("grpc", server.serve(listener, shutdown).await) });
        }
        if let Some(listener) = self.thrift {
            let server = ThriftServer::new(self.endpoints.clone(), self.thrift_mode)
                .shutdown_timeout(self.shutdown_timeout);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { ("thrift", server.serve(listener, shutdown).await) });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((server, Err(e))) => AppError::serve(server, e),
                Err(e) => {
                    tracing::error!(error = %e, "server task panicked");
                    AppError::Task("transport")
                }
            };
            tracing::error!(error = %failure, "server failed, shutting down");
            shutdown.trigger();
            first_error.get_or_insert(failure);
        }

        first_error.map_or(Ok(()), Err)
    }
}

async fn bind_optional(
    server: &'static str,
    addr: Option<&str>,
) -> Result<Option<TcpListener>, AppError> {
    match addr {
        Some(addr) => bind(addr)
            .await
            .map(Some)
            .map_err(|e: ServeError| AppError::serve(server, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::CallContext;

    fn local_config() -> SonarConfig {
        let mut config = SonarConfig::default();
        config.server.http_addr = Some("127.0.0.1:0".to_string());
        config.server.grpc_addr = None;
        config.server.thrift_addr = None;
        config
    }

    #[test]
    fn test_overrides_apply() {
        let config = ServerOverrides {
            grpc_addr: Some(String::new()),
            thrift_addr: Some("127.0.0.1:9999".to_string()),
            thrift_framed: true,
            failure_rate: Some(0.5),
            ..Default::default()
        }
        .apply(SonarConfig::default())
        .unwrap();

        assert_eq!(config.server.http_addr.as_deref(), Some("0.0.0.0:8081"));
        assert_eq!(config.server.grpc_addr, None);
        assert_eq!(config.server.thrift_addr.as_deref(), Some("127.0.0.1:9999"));
        assert!(config.server.thrift_framed);
        assert!((config.probe.failure_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overrides_are_validated() {
        let result = ServerOverrides {
            failure_rate: Some(2.0),
            ..Default::default()
        }
        .apply(SonarConfig::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_set_options_from_config() {
        let mut config = SonarConfig::default();
        config.rate_limit.burst = 7;
        let debug = format!("{:?}", set_options(&config));
        assert!(debug.contains("burst: 7"), "{debug}");
    }

    #[tokio::test]
    async fn test_probe_service_honors_seed_and_rate() {
        let config = ProbeConfig {
            failure_rate: 0.0,
            seed: Some(3),
        };
        let service = probe_service(&config, LogSink::discard()).unwrap();
        assert_eq!(service.ping(&CallContext::new()).await.unwrap(), "pong");

        let invalid = ProbeConfig {
            failure_rate: -1.0,
            seed: None,
        };
        assert!(probe_service(&invalid, LogSink::discard()).is_err());
    }

    #[tokio::test]
    async fn test_bind_reports_addresses() {
        let server = SonarServer::bind(local_config()).await.unwrap();
        let addrs = server.local_addrs();
        assert!(addrs.http.is_some_and(|a| a.port() != 0));
        assert_eq!(addrs.grpc, None);
        assert_eq!(addrs.thrift, None);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = SonarServer::bind(local_config()).await.unwrap();
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(server.serve(shutdown.clone()));

        shutdown.trigger();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_serve_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = local_config();
        config.server.http_addr = Some(taken.local_addr().unwrap().to_string());

        let err = SonarServer::bind(config).await.unwrap_err();
        assert!(matches!(err, AppError::Serve { server: "http", .. }));
    }
}
