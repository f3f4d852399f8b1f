//! Client assembly.
//!
//! [`connect`] picks the transport named by a [`Target`] and returns the
//! client-side Endpoint Set for it, which implements
//! [`ProbeService`](sonar_core::ProbeService).

use std::time::Duration;

use sonar_core::{SonarError, SonarResult};
use sonar_middleware::{EndpointSet, LogSink, SetOptions};
use sonar_transport::{grpc, http, thrift, TransportMode};

/// The only Thrift protocol available.
pub const THRIFT_BINARY: &str = "binary";

/// Where and how to reach a Sonar server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// HTTP/JSON at `host:port` or a base URL.
    Http(String),
    /// gRPC at `host:port`.
    Grpc(String),
    /// Thrift binary protocol at `host:port`.
    Thrift {
        /// Server address.
        addr: String,
        /// Buffered or framed transport.
        mode: TransportMode,
        /// Connection buffer size; zero is unbuffered.
        buffer_size: usize,
    },
}

impl Target {
    /// Returns the transport name.
    #[must_use]
    pub const fn transport(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Grpc(_) => "grpc",
            Self::Thrift { .. } => "thrift",
        }
    }
}

/// Checks a Thrift protocol name.
///
/// `compact`, `json` and `simplejson` are known but not provided.
pub fn check_thrift_protocol(name: &str) -> SonarResult<()> {
    match name {
        "" | THRIFT_BINARY => Ok(()),
        "compact" | "json" | "simplejson" => Err(SonarError::config(format!(
            "Thrift protocol {name:?} is not supported, only {THRIFT_BINARY:?} is"
        ))),
        other => Err(SonarError::config(format!("invalid protocol {other:?}"))),
    }
}

/// Connects to `target` with the transport's client defaults.
///
/// `timeout` bounds every HTTP call and the connection setup of gRPC
/// and Thrift.
pub fn connect(
    target: &Target,
    timeout: Option<Duration>,
    sink: LogSink,
) -> SonarResult<EndpointSet> {
    match target {
        Target::Http(addr) => {
            http::client::new_client(addr, timeout, &SetOptions::http_client().logger(sink))
        }
        Target::Grpc(addr) => {
            grpc::client::new_client(addr, timeout, &SetOptions::grpc_client().logger(sink))
        }
        Target::Thrift {
            addr,
            mode,
            buffer_size,
        } => thrift::client::new_client(
            addr,
            *mode,
            *buffer_size,
            timeout,
            &SetOptions::thrift_client().logger(sink),
        ),
    }
}
