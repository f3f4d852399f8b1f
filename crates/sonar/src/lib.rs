//! # Sonar
//!
//! A ping/probe service reachable over HTTP/JSON, gRPC and Thrift.
//!
//! This crate wires the pieces together:
//!
//! - [`server`] builds the probe service and its Endpoint Set from a
//!   [`SonarConfig`](config::SonarConfig) and serves every configured
//!   transport until shutdown
//! - [`client`] connects to a running server over any transport and
//!   returns a value usable as a [`ProbeService`](core::ProbeService)
//!
//! The `sonar-server` and `sonar-cli` binaries are thin wrappers around
//! these two modules.
//!
//! ## Architecture
//!
//! ```text
//! BasicService → LoggingService → InstrumentingService
//!      ↓ Endpoint Set (rate limit, breaker, tracing, logging, instrumenting)
//! HTTP/JSON | gRPC | Thrift
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use sonar::config::ConfigLoader;
//! use sonar::server::SonarServer;
//! use sonar::transport::ShutdownSignal;
//!
//! let config = ConfigLoader::new().with_defaults().load()?;
//! let server = SonarServer::bind(config).await?;
//! server.serve(ShutdownSignal::with_os_signals()).await?;
//! ```

#![doc(html_root_url = "https://docs.rs/sonar/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
mod error;
pub mod server;

pub use error::AppError;

// Re-export the member crates
pub use sonar_config as config;
pub use sonar_core as core;
pub use sonar_middleware as middleware;
pub use sonar_telemetry as telemetry;
pub use sonar_transport as transport;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{connect, Target};
    pub use crate::server::SonarServer;
    pub use sonar_core::{CallContext, ProbeService, SonarError, SonarResult};
    pub use sonar_middleware::{EndpointSet, SetOptions};
    pub use sonar_transport::ShutdownSignal;
}
