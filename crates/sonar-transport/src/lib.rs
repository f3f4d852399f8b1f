//! # Sonar Transport
//!
//! Wire adapters for Sonar's Endpoint Set, each with a server and a
//! client role:
//!
//! - [`http`]: JSON over HTTP/1.1 (hyper server, reqwest client)
//! - [`grpc`]: protobuf over tonic, service `sonar.Probe`
//! - [`thrift`]: Thrift binary protocol over TCP, buffered or framed
//!
//! Servers decode the wire request, call the set's ping endpoint and
//! encode the reply; a domain failure always rides the success channel
//! of the protocol (418 body, `err` field, `Err` field) while endpoint
//! errors use the protocol's native error channel. Clients do the
//! reverse and come wrapped in the client-side middleware, so they can
//! stand in for any [`ProbeService`](sonar_core::ProbeService).
//!
//! All servers stop on a shared [`ShutdownSignal`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use sonar_core::BasicService;
//! use sonar_middleware::{EndpointSet, SetOptions};
//! use sonar_transport::{bind, HttpServer, ShutdownSignal};
//!
//! let endpoints = EndpointSet::server(BasicService::new(0.1)?, &SetOptions::new());
//! let listener = bind("0.0.0.0:8081").await?;
//! HttpServer::new(endpoints).serve(listener, ShutdownSignal::with_os_signals()).await?;
//! ```

#![doc(html_root_url = "https://docs.rs/sonar-transport/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod grpc;
pub mod http;
pub mod shutdown;
pub mod thrift;

pub use error::{bind, ServeError};
pub use grpc::{GrpcClient, GrpcServer};
pub use crate::http::{HttpClient, HttpServer};
pub use shutdown::{ConnectionTracker, ShutdownSignal, DEFAULT_SHUTDOWN_TIMEOUT};
pub use thrift::{ThriftClient, ThriftServer, TransportMode};
