//! # Sonar Core
//!
//! Core types and traits for Sonar, a liveness probe served over HTTP/JSON,
//! gRPC and Thrift.
//!
//! This crate holds everything that is independent of wire format and
//! resilience policy:
//!
//! - [`ProbeService`] and its basic implementation [`BasicService`]
//! - [`CallContext`], the per-call context (request ID, trace context,
//!   deadline, cancellation)
//! - [`Endpoint`], the generic operation shape that middleware and
//!   transports compose around
//! - [`SonarError`] and the domain error [`ProbeError`]
//!
//! ## Data flow
//!
//! ```text
//! wire → decode → PingRequest → endpoint middleware → ping endpoint
//!                                                        ↓
//! wire ← encode ← PingResponse ← endpoint middleware ← ProbeService
//! ```
//!
//! ## Example
//!
//! ```
//! use sonar_core::{make_ping_endpoint, BasicService, CallContext, Endpoint, PingRequest};
//!
//! # tokio_test::block_on(async {
//! let service = BasicService::seeded(0.0, 42).unwrap();
//! let endpoint = make_ping_endpoint(service);
//!
//! let response = endpoint.call(&CallContext::new(), PingRequest::default()).await.unwrap();
//! assert_eq!(response.payload(), "pong");
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/sonar-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod endpoint;
pub mod error;
pub mod service;

pub use context::{CallContext, RequestId};
pub use endpoint::{
    make_ping_endpoint, BoxEndpoint, BoxFuture, Endpoint, Failer, FnEndpoint, PingBody,
    PingRequest, PingResponse,
};
pub use error::{
    err_from_string, err_string, ErrorBody, ErrorCategory, ProbeError, SonarError, SonarResult,
};
pub use service::{BasicService, ProbeService, DEFAULT_FAILURE_RATE, PONG};

/// Name of the ping method as it appears on the wire and in telemetry.
pub const PING_METHOD: &str = "Ping";
