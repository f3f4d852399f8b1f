//! # Sonar Middleware
//!
//! Service and endpoint middleware for Sonar, and the Endpoint Set that
//! composes them.
//!
//! ## Two layers
//!
//! - **Service middleware** ([`service`]) wraps a [`ProbeService`] and sees
//!   the business result: payload or domain error.
//! - **Endpoint middleware** ([`stages`]) wraps a [`BoxEndpoint`] and sees
//!   the generic request/response plus the endpoint error. It handles
//!   admission, tracing and per-call telemetry.
//!
//! ## Server chain
//!
//! ```text
//! ProbeService ← LoggingService ← InstrumentingService
//!      ↓ make_ping_endpoint
//! RateLimit → CircuitBreaker → Tracing → Logging → Instrumenting → transport
//! ```
//!
//! ## Example
//!
//! ```
//! use sonar_core::{BasicService, CallContext, ProbeService};
//! use sonar_middleware::{EndpointSet, LogSink, ServiceExt, SetOptions};
//!
//! # tokio_test::block_on(async {
//! let service = BasicService::seeded(0.0, 7).unwrap().logged(LogSink::discard());
//! let set = EndpointSet::server(service, &SetOptions::new().logger(LogSink::discard()));
//!
//! assert_eq!(set.ping(&CallContext::new()).await.unwrap(), "pong");
//! # });
//! ```
//!
//! [`ProbeService`]: sonar_core::ProbeService
//! [`BoxEndpoint`]: sonar_core::BoxEndpoint

#![doc(html_root_url = "https://docs.rs/sonar-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod service;
pub mod set;
pub mod sink;
pub mod stages;

// Re-export main types at crate root
pub use middleware::{Chain, Middleware};
pub use service::{InstrumentingService, LoggingService, ServiceExt};
pub use set::{EndpointSet, SetOptions};
pub use sink::LogSink;
pub use stages::{BreakerSettings, BreakerState, TokenBucket};
