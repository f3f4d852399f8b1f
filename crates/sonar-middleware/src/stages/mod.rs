//! Endpoint middleware stages.
//!
//! The server Endpoint Set layers them innermost first:
//!
//! 1. [`rate_limit`] - Token bucket admission
//! 2. [`circuit_breaker`] - Fail fast while the endpoint keeps failing
//! 3. [`tracing`] - OpenTelemetry span per call
//! 4. [`logging`] - One log line per call
//! 5. [`instrumenting`] - Duration histogram
//!
//! Client sets use only the first three.

pub mod circuit_breaker;
pub mod instrumenting;
pub mod logging;
pub mod rate_limit;
pub mod tracing;

// Re-export main types
pub use circuit_breaker::{BreakerSettings, BreakerState, CircuitBreaker, CircuitBreakerMiddleware, Permit};
pub use instrumenting::InstrumentingMiddleware;
pub use logging::LoggingMiddleware;
pub use rate_limit::{RateLimitBuilder, RateLimitMiddleware, TokenBucket};
pub use tracing::TracingMiddleware;
