//! Endpoint middleware trait and chain composition.
//!
//! Endpoint middleware decorates a [`BoxEndpoint`] and returns another one
//! with the same request and response types. Stages never mutate the
//! endpoint they wrap; they substitute a new one around it.
//!
//! # Example
//!
//! ```ignore
//! use sonar_middleware::{Chain, Middleware};
//! use sonar_middleware::stages::{CircuitBreakerMiddleware, RateLimitMiddleware};
//!
//! let endpoint = Chain::new(base)
//!     .layer(&RateLimitMiddleware::builder().refill_per_sec(1.0).burst(100).build())
//!     .layer(&CircuitBreakerMiddleware::new(settings))
//!     .build();
//! ```

use sonar_core::BoxEndpoint;

/// The endpoint middleware trait.
///
/// # Invariants
///
/// - The wrapped endpoint is called at most once per call
/// - Errors from the wrapped endpoint are returned unchanged
/// - Cancellation errors are never rewritten
pub trait Middleware<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Returns the name of this middleware stage.
    ///
    /// This name is used for logging and debugging.
    fn name(&self) -> &'static str;

    /// Wraps `inner`, returning the decorated endpoint.
    fn wrap(&self, inner: BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp>;
}

/// Builds a decorated endpoint, innermost stage first.
pub struct Chain<Req, Resp> {
    endpoint: BoxEndpoint<Req, Resp>,
    stages: Vec<&'static str>,
}

impl<Req, Resp> Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Starts a chain around a base endpoint.
    pub fn new(endpoint: BoxEndpoint<Req, Resp>) -> Self {
        Self {
            endpoint,
            stages: Vec::new(),
        }
    }

    /// Wraps the current endpoint with `middleware`.
    ///
    /// Each call adds a layer outside all previous ones.
    #[must_use]
    pub fn layer<M>(mut self, middleware: &M) -> Self
    where
        M: Middleware<Req, Resp> + ?Sized,
    {
        self.endpoint = middleware.wrap(self.endpoint);
        self.stages.push(middleware.name());
        self
    }

    /// Returns the stage names, innermost first.
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }

    /// Returns the decorated endpoint.
    pub fn build(self) -> BoxEndpoint<Req, Resp> {
        self.endpoint
    }
}

impl<Req, Resp> std::fmt::Debug for Chain<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}
