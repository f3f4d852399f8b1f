//! Rate limiting middleware.
//!
//! A token bucket shared by every call through the decorated endpoint.
//! The bucket starts full, refills continuously, and never holds more
//! than its burst capacity. A call that finds no token is rejected with
//! [`SonarError::RateLimited`] without ever reaching the wrapped endpoint;
//! the limiter does not queue or wait.
//!
//! ## Example
//!
//! ```
//! use sonar_middleware::stages::RateLimitMiddleware;
//!
//! let rate_limit = RateLimitMiddleware::builder()
//!     .refill_per_sec(1.0)
//!     .burst(100)
//!     .build();
//! assert_eq!(rate_limit.bucket().capacity(), 100);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use sonar_core::{BoxEndpoint, BoxFuture, CallContext, Endpoint, SonarError, SonarResult};
use tokio::time::Instant;

use crate::middleware::Middleware;

/// Default refill rate in tokens per second.
pub const DEFAULT_REFILL_PER_SEC: f64 = 1.0;

/// Default bucket capacity.
pub const DEFAULT_BURST: u32 = 100;

/// A token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// A zero capacity is raised to one so the bucket can admit anything at
    /// all; a negative or non-finite rate is treated as no refill.
    #[must_use]
    pub fn new(refill_per_sec: f64, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        let refill_per_sec = if refill_per_sec.is_finite() {
            refill_per_sec.max(0.0)
        } else {
            0.0
        };
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Returns the burst capacity.
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the refill rate in tokens per second.
    pub const fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Takes one token if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns the number of whole tokens currently available.
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens.floor() as u32
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.last_refill = now;
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(f64::from(self.capacity));
    }
}

/// Builder for [`RateLimitMiddleware`].
#[derive(Debug, Clone)]
pub struct RateLimitBuilder {
    refill_per_sec: f64,
    burst: u32,
}

impl Default for RateLimitBuilder {
    fn default() -> Self {
        Self {
            refill_per_sec: DEFAULT_REFILL_PER_SEC,
            burst: DEFAULT_BURST,
        }
    }
}

impl RateLimitBuilder {
    /// Creates a builder with the default rate (1 token/s, burst 100).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the refill rate in tokens per second.
    #[must_use]
    pub fn refill_per_sec(mut self, rate: f64) -> Self {
        self.refill_per_sec = rate;
        self
    }

    /// Sets the bucket capacity.
    #[must_use]
    pub fn burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Builds the middleware with a fresh bucket.
    #[must_use]
    pub fn build(self) -> RateLimitMiddleware {
        RateLimitMiddleware::shared(Arc::new(TokenBucket::new(self.refill_per_sec, self.burst)))
    }
}

/// Rate limiting middleware.
///
/// Cloning shares the bucket.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    bucket: Arc<TokenBucket>,
}

impl RateLimitMiddleware {
    /// Creates a new rate limit builder.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Uses an existing bucket, so several endpoints draw from one budget.
    #[must_use]
    pub const fn shared(bucket: Arc<TokenBucket>) -> Self {
        Self { bucket }
    }

    /// Returns the bucket.
    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}

impl Default for RateLimitMiddleware {
    fn default() -> Self {
        RateLimitBuilder::new().build()
    }
}

impl<Req, Resp> Middleware<Req, Resp> for RateLimitMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn wrap(&self, inner: BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp> {
        Arc::new(RateLimited {
            bucket: self.bucket.clone(),
            inner,
        })
    }
}

struct RateLimited<Req, Resp> {
    bucket: Arc<TokenBucket>,
    inner: BoxEndpoint<Req, Resp>,
}

impl<Req, Resp> Endpoint<Req, Resp> for RateLimited<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a CallContext, request: Req) -> BoxFuture<'a, SonarResult<Resp>> {
        if !self.bucket.try_acquire() {
            tracing::debug!(request_id = %ctx.request_id(), "rate limit exceeded");
            return Box::pin(async { Err(SonarError::RateLimited) });
        }
        self.inner.call(ctx, request)
    }
}
