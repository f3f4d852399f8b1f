//! Circuit breaker middleware.
//!
//! ## States
//!
//! ```text
//!            N consecutive failures
//!   Closed ─────────────────────────▶ Open
//!     ▲                                 │ reset timeout elapsed
//!     │ trial succeeds                  ▼
//!     └──────────────────────────── HalfOpen ── trial fails ──▶ Open
//! ```
//!
//! - **Closed**: calls pass through and consecutive endpoint errors are
//!   counted. Any success resets the count.
//! - **Open**: calls fail with [`SonarError::CircuitOpen`] without reaching
//!   the wrapped endpoint.
//! - **HalfOpen**: exactly one trial call is let through. Concurrent
//!   callers fail fast until the trial reports.
//!
//! Every transition bumps a generation counter. Outcomes reported by calls
//! admitted under an older generation are ignored, so a slow call from
//! before the breaker tripped cannot close it again.
//!
//! Domain failures travel inside successful responses and never count.
//! The caller's own cancellation or expired deadline is neutral: it neither
//! counts as a failure nor closes a half-open breaker. A timeout the callee
//! runs into while the caller still has time left is a failure.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sonar_core::{BoxEndpoint, BoxFuture, CallContext, Endpoint, SonarError, SonarResult};
use tokio::time::Instant;

use crate::middleware::Middleware;

/// Default number of consecutive failures that opens the breaker.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time the breaker stays open before allowing a trial call.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// One trial call is allowed.
    HalfOpen,
}

impl BreakerState {
    /// Returns the state name used in logs and metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl BreakerSettings {
    /// Creates settings with the default threshold and timeout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }

    /// Settings for a server-side endpoint (60s timeout).
    pub fn server(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    /// Settings for an HTTP or gRPC client endpoint (30s timeout).
    pub fn http_client(name: impl Into<String>) -> Self {
        Self::new(name).reset_timeout(Duration::from_secs(30))
    }

    /// Settings for a gRPC client endpoint (30s timeout).
    pub fn grpc_client(name: impl Into<String>) -> Self {
        Self::http_client(name)
    }

    /// Settings for a Thrift client endpoint (10s timeout).
    pub fn thrift_client(name: impl Into<String>) -> Self {
        Self::new(name).reset_timeout(Duration::from_secs(10))
    }

    /// Sets the number of consecutive failures that opens the breaker.
    ///
    /// Zero is treated as one.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets how long the breaker stays open.
    #[must_use]
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Returns the breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the failure threshold.
    pub const fn threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns the reset timeout.
    pub const fn timeout(&self) -> Duration {
        self.reset_timeout
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::new(sonar_core::PING_METHOD)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    generation: u64,
    trial_in_flight: bool,
}

/// A circuit breaker state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                generation: 0,
                trial_in_flight: false,
            }),
        }
    }

    /// Returns the settings.
    pub const fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Returns the current state.
    ///
    /// An open breaker whose timeout has elapsed still reports `Open` until
    /// the next call is admitted as the trial.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Asks to let one call through.
    pub fn admit(self: &Arc<Self>) -> SonarResult<Permit> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(Duration::MAX, |at| at.elapsed());
                if elapsed < self.settings.reset_timeout {
                    return Err(SonarError::circuit_open(&self.settings.name));
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                inner.trial_in_flight = true;
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(SonarError::circuit_open(&self.settings.name));
                }
                inner.trial_in_flight = true;
                true
            }
        };
        Ok(Permit {
            breaker: self.clone(),
            generation: inner.generation,
            trial,
            reported: false,
        })
    }

    fn record(&self, generation: u64, trial: bool, outcome: Outcome) {
        let mut inner = self.inner.lock();
        if trial && inner.generation == generation {
            inner.trial_in_flight = false;
        }
        if inner.generation != generation {
            return;
        }
        match (inner.state, outcome) {
            (_, Outcome::Neutral) | (BreakerState::Open, _) => {}
            (BreakerState::Closed, Outcome::Success) => inner.failures = 0,
            (BreakerState::Closed, Outcome::Failure) => {
                inner.failures += 1;
                if inner.failures >= self.settings.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            (BreakerState::HalfOpen, Outcome::Success) => {
                self.transition(&mut inner, BreakerState::Closed);
            }
            (BreakerState::HalfOpen, Outcome::Failure) => {
                self.transition(&mut inner, BreakerState::Open);
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.trial_in_flight = false;
        match to {
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                tracing::warn!(
                    breaker = %self.settings.name,
                    from = %from,
                    failures = inner.failures,
                    "circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                tracing::info!(breaker = %self.settings.name, from = %from, "circuit breaker half-open");
            }
            BreakerState::Closed => {
                inner.failures = 0;
                inner.opened_at = None;
                tracing::info!(breaker = %self.settings.name, from = %from, "circuit breaker closed");
            }
        }
        metrics::counter!(
            "sonar_circuit_breaker_transitions_total",
            "breaker" => self.settings.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Neutral,
}

/// Admission granted by [`CircuitBreaker::admit`].
///
/// Report the outcome with [`Permit::success`] or [`Permit::failure`].
/// A permit dropped without a report (the call was abandoned) counts as
/// neutral and frees the half-open slot.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    reported: bool,
}

impl Permit {
    /// Reports a successful call.
    pub fn success(self) {
        self.report(Outcome::Success);
    }

    /// Reports a failed call.
    pub fn failure(self) {
        self.report(Outcome::Failure);
    }

    /// Reports the outcome of an endpoint call made with `ctx`.
    ///
    /// Cancellation and deadline errors are neutral only when `ctx` itself
    /// was cancelled or ran out of time; a timeout the callee produced
    /// on its own is a failure.
    pub fn observe<T>(self, ctx: &CallContext, result: &SonarResult<T>) {
        match result {
            Ok(_) => self.success(),
            Err(err) if ctx.caused(err) => self.report(Outcome::Neutral),
            Err(_) => self.failure(),
        }
    }

    /// Returns `true` if this permit is the half-open trial.
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    fn report(mut self, outcome: Outcome) {
        self.reported = true;
        self.breaker.record(self.generation, self.trial, outcome);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker
                .record(self.generation, self.trial, Outcome::Neutral);
        }
    }
}

/// Circuit breaker middleware.
///
/// Each middleware owns one breaker; wrapping several endpoints with clones
/// of the same middleware makes them share it.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMiddleware {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerMiddleware {
    /// Creates the middleware with a fresh breaker.
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(settings)),
        }
    }

    /// Returns the breaker, for state inspection.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Returns the current breaker state.
    pub fn state(&self) -> BreakerState {
        self.breaker.state()
    }
}

impl<Req, Resp> Middleware<Req, Resp> for CircuitBreakerMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn wrap(&self, inner: BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp> {
        Arc::new(Breaking {
            breaker: self.breaker.clone(),
            inner,
        })
    }
}

struct Breaking<Req, Resp> {
    breaker: Arc<CircuitBreaker>,
    inner: BoxEndpoint<Req, Resp>,
}

impl<Req, Resp> Endpoint<Req, Resp> for Breaking<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a CallContext, request: Req) -> BoxFuture<'a, SonarResult<Resp>> {
        Box::pin(async move {
            let permit = self.breaker.admit()?;
            let result = self.inner.call(ctx, request).await;
            permit.observe(ctx, &result);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Chain;
    use sonar_core::FnEndpoint;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Flaky {
        calls: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    fn flaky() -> (BoxEndpoint<(), ()>, Flaky) {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicBool::new(true));
        let (c, f) = (calls.clone(), failing.clone());
        let endpoint: BoxEndpoint<(), ()> =
            Arc::new(FnEndpoint::new(move |_ctx: CallContext, (): ()| {
                c.fetch_add(1, Ordering::SeqCst);
                let fail = f.load(Ordering::SeqCst);
                async move {
                    if fail {
                        Err(SonarError::transport("connection refused"))
                    } else {
                        Ok(())
                    }
                }
            }));
        (endpoint, Flaky { calls, failing })
    }

    fn settings(threshold: u32) -> BreakerSettings {
        BreakerSettings::new("test")
            .failure_threshold(threshold)
            .reset_timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_settings_presets() {
        assert_eq!(BreakerSettings::server("s").timeout(), Duration::from_secs(60));
        assert_eq!(BreakerSettings::http_client("h").timeout(), Duration::from_secs(30));
        assert_eq!(BreakerSettings::grpc_client("g").timeout(), Duration::from_secs(30));
        assert_eq!(BreakerSettings::thrift_client("t").timeout(), Duration::from_secs(10));
        assert_eq!(BreakerSettings::default().threshold(), DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(BreakerSettings::new("x").failure_threshold(0).threshold(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_stops_calling_inner() {
        let (endpoint, flaky) = flaky();
        let middleware = CircuitBreakerMiddleware::new(settings(3));
        let endpoint = Chain::new(endpoint).layer(&middleware).build();
        let ctx = CallContext::new();

        for _ in 0..3 {
            assert_eq!(
                endpoint.call(&ctx, ()).await,
                Err(SonarError::transport("connection refused"))
            );
        }
        assert_eq!(middleware.state(), BreakerState::Open);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

        assert_eq!(
            endpoint.call(&ctx, ()).await,
            Err(SonarError::circuit_open("test"))
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let (endpoint, flaky) = flaky();
        let middleware = CircuitBreakerMiddleware::new(settings(2));
        let endpoint = Chain::new(endpoint).layer(&middleware).build();
        let ctx = CallContext::new();

        assert!(endpoint.call(&ctx, ()).await.is_err());
        flaky.failing.store(false, Ordering::SeqCst);
        assert!(endpoint.call(&ctx, ()).await.is_ok());
        flaky.failing.store(true, Ordering::SeqCst);
        assert!(endpoint.call(&ctx, ()).await.is_err());
        assert_eq!(middleware.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let (endpoint, flaky) = flaky();
        let middleware = CircuitBreakerMiddleware::new(settings(1));
        let endpoint = Chain::new(endpoint).layer(&middleware).build();
        let ctx = CallContext::new();

        assert!(endpoint.call(&ctx, ()).await.is_err());
        assert_eq!(middleware.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        flaky.failing.store(false, Ordering::SeqCst);
        assert!(endpoint.call(&ctx, ()).await.is_ok());
        assert_eq!(middleware.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let (endpoint, flaky) = flaky();
        let middleware = CircuitBreakerMiddleware::new(settings(1));
        let endpoint = Chain::new(endpoint).layer(&middleware).build();
        let ctx = CallContext::new();

        assert!(endpoint.call(&ctx, ()).await.is_err());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(endpoint.call(&ctx, ()).await.is_err());
        assert_eq!(middleware.state(), BreakerState::Open);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        // the timeout restarts from the failed trial
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            endpoint.call(&ctx, ()).await,
            Err(SonarError::circuit_open("test"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_a_single_trial() {
        let breaker = Arc::new(CircuitBreaker::new(settings(1)));
        breaker.admit().unwrap().failure();
        tokio::time::advance(Duration::from_secs(10)).await;

        let trial = breaker.admit().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        for _ in 0..10 {
            assert_eq!(breaker.admit().unwrap_err(), SonarError::circuit_open("test"));
        }
        trial.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(!breaker.admit().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_the_slot() {
        let breaker = Arc::new(CircuitBreaker::new(settings(1)));
        breaker.admit().unwrap().failure();
        tokio::time::advance(Duration::from_secs(10)).await;

        drop(breaker.admit().unwrap());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        let next = breaker.admit().unwrap();
        assert!(next.is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_neutral() {
        let breaker = Arc::new(CircuitBreaker::new(settings(1)));
        let cancelled = CallContext::new();
        cancelled.cancel();
        breaker
            .admit()
            .unwrap()
            .observe::<()>(&cancelled, &Err(SonarError::Cancelled));
        let expired = CallContext::new().with_timeout(Duration::ZERO);
        breaker
            .admit()
            .unwrap()
            .observe::<()>(&expired, &Err(SonarError::DeadlineExceeded));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callee_timeout_counts_as_failure() {
        let breaker = Arc::new(CircuitBreaker::new(settings(1)));
        let ctx = CallContext::new().with_timeout(Duration::from_secs(30));
        breaker
            .admit()
            .unwrap()
            .observe::<()>(&ctx, &Err(SonarError::DeadlineExceeded));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_is_ignored() {
        let breaker = Arc::new(CircuitBreaker::new(settings(1)));
        let slow = breaker.admit().unwrap();
        breaker.admit().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        let trial = breaker.admit().unwrap();
        // admitted while closed; must not close the half-open breaker
        slow.success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        trial.failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
