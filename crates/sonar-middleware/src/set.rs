//! The Endpoint Set.
//!
//! Collects every endpoint of the probe service, each one already wrapped
//! in its middleware chain. Servers build a set around a service and hand
//! it to transports; clients build one around a raw transport endpoint
//! and use it as a [`ProbeService`].
//!
//! ```text
//! server: ping endpoint → rate_limit → circuit_breaker → tracing(Server) → logging → instrumenting
//! client: transport     → rate_limit → circuit_breaker → tracing(Client)
//! ```

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use metrics::Histogram;
use opentelemetry::global::BoxedTracer;
use sonar_core::{
    make_ping_endpoint, BoxEndpoint, CallContext, PingRequest, PingResponse,
    ProbeService, SonarResult, PING_METHOD,
};

use crate::middleware::Chain;
use crate::sink::LogSink;
use crate::stages::{
    rate_limit, BreakerSettings, BreakerState, CircuitBreaker, CircuitBreakerMiddleware,
    InstrumentingMiddleware, LoggingMiddleware, RateLimitMiddleware, TokenBucket,
    TracingMiddleware,
};

/// Construction-time options for an [`EndpointSet`].
///
/// Everything the set needs is supplied here; nothing is read from the
/// environment.
#[derive(Clone)]
pub struct SetOptions {
    sink: LogSink,
    tracer: Option<Arc<BoxedTracer>>,
    durations: Option<(Histogram, Histogram)>,
    refill_per_sec: f64,
    burst: u32,
    bucket: Option<Arc<TokenBucket>>,
    breaker: BreakerSettings,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            sink: LogSink::global(),
            tracer: None,
            durations: None,
            refill_per_sec: rate_limit::DEFAULT_REFILL_PER_SEC,
            burst: rate_limit::DEFAULT_BURST,
            bucket: None,
            breaker: BreakerSettings::server(PING_METHOD),
        }
    }
}

impl SetOptions {
    /// Server defaults: 1 token/s, burst 100, breaker threshold 5 and
    /// timeout 60s.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP client defaults (breaker timeout 30s).
    #[must_use]
    pub fn http_client() -> Self {
        Self::new().breaker(BreakerSettings::http_client(PING_METHOD))
    }

    /// gRPC client defaults (breaker timeout 30s).
    #[must_use]
    pub fn grpc_client() -> Self {
        Self::new().breaker(BreakerSettings::grpc_client(PING_METHOD))
    }

    /// Thrift client defaults (breaker timeout 10s).
    #[must_use]
    pub fn thrift_client() -> Self {
        Self::new().breaker(BreakerSettings::thrift_client(PING_METHOD))
    }

    /// Sets the logger sink.
    #[must_use]
    pub fn logger(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the tracer. The global tracer is used otherwise.
    #[must_use]
    pub fn tracer(mut self, tracer: Arc<BoxedTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Sets the success and failure duration histograms.
    #[must_use]
    pub fn durations(mut self, success: Histogram, failure: Histogram) -> Self {
        self.durations = Some((success, failure));
        self
    }

    /// Sets the rate limiter's refill rate and burst.
    #[must_use]
    pub fn rate_limit(mut self, refill_per_sec: f64, burst: u32) -> Self {
        self.refill_per_sec = refill_per_sec;
        self.burst = burst;
        self
    }

    /// Draws from an existing bucket instead of a fresh one.
    #[must_use]
    pub fn shared_bucket(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Sets the circuit breaker settings.
    #[must_use]
    pub fn breaker(mut self, settings: BreakerSettings) -> Self {
        self.breaker = settings;
        self
    }

    /// Sets the breaker threshold and reset timeout, keeping its name.
    #[must_use]
    pub fn breaker_policy(mut self, failure_threshold: u32, reset_timeout: Duration) -> Self {
        self.breaker = self
            .breaker
            .failure_threshold(failure_threshold)
            .reset_timeout(reset_timeout);
        self
    }

    fn rate_limiter(&self) -> RateLimitMiddleware {
        match &self.bucket {
            Some(bucket) => RateLimitMiddleware::shared(bucket.clone()),
            None => RateLimitMiddleware::builder()
                .refill_per_sec(self.refill_per_sec)
                .burst(self.burst)
                .build(),
        }
    }

    fn tracer_or_global(&self) -> Arc<BoxedTracer> {
        self.tracer
            .clone()
            .unwrap_or_else(crate::stages::tracing::default_tracer)
    }
}

impl std::fmt::Debug for SetOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetOptions")
            .field("refill_per_sec", &self.refill_per_sec)
            .field("burst", &self.burst)
            .field("shared_bucket", &self.bucket.is_some())
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

/// Every endpoint of the probe service, decorated.
#[derive(Clone)]
pub struct EndpointSet {
    /// The ping endpoint.
    pub ping: BoxEndpoint<PingRequest, PingResponse>,
    breaker: Arc<CircuitBreaker>,
    stages: Vec<&'static str>,
}

impl EndpointSet {
    /// Builds the server-side set around `service`.
    pub fn server<S: ProbeService>(service: S, options: &SetOptions) -> Self {
        let instrumenting = match &options.durations {
            Some((success, failure)) => {
                InstrumentingMiddleware::with_histograms(success.clone(), failure.clone())
            }
            None => InstrumentingMiddleware::new(PING_METHOD),
        };
        let breaker = CircuitBreakerMiddleware::new(options.breaker.clone());

        let chain = Chain::new(make_ping_endpoint(service))
            .layer(&options.rate_limiter())
            .layer(&breaker)
            .layer(&TracingMiddleware::server(options.tracer_or_global(), operation()))
            .layer(&LoggingMiddleware::new(options.sink.clone(), PING_METHOD))
            .layer(&instrumenting);

        Self::from_chain(chain, &breaker)
    }

    /// Builds the client-side set around a raw transport endpoint.
    pub fn client(ping: BoxEndpoint<PingRequest, PingResponse>, options: &SetOptions) -> Self {
        let breaker = CircuitBreakerMiddleware::new(options.breaker.clone());

        let chain = Chain::new(ping)
            .layer(&options.rate_limiter())
            .layer(&breaker)
            .layer(&TracingMiddleware::client(options.tracer_or_global(), operation()));

        Self::from_chain(chain, &breaker)
    }

    fn from_chain(
        chain: Chain<PingRequest, PingResponse>,
        breaker: &CircuitBreakerMiddleware,
    ) -> Self {
        let stages = chain.stages().to_vec();
        Self {
            ping: chain.build(),
            breaker: breaker.breaker().clone(),
            stages,
        }
    }

    /// Returns the ping breaker's state.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Returns the stage names of the ping chain, innermost first.
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }
}

impl std::fmt::Debug for EndpointSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSet")
            .field("stages", &self.stages)
            .field("breaker", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

impl ProbeService for EndpointSet {
    async fn ping(&self, ctx: &CallContext) -> SonarResult<String> {
        self.ping
            .call(ctx, PingRequest::default())
            .await?
            .into_result()
    }
}

const fn operation() -> Cow<'static, str> {
    Cow::Borrowed(PING_METHOD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::{BasicService, FnEndpoint, ProbeError, SonarError};

    #[test]
    fn test_stage_order() {
        let server = EndpointSet::server(BasicService::seeded(0.0, 1).unwrap(), &SetOptions::new());
        assert_eq!(
            server.stages(),
            &["rate_limit", "circuit_breaker", "tracing", "logging", "instrumenting"]
        );

        let raw: BoxEndpoint<PingRequest, PingResponse> =
            Arc::new(FnEndpoint::new(|_ctx: CallContext, _req: PingRequest| async {
                Ok::<_, SonarError>(PingResponse::ok("pong"))
            }));
        let client = EndpointSet::client(raw, &SetOptions::http_client());
        assert_eq!(client.stages(), &["rate_limit", "circuit_breaker", "tracing"]);
    }

    #[test]
    fn test_client_presets() {
        assert_eq!(SetOptions::http_client().breaker.timeout(), Duration::from_secs(30));
        assert_eq!(SetOptions::grpc_client().breaker.timeout(), Duration::from_secs(30));
        assert_eq!(SetOptions::thrift_client().breaker.timeout(), Duration::from_secs(10));
        assert_eq!(SetOptions::new().breaker.timeout(), Duration::from_secs(60));
        assert_eq!(SetOptions::new().breaker.threshold(), 5);
    }

    #[tokio::test]
    async fn test_set_as_service() {
        let ok = EndpointSet::server(
            BasicService::seeded(0.0, 1).unwrap(),
            &SetOptions::new().logger(LogSink::discard()),
        );
        assert_eq!(ok.ping(&CallContext::new()).await.unwrap(), "pong");

        let failing = EndpointSet::server(
            BasicService::seeded(1.0, 1).unwrap(),
            &SetOptions::new().logger(LogSink::discard()),
        );
        assert_eq!(
            failing.ping(&CallContext::new()).await,
            Err(SonarError::Probe(ProbeError::Failed))
        );
        // domain failures never trip the breaker
        assert_eq!(failing.breaker_state(), BreakerState::Closed);
    }
}
