//! Endpoint instrumenting middleware.
//!
//! Records the duration of every call, in seconds, in the
//! `sonar_request_duration_seconds` histogram with labels `method` and
//! `success`. A call succeeds when the endpoint returned a response
//! without a domain failure.

use std::sync::Arc;

use metrics::Histogram;
use sonar_core::{BoxEndpoint, BoxFuture, CallContext, Endpoint, Failer, SonarResult};
use tokio::time::Instant;

use crate::middleware::Middleware;

/// Name of the request duration histogram.
pub const REQUEST_DURATION_SECONDS: &str = "sonar_request_duration_seconds";

/// Middleware that records call durations.
#[derive(Debug, Clone)]
pub struct InstrumentingMiddleware {
    success: Histogram,
    failure: Histogram,
}

impl InstrumentingMiddleware {
    /// Records into the global recorder under `method`.
    pub fn new(method: &'static str) -> Self {
        Self {
            success: metrics::histogram!(REQUEST_DURATION_SECONDS, "method" => method, "success" => "true"),
            failure: metrics::histogram!(REQUEST_DURATION_SECONDS, "method" => method, "success" => "false"),
        }
    }

    /// Records into the given histograms, one per outcome.
    pub const fn with_histograms(success: Histogram, failure: Histogram) -> Self {
        Self { success, failure }
    }
}

impl<Req, Resp> Middleware<Req, Resp> for InstrumentingMiddleware
where
    Req: Send + 'static,
    Resp: Failer + Send + 'static,
{
    fn name(&self) -> &'static str {
        "instrumenting"
    }

    fn wrap(&self, inner: BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp> {
        Arc::new(Instrumented {
            config: self.clone(),
            inner,
        })
    }
}

struct Instrumented<Req, Resp> {
    config: InstrumentingMiddleware,
    inner: BoxEndpoint<Req, Resp>,
}

impl<Req, Resp> Endpoint<Req, Resp> for Instrumented<Req, Resp>
where
    Req: Send + 'static,
    Resp: Failer + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a CallContext, request: Req) -> BoxFuture<'a, SonarResult<Resp>> {
        Box::pin(async move {
            let start = Instant::now();
            let result = self.inner.call(ctx, request).await;
            let seconds = start.elapsed().as_secs_f64();

            let success = matches!(&result, Ok(response) if response.failed().is_none());
            if success {
                self.config.success.record(seconds);
            } else {
                self.config.failure.record(seconds);
            }
            result
        })
    }
}
