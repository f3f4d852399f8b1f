//! Tracing middleware.
//!
//! Opens an OpenTelemetry span around each call. The span is a child of
//! the trace context carried by the [`CallContext`], and the inner
//! endpoint receives a context whose trace context holds the new span, so
//! anything further down (including a client transport injecting
//! `traceparent`) continues the same trace.
//!
//! ## Span Attributes
//!
//! - span name: the operation (`Ping`)
//! - span kind: `Server` on server sets, `Client` on client sets
//! - `error`: the error message, set when the call returned an error or
//!   a domain failure; the span status is set to error as well

use std::borrow::Cow;
use std::sync::Arc;

use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::KeyValue;
use sonar_core::{BoxEndpoint, BoxFuture, CallContext, Endpoint, Failer, SonarResult};

use crate::middleware::Middleware;

/// Returns the global tracer. It is a no-op until a provider is installed.
pub fn default_tracer() -> Arc<BoxedTracer> {
    Arc::new(opentelemetry::global::tracer("sonar"))
}

/// Middleware that opens one span per call.
#[derive(Clone)]
pub struct TracingMiddleware {
    tracer: Arc<BoxedTracer>,
    operation: Cow<'static, str>,
    kind: SpanKind,
}

impl TracingMiddleware {
    /// Creates server-side tracing for `operation`.
    pub fn server(tracer: Arc<BoxedTracer>, operation: impl Into<Cow<'static, str>>) -> Self {
        Self::new(tracer, operation, SpanKind::Server)
    }

    /// Creates client-side tracing for `operation`.
    pub fn client(tracer: Arc<BoxedTracer>, operation: impl Into<Cow<'static, str>>) -> Self {
        Self::new(tracer, operation, SpanKind::Client)
    }

    fn new(tracer: Arc<BoxedTracer>, operation: impl Into<Cow<'static, str>>, kind: SpanKind) -> Self {
        Self {
            tracer,
            operation: operation.into(),
            kind,
        }
    }

    /// Returns the span kind.
    pub fn kind(&self) -> &SpanKind {
        &self.kind
    }
}

impl std::fmt::Debug for TracingMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingMiddleware")
            .field("operation", &self.operation)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> Middleware<Req, Resp> for TracingMiddleware
where
    Req: Send + 'static,
    Resp: Failer + Send + 'static,
{
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn wrap(&self, inner: BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp> {
        Arc::new(Traced {
            config: self.clone(),
            inner,
        })
    }
}

struct Traced<Req, Resp> {
    config: TracingMiddleware,
    inner: BoxEndpoint<Req, Resp>,
}

impl<Req, Resp> Endpoint<Req, Resp> for Traced<Req, Resp>
where
    Req: Send + 'static,
    Resp: Failer + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a CallContext, request: Req) -> BoxFuture<'a, SonarResult<Resp>> {
        Box::pin(async move {
            let tracer = &self.config.tracer;
            let builder = tracer
                .span_builder(self.config.operation.clone())
                .with_kind(self.config.kind.clone());
            let span = tracer.build_with_context(builder, ctx.trace_context());
            let cx = ctx.trace_context().with_span(span);

            let result = self.inner.call(&ctx.child(cx.clone()), request).await;

            let span = cx.span();
            let error = match &result {
                Ok(response) => response.failed().map(ToString::to_string),
                Err(err) => Some(err.to_string()),
            };
            if let Some(message) = error {
                span.set_attribute(KeyValue::new("error", message.clone()));
                span.set_status(Status::error(message));
            }
            span.end();
            result
        })
    }
}
