//! Endpoint logging middleware.
//!
//! Emits exactly one event per call after it completes, including calls
//! rejected by an inner stage. Fields:
//!
//! - `method`: the operation name
//! - `request_id`: the call's request ID
//! - `transport_error`: the endpoint error, empty on success
//! - `took_ms`: call duration in milliseconds
//!
//! Domain failures are not transport errors and are logged by the service
//! logging decorator instead.

use std::sync::Arc;

use sonar_core::{BoxEndpoint, BoxFuture, CallContext, Endpoint, SonarResult};
use tokio::time::Instant;

use crate::middleware::Middleware;
use crate::sink::LogSink;

/// Middleware that logs one line per endpoint call.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    sink: LogSink,
    method: &'static str,
}

impl LoggingMiddleware {
    /// Logs calls to `method` through `sink`.
    pub const fn new(sink: LogSink, method: &'static str) -> Self {
        Self { sink, method }
    }
}

impl<Req, Resp> Middleware<Req, Resp> for LoggingMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn name(&self) -> &'static str {
        "logging"
    }

    fn wrap(&self, inner: BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp> {
        Arc::new(Logged {
            config: self.clone(),
            inner,
        })
    }
}

struct Logged<Req, Resp> {
    config: LoggingMiddleware,
    inner: BoxEndpoint<Req, Resp>,
}

impl<Req, Resp> Endpoint<Req, Resp> for Logged<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a CallContext, request: Req) -> BoxFuture<'a, SonarResult<Resp>> {
        Box::pin(async move {
            let start = Instant::now();
            let result = self.inner.call(ctx, request).await;
            let took = start.elapsed();

            let transport_error = result
                .as_ref()
                .err()
                .map(ToString::to_string)
                .unwrap_or_default();
            self.config.sink.emit(|| {
                tracing::info!(
                    method = self.config.method,
                    request_id = %ctx.request_id(),
                    transport_error = %transport_error,
                    took_ms = took.as_secs_f64() * 1000.0,
                    "endpoint call"
                );
            });
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Chain;
    use parking_lot::Mutex;
    use sonar_core::{FnEndpoint, SonarError};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::SubscriberExt;

    /// Collects the `transport_error` field of every event.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<String>>>);

    struct ErrorField(Option<String>);

    impl Visit for ErrorField {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "transport_error" {
                self.0 = Some(format!("{value:?}"));
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Capture {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = ErrorField(None);
            event.record(&mut visitor);
            self.0.lock().push(visitor.0.unwrap_or_default());
        }
    }

    fn sink() -> (LogSink, Capture) {
        let capture = Capture::default();
        let dispatch = tracing::Dispatch::new(tracing_subscriber::registry().with(capture.clone()));
        (LogSink::new(dispatch), capture)
    }

    #[tokio::test]
    async fn test_logs_once_per_call() {
        let (sink, capture) = sink();
        let ok: BoxEndpoint<(), ()> = Arc::new(FnEndpoint::new(|_ctx: CallContext, (): ()| async {
            Ok::<_, SonarError>(())
        }));
        let endpoint = Chain::new(ok)
            .layer(&LoggingMiddleware::new(sink, "Ping"))
            .build();

        let ctx = CallContext::new();
        endpoint.call(&ctx, ()).await.unwrap();
        endpoint.call(&ctx, ()).await.unwrap();

        assert_eq!(*capture.0.lock(), vec![String::new(), String::new()]);
    }

    #[tokio::test]
    async fn test_logs_transport_error() {
        let (sink, capture) = sink();
        let failing: BoxEndpoint<(), ()> =
            Arc::new(FnEndpoint::new(|_ctx: CallContext, (): ()| async {
                Err::<(), _>(SonarError::circuit_open("Ping"))
            }));
        let endpoint = Chain::new(failing)
            .layer(&LoggingMiddleware::new(sink, "Ping"))
            .build();

        let err = endpoint.call(&CallContext::new(), ()).await.unwrap_err();
        assert_eq!(err, SonarError::circuit_open("Ping"));
        assert_eq!(
            *capture.0.lock(),
            vec!["circuit breaker 'Ping' is open".to_string()]
        );
    }
}
