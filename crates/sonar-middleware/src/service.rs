//! Service middleware.
//!
//! Decorators that wrap a [`ProbeService`] and return another one. Both are
//! transparent: they hand back exactly what the inner service returned.
//!
//! ```ignore
//! use sonar_middleware::{LogSink, ServiceExt};
//!
//! let service = BasicService::new(0.1)?
//!     .logged(LogSink::global())
//!     .instrumented(metrics::counter!("sonar_pings_total"));
//! ```

use metrics::Counter;
use sonar_core::{CallContext, ProbeService, SonarResult, PING_METHOD};

use crate::sink::LogSink;

/// Logs method, payload and error after every call, failed or not.
#[derive(Debug)]
pub struct LoggingService<S> {
    inner: S,
    sink: LogSink,
}

impl<S> LoggingService<S> {
    /// Wraps `inner`, logging to `sink`.
    pub const fn new(inner: S, sink: LogSink) -> Self {
        Self { inner, sink }
    }
}

impl<S: ProbeService> ProbeService for LoggingService<S> {
    async fn ping(&self, ctx: &CallContext) -> SonarResult<String> {
        let result = self.inner.ping(ctx).await;
        self.sink.emit(|| {
            let (p, err) = match &result {
                Ok(p) => (p.as_str(), String::new()),
                Err(e) => ("", e.to_string()),
            };
            tracing::info!(
                method = PING_METHOD,
                request_id = %ctx.request_id(),
                p,
                err = %err,
                "probe"
            );
        });
        result
    }
}

/// Counts every call that reached the service, successes and domain
/// failures alike.
#[derive(Debug)]
pub struct InstrumentingService<S> {
    inner: S,
    pings: Counter,
}

impl<S> InstrumentingService<S> {
    /// Wraps `inner`, incrementing `pings` once per call.
    pub const fn new(inner: S, pings: Counter) -> Self {
        Self { inner, pings }
    }
}

impl<S: ProbeService> ProbeService for InstrumentingService<S> {
    async fn ping(&self, ctx: &CallContext) -> SonarResult<String> {
        let result = self.inner.ping(ctx).await;
        self.pings.increment(1);
        result
    }
}

/// Extension methods to decorate any [`ProbeService`].
pub trait ServiceExt: ProbeService + Sized {
    /// Adds call logging.
    fn logged(self, sink: LogSink) -> LoggingService<Self> {
        LoggingService::new(self, sink)
    }

    /// Adds a call counter.
    fn instrumented(self, pings: Counter) -> InstrumentingService<Self> {
        InstrumentingService::new(self, pings)
    }
}

impl<S: ProbeService> ServiceExt for S {}
