//! Call context types.
//!
//! The [`CallContext`] is the `ctx` argument of every service method and
//! endpoint. It carries the request ID, the OpenTelemetry context used for
//! trace propagation, and the call's deadline and cancellation token.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{SonarError, SonarResult};

/// A unique identifier for each call, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it a good fit for log correlation.
///
/// # Example
///
/// ```
/// use sonar_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-call context that flows through service and endpoint middleware.
///
/// Cloning is cheap. Clones share the same cancellation token, so
/// cancelling any of them cancels the call.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sonar_core::CallContext;
///
/// let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
/// assert!(ctx.remaining().is_some());
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CallContext {
    request_id: RequestId,
    trace: opentelemetry::Context,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Creates a context with a fresh request ID, no deadline and an empty
    /// trace context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            trace: opentelemetry::Context::new(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the OpenTelemetry context carried by this call.
    #[must_use]
    pub const fn trace_context(&self) -> &opentelemetry::Context {
        &self.trace
    }

    /// Returns a new context carrying the given trace context.
    #[must_use]
    pub fn with_trace_context(mut self, trace: opentelemetry::Context) -> Self {
        self.trace = trace;
        self
    }

    /// Returns a copy of this context with a different trace context.
    ///
    /// Request ID, deadline and cancellation are shared with the parent.
    #[must_use]
    pub fn child(&self, trace: opentelemetry::Context) -> Self {
        Self {
            trace,
            ..self.clone()
        }
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets an absolute deadline. An earlier existing deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Uses the given cancellation token for this call.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline.
    ///
    /// `None` means no deadline; `Some(Duration::ZERO)` means it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// Returns `true` if `err` comes from this context's own cancellation
    /// or deadline rather than from the callee.
    #[must_use]
    pub fn caused(&self, err: &SonarError) -> bool {
        match err {
            SonarError::Cancelled => self.is_cancelled(),
            SonarError::DeadlineExceeded => self.is_expired(),
            _ => false,
        }
    }

    /// Classifies a timeout reported by a client library.
    ///
    /// Only the caller's own cancellation or deadline is reported as such.
    /// Any other timeout (a client-wide request timeout, a deadline the
    /// remote side gave up on) is a transport failure.
    pub fn timeout_error(&self, message: impl Into<String>) -> SonarError {
        if self.is_cancelled() {
            SonarError::Cancelled
        } else if self.is_expired() {
            SonarError::DeadlineExceeded
        } else {
            SonarError::transport(message)
        }
    }

    /// Runs an I/O future, observing cancellation and the deadline.
    ///
    /// Returns [`SonarError::Cancelled`] or [`SonarError::DeadlineExceeded`]
    /// if either fires first; the future is dropped in that case.
    pub async fn guard<F, T>(&self, fut: F) -> SonarResult<T>
    where
        F: Future<Output = SonarResult<T>>,
    {
        if self.is_cancelled() {
            return Err(SonarError::Cancelled);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SonarError::Cancelled),
            () = deadline => Err(SonarError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
