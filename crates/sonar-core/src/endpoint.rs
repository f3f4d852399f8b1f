//! The generic endpoint abstraction.
//!
//! An [`Endpoint`] is the single unit of composition: one service method
//! behind a uniform `(ctx, Req) -> Result<Resp>` signature. Middleware
//! wraps endpoints by substitution, and transports bind to them without
//! knowing which service sits underneath.
//!
//! Request and response types are generic parameters, so a transport can
//! never hand the ping endpoint the wrong request shape.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::{ProbeError, SonarError, SonarResult};
use crate::service::ProbeService;

/// A boxed future, as returned by endpoints.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A shared, type-erased endpoint.
pub type BoxEndpoint<Req, Resp> = Arc<dyn Endpoint<Req, Resp>>;

/// One callable operation.
pub trait Endpoint<Req, Resp>: Send + Sync + 'static
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Invokes the operation.
    ///
    /// # Errors
    ///
    /// Returns a [`SonarError`] when the call could not be carried out.
    /// Domain failures are part of `Resp`, not of the error.
    fn call<'a>(&'a self, ctx: &'a CallContext, request: Req) -> BoxFuture<'a, SonarResult<Resp>>;
}

/// An endpoint built from an async closure.
///
/// # Example
///
/// ```
/// use sonar_core::{CallContext, FnEndpoint, PingRequest, PingResponse, SonarError};
///
/// let endpoint = FnEndpoint::new(|_ctx: CallContext, _req: PingRequest| async {
///     Ok::<_, SonarError>(PingResponse::ok("pong"))
/// });
/// # let _ = &endpoint;
/// ```
pub struct FnEndpoint<F> {
    func: F,
}

impl<F> FnEndpoint<F> {
    /// Creates a new function-based endpoint.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut, Req, Resp> Endpoint<Req, Resp> for FnEndpoint<F>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SonarResult<Resp>> + Send + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a CallContext, request: Req) -> BoxFuture<'a, SonarResult<Resp>> {
        Box::pin((self.func)(ctx.clone(), request))
    }
}

/// Implemented by responses that may carry a domain failure.
///
/// Encoders check it to decide between the success payload and the
/// protocol's error channel.
pub trait Failer {
    /// Returns the domain failure, if the call failed.
    fn failed(&self) -> Option<&ProbeError>;
}

/// Request for the ping method. It has no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {}

/// Response of the ping method.
///
/// Internally this is a tagged result: either a payload or a domain
/// failure, never both and never an ambiguous empty error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResponse {
    outcome: Result<String, ProbeError>,
}

impl PingResponse {
    /// A successful response carrying `payload`.
    pub fn ok(payload: impl Into<String>) -> Self {
        Self {
            outcome: Ok(payload.into()),
        }
    }

    /// A response carrying a domain failure.
    #[must_use]
    pub const fn failure(err: ProbeError) -> Self {
        Self { outcome: Err(err) }
    }

    /// Builds a response from the two wire fields.
    ///
    /// A non-empty error string wins over the payload.
    #[must_use]
    pub fn from_wire(payload: String, err: &str) -> Self {
        match crate::error::err_from_string(err) {
            Some(err) => Self::failure(err),
            None => Self::ok(payload),
        }
    }

    /// Returns the payload, or the empty string on failure.
    #[must_use]
    pub fn payload(&self) -> &str {
        self.outcome.as_deref().unwrap_or_default()
    }

    /// Returns the wire form of the error (empty when there is none).
    #[must_use]
    pub fn err_string(&self) -> String {
        crate::error::err_string(self.failed())
    }

    /// Returns the outcome.
    #[must_use]
    pub const fn outcome(&self) -> &Result<String, ProbeError> {
        &self.outcome
    }

    /// Converts the response into the service-level result.
    pub fn into_result(self) -> SonarResult<String> {
        self.outcome.map_err(SonarError::Probe)
    }
}

impl Failer for PingResponse {
    fn failed(&self) -> Option<&ProbeError> {
        self.outcome.as_ref().err()
    }
}

/// HTTP success body of the ping method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingBody {
    /// The payload.
    pub p: String,
}

/// Builds the base ping endpoint over a service.
///
/// A domain failure is folded into the response; any other error is
/// returned as the endpoint error.
pub fn make_ping_endpoint<S>(service: S) -> BoxEndpoint<PingRequest, PingResponse>
where
    S: ProbeService,
{
    Arc::new(PingEndpoint { service })
}

struct PingEndpoint<S> {
    service: S,
}

impl<S: ProbeService> Endpoint<PingRequest, PingResponse> for PingEndpoint<S> {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        _request: PingRequest,
    ) -> BoxFuture<'a, SonarResult<PingResponse>> {
        Box::pin(async move {
            match self.service.ping(ctx).await {
                Ok(payload) => Ok(PingResponse::ok(payload)),
                Err(SonarError::Probe(err)) => Ok(PingResponse::failure(err)),
                Err(err) => Err(err),
            }
        })
    }
}
