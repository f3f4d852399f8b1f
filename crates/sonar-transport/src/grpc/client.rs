//! gRPC client.

use std::sync::Arc;
use std::time::Duration;

use sonar_core::{BoxFuture, CallContext, Endpoint, PingRequest, PingResponse, SonarError, SonarResult};
use sonar_middleware::{EndpointSet, SetOptions};
use sonar_telemetry::inject_context;
use tonic::transport::{Channel, Endpoint as TonicEndpoint};

use super::pb::probe_client::ProbeClient;
use super::{decode_response, encode_request, status_to_error, MetadataInjector};

/// Raw gRPC endpoint for the ping method.
///
/// The channel connects lazily and reconnects on its own; cloning the
/// client shares it.
#[derive(Debug, Clone)]
pub struct GrpcClient {
    inner: ProbeClient<Channel>,
}

impl GrpcClient {
    /// Creates a client for the server at `target` (`host:port` or an
    /// `http://` URI).
    ///
    /// Must be called within a tokio runtime.
    pub fn new(target: &str, connect_timeout: Option<Duration>) -> SonarResult<Self> {
        let uri = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{target}")
        };
        let mut endpoint = TonicEndpoint::from_shared(uri)
            .map_err(|e| SonarError::config(format!("invalid gRPC target '{target}': {e}")))?;
        if let Some(timeout) = connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        Ok(Self {
            inner: ProbeClient::new(endpoint.connect_lazy()),
        })
    }

    async fn ping(&self, ctx: &CallContext, request: PingRequest) -> SonarResult<PingResponse> {
        let mut wire = tonic::Request::new(encode_request(&request));
        inject_context(ctx.trace_context(), &mut MetadataInjector(wire.metadata_mut()));
        if let Some(remaining) = ctx.remaining() {
            wire.set_timeout(remaining);
        }

        let mut client = self.inner.clone();
        let reply = ctx
            .guard(async move {
                client
                    .ping(wire)
                    .await
                    .map_err(|status| status_to_error(ctx, &status))
            })
            .await?;

        Ok(decode_response(reply.into_inner()))
    }
}

impl Endpoint<PingRequest, PingResponse> for GrpcClient {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: PingRequest,
    ) -> BoxFuture<'a, SonarResult<PingResponse>> {
        Box::pin(self.ping(ctx, request))
    }
}

/// Builds a client-side [`EndpointSet`] talking gRPC to `target`.
pub fn new_client(
    target: &str,
    connect_timeout: Option<Duration>,
    options: &SetOptions,
) -> SonarResult<EndpointSet> {
    let raw = GrpcClient::new(target, connect_timeout)?;
    Ok(EndpointSet::client(Arc::new(raw), options))
}
