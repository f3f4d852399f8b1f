//! gRPC server.

use std::time::Duration;

use sonar_core::CallContext;
use sonar_middleware::EndpointSet;
use sonar_telemetry::extract_context;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

use super::pb::probe_server::{Probe, ProbeServer};
use super::pb::{PingReply, PingRequest};
use super::{decode_request, encode_response, error_to_status, MetadataExtractor};
use crate::error::ServeError;
use crate::shutdown::{ShutdownSignal, DEFAULT_SHUTDOWN_TIMEOUT};

/// Serves an [`EndpointSet`] as the `sonar.Probe` gRPC service.
#[derive(Debug, Clone)]
pub struct GrpcServer {
    endpoints: EndpointSet,
    shutdown_timeout: Duration,
}

impl GrpcServer {
    /// Creates a server for `endpoints`.
    #[must_use]
    pub fn new(endpoints: EndpointSet) -> Self {
        Self {
            endpoints,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Sets how long shutdown waits for in-flight calls.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Returns the tonic service, for mounting on a custom router.
    #[must_use]
    pub fn into_service(self) -> ProbeServer<Self> {
        ProbeServer::new(self)
    }

    /// Serves on `listener` until `shutdown` triggers.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServeError> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "gRPC server listening");

        let timeout = self.shutdown_timeout;
        let serve = tonic::transport::Server::builder()
            .add_service(self.into_service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.recv());
        tokio::pin!(serve);

        let drained = async {
            shutdown.recv().await;
            tokio::time::sleep(timeout).await;
        };

        tokio::select! {
            result = &mut serve => result?,
            () = drained => tracing::warn!(%addr, "gRPC shutdown timeout reached"),
        }

        tracing::info!(%addr, "gRPC server stopped");
        Ok(())
    }
}

#[tonic::async_trait]
impl Probe for GrpcServer {
    async fn ping(
        &self,
        request: tonic::Request<PingRequest>,
    ) -> Result<tonic::Response<PingReply>, tonic::Status> {
        let trace = extract_context(&MetadataExtractor(request.metadata()));
        let ctx = CallContext::new().with_trace_context(trace);

        match self
            .endpoints
            .ping
            .call(&ctx, decode_request(request.get_ref()))
            .await
        {
            Ok(response) => Ok(tonic::Response::new(encode_response(&response))),
            Err(err) => {
                tracing::debug!(error = %err, "gRPC ping failed");
                Err(error_to_status(&err))
            }
        }
    }
}
