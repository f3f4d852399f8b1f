//! gRPC transport.
//!
//! Service `sonar.Probe`, method `Ping(PingRequest) -> PingReply { p, err }`.
//! A domain failure travels in `err`; the gRPC status is reserved for
//! everything else and maps to `INTERNAL`. The trace context rides in
//! request metadata.

pub mod client;
pub mod pb;
pub mod server;

use opentelemetry::propagation::{Extractor, Injector};
use sonar_core::{CallContext, PingRequest, PingResponse, SonarError};
use tonic::metadata::{Ascii, KeyRef, MetadataKey, MetadataMap, MetadataValue};

pub use client::GrpcClient;
pub use server::GrpcServer;

/// Decodes a gRPC ping request.
#[must_use]
pub const fn decode_request(_request: &pb::PingRequest) -> PingRequest {
    PingRequest {}
}

/// Encodes a ping response into a gRPC reply.
#[must_use]
pub fn encode_response(response: &PingResponse) -> pb::PingReply {
    pb::PingReply {
        p: response.payload().to_string(),
        err: response.err_string(),
    }
}

/// Encodes a ping request for the wire.
#[must_use]
pub const fn encode_request(_request: &PingRequest) -> pb::PingRequest {
    pb::PingRequest {}
}

/// Decodes a gRPC reply into a ping response.
#[must_use]
pub fn decode_response(reply: pb::PingReply) -> PingResponse {
    PingResponse::from_wire(reply.p, &reply.err)
}

/// Maps an endpoint error to the status returned to the caller.
#[must_use]
pub fn error_to_status(err: &SonarError) -> tonic::Status {
    tonic::Status::internal(err.to_string())
}

/// Maps a status received by a client calling with `ctx` to an endpoint
/// error.
///
/// `DEADLINE_EXCEEDED` is the caller's deadline only if `ctx` has actually
/// run out of time; otherwise the remote side timed out on its own.
#[must_use]
pub fn status_to_error(ctx: &CallContext, status: &tonic::Status) -> SonarError {
    match status.code() {
        tonic::Code::DeadlineExceeded => {
            ctx.timeout_error(format!("deadline exceeded: {}", status.message()))
        }
        code => SonarError::status(code as u16, status.message()),
    }
}

/// Reads trace headers from gRPC metadata.
pub struct MetadataExtractor<'a>(pub &'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|key| match key {
                KeyRef::Ascii(key) => Some(key.as_str()),
                KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

/// Writes trace headers into gRPC metadata.
pub struct MetadataInjector<'a>(pub &'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(key), Ok(value)) = (
            MetadataKey::<Ascii>::from_bytes(key.as_bytes()),
            MetadataValue::<Ascii>::try_from(value.as_str()),
        ) {
            self.0.insert(key, value);
        }
    }
}
