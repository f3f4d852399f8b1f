//! HTTP/JSON transport.
//!
//! | | Wire |
//! |---|---|
//! | Request | `POST /ping`, body `{}` (an empty body counts as `{}`) |
//! | Success | `200`, `{"p": "<payload>"}` |
//! | Domain failure | `418`, `{"error": "<message>"}` |
//! | Any other error | `500`, `{"error": "<message>"}` |
//!
//! The W3C `traceparent` header carries the trace context in both
//! directions.

pub mod client;
pub mod server;

use bytes::Bytes;
use http::StatusCode;
use sonar_core::{
    ErrorBody, Failer, PingBody, PingRequest, PingResponse, ProbeError, SonarError, SonarResult,
};

pub use client::HttpClient;
pub use server::HttpServer;

/// Path of the ping method.
pub const PING_PATH: &str = "/ping";

/// Content type of every body.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Decodes a ping request body. An empty body is treated as `{}`.
pub fn decode_request(body: &[u8]) -> SonarResult<PingRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PingRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| SonarError::decode(e.to_string()))
}

/// Encodes a ping response into a status and JSON body.
pub fn encode_response(response: &PingResponse) -> SonarResult<(StatusCode, Bytes)> {
    let encoded = match response.failed() {
        Some(err) => (
            SonarError::Probe(err.clone()).status_code(),
            serde_json::to_vec(&ErrorBody::new(err)),
        ),
        None => (
            StatusCode::OK,
            serde_json::to_vec(&PingBody {
                p: response.payload().to_string(),
            }),
        ),
    };
    match encoded {
        (status, Ok(body)) => Ok((status, Bytes::from(body))),
        (_, Err(e)) => Err(SonarError::encode(e.to_string())),
    }
}

/// Encodes an endpoint error into a status and JSON body.
pub fn encode_error(err: &SonarError) -> (StatusCode, Bytes) {
    let body = serde_json::to_vec(&ErrorBody::new(err))
        .unwrap_or_else(|_| br#"{"error":"internal error"}"#.to_vec());
    (err.status_code(), Bytes::from(body))
}

/// Encodes a ping request body.
pub fn encode_request(request: &PingRequest) -> SonarResult<Bytes> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|e| SonarError::encode(e.to_string()))
}

/// Decodes a reply into a ping response.
///
/// A `418` is reconstructed as a domain failure so every transport
/// classifies it the same way; any other non-`200` becomes
/// [`SonarError::Status`].
pub fn decode_response(status: StatusCode, body: &[u8]) -> SonarResult<PingResponse> {
    match status {
        StatusCode::OK => {
            let body: PingBody =
                serde_json::from_slice(body).map_err(|e| SonarError::decode(e.to_string()))?;
            Ok(PingResponse::ok(body.p))
        }
        StatusCode::IM_A_TEAPOT => {
            let body: ErrorBody =
                serde_json::from_slice(body).map_err(|e| SonarError::decode(e.to_string()))?;
            if body.error.is_empty() {
                return Err(SonarError::status(status.as_u16(), "empty domain error"));
            }
            Ok(PingResponse::failure(ProbeError::remote(body.error)))
        }
        _ => {
            let message = serde_json::from_slice::<ErrorBody>(body).map_or_else(
                |_| String::from_utf8_lossy(body).into_owned(),
                |body| body.error,
            );
            Err(SonarError::status(status.as_u16(), message))
        }
    }
}
