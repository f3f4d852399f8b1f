//! HTTP server.
//!
//! A hyper 1 HTTP/1.1 server with one route, `POST /ping`, bound to the
//! ping endpoint of an [`EndpointSet`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sonar_transport::{HttpServer, ShutdownSignal};
//!
//! let listener = sonar_transport::bind("0.0.0.0:8081").await?;
//! HttpServer::new(endpoints).serve(listener, ShutdownSignal::with_os_signals()).await?;
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use sonar_core::{CallContext, SonarError};
use sonar_middleware::EndpointSet;
use sonar_telemetry::{extract_context, HeaderExtractor};
use tokio::net::{TcpListener, TcpStream};

use super::{decode_request, encode_error, encode_response, JSON_CONTENT_TYPE, PING_PATH};
use crate::error::ServeError;
use crate::shutdown::{ConnectionTracker, ShutdownSignal, DEFAULT_SHUTDOWN_TIMEOUT};

/// Type alias for the HTTP response.
pub type HttpResponse = Response<Full<Bytes>>;

/// Serves an [`EndpointSet`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpServer {
    endpoints: EndpointSet,
    shutdown_timeout: Duration,
}

impl HttpServer {
    /// Creates a server for `endpoints`.
    #[must_use]
    pub fn new(endpoints: EndpointSet) -> Self {
        Self {
            endpoints,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Sets how long shutdown waits for open connections.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Accepts connections on `listener` until `shutdown` triggers, then
    /// waits for open connections up to the shutdown timeout.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServeError> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "HTTP server listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, remote_addr)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, remote_addr, shutdown).await {
                                tracing::debug!(%remote_addr, error = %e, "HTTP connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "failed to accept HTTP connection"),
                },
                () = shutdown.recv() => break,
            }
        }

        tracker.drain("http", server.shutdown_timeout).await;
        tracing::info!(%addr, "HTTP server stopped");
        Ok(())
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let io = TokioIo::new(stream);
        let server = Arc::clone(self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(req).await) }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                // finish the in-flight request, then close
                conn.as_mut().graceful_shutdown();
                tracing::debug!(%remote_addr, "closing HTTP connection for shutdown");
                conn.await
            }
        }
    }

    async fn handle_request<B>(&self, req: Request<B>) -> HttpResponse
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        if req.uri().path() != PING_PATH {
            return not_found(req.uri().path());
        }
        if req.method() != Method::POST {
            return method_not_allowed(req.method());
        }

        let trace = extract_context(&HeaderExtractor(req.headers()));
        let ctx = CallContext::new().with_trace_context(trace);

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => return error_response(&SonarError::transport(e.to_string())),
        };

        let request = match decode_request(&body) {
            Ok(request) => request,
            Err(err) => return error_response(&err),
        };

        match self.endpoints.ping.call(&ctx, request).await {
            Ok(response) => match encode_response(&response) {
                Ok((status, body)) => json_response(status, body),
                Err(err) => error_response(&err),
            },
            Err(err) => error_response(&err),
        }
    }
}

fn json_response(status: StatusCode, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(JSON_CONTENT_TYPE),
    );
    response
}

fn error_response(err: &SonarError) -> HttpResponse {
    let (status, body) = encode_error(err);
    json_response(status, body)
}

fn not_found(path: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": format!("no route for {path}") });
    json_response(StatusCode::NOT_FOUND, Bytes::from(body.to_string()))
}

fn method_not_allowed(method: &Method) -> HttpResponse {
    let body = serde_json::json!({ "error": format!("method {method} not allowed") });
    let mut response = json_response(StatusCode::METHOD_NOT_ALLOWED, Bytes::from(body.to_string()));
    response
        .headers_mut()
        .insert(header::ALLOW, header::HeaderValue::from_static("POST"));
    response
}
