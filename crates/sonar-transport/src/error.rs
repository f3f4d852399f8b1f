//! Server lifecycle errors.
//!
//! Per-call failures travel as [`sonar_core::SonarError`]. These errors
//! only concern binding and running a listener.

use thiserror::Error;

/// Errors raised while starting or running a server.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listen address could not be bound.
    #[error("bind error: {0}")]
    Bind(String),

    /// I/O failure on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The gRPC server stopped with an error.
    #[error("gRPC server error: {0}")]
    Grpc(#[from] tonic::transport::Error),
}

impl ServeError {
    /// Creates a bind error.
    pub fn bind(addr: &str, err: impl std::fmt::Display) -> Self {
        Self::Bind(format!("failed to bind to {addr}: {err}"))
    }
}

/// Binds a TCP listener, mapping failures to [`ServeError::Bind`].
pub async fn bind(addr: &str) -> Result<tokio::net::TcpListener, ServeError> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServeError::bind(addr, e))
}
