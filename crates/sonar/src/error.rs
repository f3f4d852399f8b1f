//! Application errors.

use sonar_config::ConfigError;
use sonar_core::SonarError;
use sonar_telemetry::TelemetryError;
use sonar_transport::ServeError;
use thiserror::Error;

/// Errors raised while starting or running Sonar.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Telemetry could not be initialized.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// A server failed to bind or stopped with an error.
    #[error("{server} server error: {source}")]
    Serve {
        /// Transport name.
        server: &'static str,
        /// Underlying error.
        source: ServeError,
    },

    /// The probe service or a client could not be built.
    #[error(transparent)]
    Service(#[from] SonarError),

    /// A server task panicked.
    #[error("{0} server task failed")]
    Task(&'static str),
}

impl AppError {
    /// Creates a server error for `server`.
    #[must_use]
    pub const fn serve(server: &'static str, source: ServeError) -> Self {
        Self::Serve { server, source }
    }
}
