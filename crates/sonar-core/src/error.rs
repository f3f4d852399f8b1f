//! Error types for Sonar.
//!
//! Errors are split in two layers:
//!
//! - [`ProbeError`] is the domain error. Only the probe service originates
//!   it, and every transport carries it on a dedicated error channel.
//! - [`SonarError`] covers everything else that can go wrong on the way to
//!   or from the service: admission control, cancellation, transport and
//!   codec failures. A domain error that has to travel through a
//!   `Result` (for example out of a client library) is wrapped in
//!   [`SonarError::Probe`].
//!
//! | Category | Variants | HTTP status |
//! |---|---|---|
//! | `Domain` | `Probe` | 418 |
//! | `Admission` | `RateLimited`, `CircuitOpen` | 500 |
//! | `Cancelled` | `Cancelled`, `DeadlineExceeded` | 500 |
//! | `Transport` | `Transport`, `Decode`, `Encode`, `Status`, `Config` | 500 |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`SonarError`].
pub type SonarResult<T> = Result<T, SonarError>;

/// The domain error returned by the probe service.
///
/// `Failed` is the sentinel. It is not a bug signal and must stay
/// distinguishable from infrastructure failures at every layer.
/// `Remote` is what a client gets back after the error crossed the
/// wire as a plain string: the message survives, the identity does not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The probe failed on purpose.
    #[error("probe failed")]
    Failed,

    /// A domain error reconstructed from its wire representation.
    #[error("{0}")]
    Remote(String),
}

impl ProbeError {
    /// Creates a domain error from a message received over the wire.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Returns `true` for the locally originated sentinel.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Encodes an optional domain error as a wire string.
///
/// `None` encodes as the empty string.
#[must_use]
pub fn err_string(err: Option<&ProbeError>) -> String {
    err.map(ToString::to_string).unwrap_or_default()
}

/// Decodes a wire string into an optional domain error.
///
/// The empty string decodes as `None`; anything else becomes a
/// [`ProbeError::Remote`] carrying the same message.
#[must_use]
pub fn err_from_string(s: &str) -> Option<ProbeError> {
    if s.is_empty() {
        None
    } else {
        Some(ProbeError::remote(s))
    }
}

/// Categories of errors for classification and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Domain failure returned by the service.
    Domain,
    /// Rejected by rate limiting or circuit breaking.
    Admission,
    /// The caller cancelled the call or its deadline passed.
    Cancelled,
    /// Network, codec or remote status failure.
    Transport,
}

impl ErrorCategory {
    /// Returns the HTTP status code used for this category.
    ///
    /// Only domain failures get the unusual `418`; everything else is a
    /// plain internal error.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Domain => StatusCode::IM_A_TEAPOT,
            Self::Admission | Self::Cancelled | Self::Transport => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Standard error type for Sonar.
///
/// # Example
///
/// ```
/// use sonar_core::{ErrorCategory, ProbeError, SonarError};
///
/// let err = SonarError::from(ProbeError::Failed);
/// assert_eq!(err.category(), ErrorCategory::Domain);
/// assert_eq!(err.status_code().as_u16(), 418);
///
/// let err = SonarError::rate_limited();
/// assert_eq!(err.status_code().as_u16(), 500);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SonarError {
    /// Domain failure.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// The rate limiter had no token left.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The circuit breaker rejected the call.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen {
        /// Name of the breaker.
        name: String,
    },

    /// The call was cancelled by its caller.
    #[error("call cancelled")]
    Cancelled,

    /// The call deadline passed before completion.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Connection or I/O failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A wire payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be encoded for the wire.
    #[error("encode error: {0}")]
    Encode(String),

    /// A remote server answered with a non-success status.
    #[error("remote error ({code}): {message}")]
    Status {
        /// Protocol specific status code.
        code: u16,
        /// Message supplied by the remote side.
        message: String,
    },

    /// Invalid construction-time configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SonarError {
    /// Creates a rate limit error.
    #[must_use]
    pub const fn rate_limited() -> Self {
        Self::RateLimited
    }

    /// Creates a circuit-open error for the named breaker.
    pub fn circuit_open(name: impl Into<String>) -> Self {
        Self::CircuitOpen { name: name.into() }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }

    /// Creates a remote status error.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Probe(_) => ErrorCategory::Domain,
            Self::RateLimited | Self::CircuitOpen { .. } => ErrorCategory::Admission,
            Self::Cancelled | Self::DeadlineExceeded => ErrorCategory::Cancelled,
            Self::Transport(_)
            | Self::Decode(_)
            | Self::Encode(_)
            | Self::Status { .. }
            | Self::Config(_) => ErrorCategory::Transport,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().default_status_code()
    }

    /// Returns the domain error if this is one.
    #[must_use]
    pub const fn as_probe(&self) -> Option<&ProbeError> {
        match self {
            Self::Probe(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` for domain failures.
    #[must_use]
    pub const fn is_domain(&self) -> bool {
        matches!(self, Self::Probe(_))
    }

    /// Returns `true` for rate-limit and circuit-open rejections.
    #[must_use]
    pub const fn is_admission(&self) -> bool {
        matches!(self.category(), ErrorCategory::Admission)
    }

    /// Returns `true` if the caller cancelled the call or ran out of time.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self.category(), ErrorCategory::Cancelled)
    }
}

/// JSON body written on the HTTP error channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message.
    pub error: String,
}

impl ErrorBody {
    /// Creates an error body from any displayable error.
    pub fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}
