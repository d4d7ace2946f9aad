//! Image acquisition error types.

use thiserror::Error;

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Server answered with a non-success status code.
    Status(u16),
    /// Request did not finish in time.
    Timeout,
    /// Connection could not be established.
    Connect,
    /// Response body could not be read.
    Transfer,
    /// Fetch task stopped without producing a result.
    Aborted,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connect"),
            Self::Transfer => write!(f, "transfer"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Transport failure reported by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct NetworkError {
    /// Failure class, carrying the status code when there is one.
    pub kind: NetworkErrorKind,
    /// Human readable detail from the transport.
    pub message: String,
}

impl NetworkError {
    /// Creates a network error.
    #[must_use]
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an error for a non-success HTTP status.
    #[must_use]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::Status(code), message)
    }

    /// Returns the HTTP status code if the server answered.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self.kind {
            NetworkErrorKind::Status(code) => Some(code),
            _ => None,
        }
    }
}

/// Errors surfaced by the image controller.
///
/// Cloneable so that one outcome can be delivered to every waiter of a
/// shared fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The transport failed.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// The fetch was cancelled before a result was in hand.
    #[error("image fetch cancelled")]
    Cancelled,

    /// Reading or writing the disk cache failed.
    #[error("storage error ({kind}): {message}")]
    Storage {
        /// Underlying I/O error kind.
        kind: std::io::ErrorKind,
        /// Context and I/O error text.
        message: String,
    },

    /// Bytes are not a recognizable image.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ImageError {
    /// Creates a storage error from an I/O error with context.
    #[must_use]
    pub fn storage(context: &str, err: &std::io::Error) -> Self {
        Self::Storage {
            kind: err.kind(),
            message: format!("{context}: {err}"),
        }
    }

    /// Returns whether the error came from the cancellation path.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether the error is a transport failure.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns whether the error came from the disk cache.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

/// Result type for image operations.
pub type ImageResult<T> = std::result::Result<T, ImageError>;
