//! Error types for the context synchronization engine

use thiserror::Error;

/// Errors surfaced by the public manager API.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown context: {0}")]
    UnknownContext(String),

    #[error("manager has been disposed")]
    Disposed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("client error: {0}")]
    Client(#[from] WatchError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error reported by a list/watch capability.
///
/// Transient by default: a failed list or a broken watch stream is retried
/// on the owning context's backoff. Non-retryable errors (denied permissions,
/// malformed requests) still mark the context with an error string but are
/// retried on the slow path only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WatchError {
    pub message: String,
    pub retryable: bool,
}

impl WatchError {
    /// A transient error that should be retried with backoff.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// An error that retrying is unlikely to fix (e.g. RBAC denial).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// The watch stream ended without an explicit error event.
    pub fn stream_closed() -> Self {
        Self::new("watch stream closed by peer")
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}
