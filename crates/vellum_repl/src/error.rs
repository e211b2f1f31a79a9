//! Error types for the replicator.

use thiserror::Error;

/// Result type for replication operations.
pub type ReplResult<T> = Result<T, ReplError>;

/// Errors raised by the replicator.
///
/// During a running session these never surface synchronously; they reach
/// the caller through status listeners.
#[derive(Error, Debug)]
pub enum ReplError {
    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether reconnecting may succeed.
        retryable: bool,
    },

    /// The endpoint rejected the credentials. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The peer sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local database failure while reading or applying changes.
    #[error("database error: {0}")]
    Database(#[from] vellum_core::Error),

    /// The session was stopped at a batch boundary.
    #[error("replication cancelled")]
    Cancelled,

    /// The peer did not answer within the configured timeout.
    #[error("operation timed out")]
    Timeout,
}

impl ReplError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// True if a reconnect attempt is worthwhile.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplError::Transport { retryable, .. } => *retryable,
            ReplError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ReplError::transport_retryable("connection reset").is_retryable());
        assert!(!ReplError::transport_fatal("bad certificate").is_retryable());
        assert!(ReplError::Timeout.is_retryable());
        assert!(!ReplError::Authentication("denied".into()).is_retryable());
        assert!(!ReplError::Cancelled.is_retryable());
        assert!(!ReplError::Protocol("junk".into()).is_retryable());
    }
}
