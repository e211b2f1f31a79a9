//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the log.
    #[error("read past end of log: offset {offset}, len {len}, log size {size}")]
    ReadPastEnd {
        /// Requested read offset.
        offset: u64,
        /// Requested read length.
        len: usize,
        /// Current log size in bytes.
        size: u64,
    },

    /// Attempted to truncate the log to a larger size.
    #[error("cannot truncate log of {size} bytes to {requested} bytes")]
    TruncateBeyondEnd {
        /// Requested new size.
        requested: u64,
        /// Current log size in bytes.
        size: u64,
    },
}
