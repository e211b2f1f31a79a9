//! Error types for the document store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in store, document, and query operations.
///
/// Callers are expected to branch on the error kind, never on message
/// text; messages are informational only.
#[derive(Debug, Error)]
pub enum Error {
    /// A named entity (collection, document, index) does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// A save was rejected because the document changed since it was loaded.
    #[error("conflict saving document {id}: stored revision changed")]
    Conflict {
        /// Id of the conflicting document.
        id: String,
    },

    /// A query source failed to parse.
    #[error("query syntax error at byte {position}: {message}")]
    QuerySyntax {
        /// Byte offset within the query source.
        position: usize,
        /// What went wrong.
        message: String,
    },

    /// The database location is locked by another process or has an
    /// incompatible format.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Why the store could not be opened.
        message: String,
    },

    /// A query result row was read after the cursor advanced past it.
    #[error("stale result access: row was superseded by a later row")]
    StaleResultAccess,

    /// An argument was malformed or out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was invalid.
        message: String,
    },

    /// The database has been closed.
    #[error("store is closed")]
    StoreClosed,

    /// The journal or catalog is corrupted.
    #[error("corrupt store: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] vellum_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a conflict error for a document id.
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Creates a query syntax error at a byte offset.
    pub fn query_syntax(position: usize, message: impl Into<String>) -> Self {
        Self::QuerySyntax {
            position,
            message: message.into(),
        }
    }

    /// Creates a store-unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}
