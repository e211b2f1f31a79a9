//! # Vellum Storage
//!
//! Append-only storage backends for VellumDB.
//!
//! Backends are opaque byte logs: they support positional reads, appends,
//! flushing, and truncation, and nothing else. All record framing and
//! interpretation is owned by `vellum_core`.
//!
//! ## Available backends
//!
//! - [`MemoryBackend`] - for tests and ephemeral databases
//! - [`FileBackend`] - persistent storage on the local filesystem
//!
//! ## Example
//!
//! ```rust
//! use vellum_storage::{MemoryBackend, StorageBackend};
//!
//! let backend = MemoryBackend::new();
//! let offset = backend.append(b"hello").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
