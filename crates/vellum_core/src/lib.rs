//! # Vellum Core
//!
//! Embedded document store for VellumDB.
//!
//! This crate provides:
//! - Scoped, named collections of JSON-like documents
//! - Versioned documents with optimistic concurrency control
//! - Per-collection monotonic sequence numbers and tombstoned deletes
//! - Document expiration
//! - Journal-based durability with crash recovery
//! - Secondary value and full-text indexes
//! - A post-commit change feed for live queries and replication

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod change_feed;
mod collection;
mod config;
mod database;
mod dir;
mod document;
mod error;
pub mod index;
mod journal;
mod types;
mod value;

pub use change_feed::{ChangeEvent, ChangeFeed, ListenerToken, Notifier};
pub use collection::{ChangeEntry, Collection, ConcurrencyControl, DocumentRevision};
pub use config::Config;
pub use database::Database;
pub use document::{Document, MutableDocument};
pub use error::{Error, Result};
pub use index::IndexSpec;
pub use types::{CollectionId, Revision, SequenceNumber, Timestamp};
pub use value::{Object, Value};

/// Name of the default scope present in every database.
pub const DEFAULT_SCOPE: &str = "_default";

/// Name of the default collection present in the default scope.
pub const DEFAULT_COLLECTION: &str = "_default";
