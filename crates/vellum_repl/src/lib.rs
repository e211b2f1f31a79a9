//! # Vellum Replicator
//!
//! Change replication for VellumDB databases.
//!
//! This crate provides:
//! - A checkpointed revision-delta protocol over a pluggable transport
//! - Push, pull, and bidirectional replication, one-shot or continuous
//! - Per-collection filters and conflict resolvers
//! - An activity state machine with serialized status listeners
//! - Exponential-backoff reconnection after recoverable failures
//! - A loopback transport binding two in-process databases
//!
//! ## Session model
//!
//! A session runs on a background thread. Within each cycle, pull happens
//! before push per collection. Checkpoints persist in the local database's
//! metadata, so a new session resumes where the previous one stopped.
//! Network failures never surface synchronously; status listeners report
//! `Offline` while the session retries and `Stopped` when it gives up.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod conflict;
mod error;
mod message;
mod replicator;
mod transport;

pub use checkpoint::Checkpoint;
pub use config::{
    Authenticator, CollectionConfig, Direction, ReplicationFilter, ReplicatorConfig, RetryConfig,
};
pub use conflict::{ConflictResolver, DefaultResolver, Resolution};
pub use error::{ReplError, ReplResult};
pub use message::{
    BasicCredentials, CollectionKey, HandshakeRequest, HandshakeResponse, PullRequest,
    PullResponse, PushRequest, PushResponse, RevisionDelta, PROTOCOL_VERSION,
};
pub use replicator::{
    Activity, DocumentEvent, ListenerToken, Progress, Replicator, ReplicatorStatus,
};
pub use transport::{LoopbackTransport, MockTransport, ReplTransport};
