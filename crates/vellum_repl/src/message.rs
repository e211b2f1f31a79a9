//! Revision-delta protocol messages.
//!
//! The replicator speaks a checkpointed revision-delta protocol: each side
//! asks for changes after a sequence it has already seen and receives the
//! latest revision of every document changed since. Framing and transport
//! encoding live behind [`crate::ReplTransport`].

use serde::{Deserialize, Serialize};
use vellum_core::Object;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// A scope-qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionKey {
    /// Scope name.
    pub scope: String,
    /// Collection name.
    pub name: String,
}

impl CollectionKey {
    /// Creates a key.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.scope, self.name)
    }
}

/// The latest revision of one changed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionDelta {
    /// Collection the document belongs to.
    pub collection: CollectionKey,
    /// Document key.
    pub id: String,
    /// Sequence of this change on the sending side.
    pub sequence: u64,
    /// Revision counter on the sending side.
    pub revision: u64,
    /// Properties; `None` is a tombstone.
    pub body: Option<Object>,
    /// Expiration in epoch milliseconds, if set.
    pub expiration: Option<i64>,
}

impl RevisionDelta {
    /// True if this delta carries a deletion.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.body.is_none()
    }
}

/// Basic credentials carried in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Opening message of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Stable identifier of the client database.
    pub client_id: String,
    /// Protocol version the client speaks.
    pub protocol_version: u16,
    /// Collections the client wants to replicate.
    pub collections: Vec<CollectionKey>,
    /// Credentials, when basic authentication is configured.
    pub credentials: Option<BasicCredentials>,
}

/// Answer to a handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Protocol version the peer speaks.
    pub protocol_version: u16,
    /// True if the session may proceed.
    pub accepted: bool,
    /// Rejection reason when not accepted.
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// An accepting response.
    #[must_use]
    pub fn accept() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            accepted: true,
            error: None,
        }
    }

    /// A rejecting response.
    pub fn reject(error: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            accepted: false,
            error: Some(error.into()),
        }
    }
}

/// Request for changes after a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// Collection to pull from.
    pub collection: CollectionKey,
    /// Sequence after which changes are wanted.
    pub since: u64,
    /// Maximum number of deltas in the response.
    pub limit: u32,
}

/// A batch of changes from the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changed documents, in sequence order.
    pub deltas: Vec<RevisionDelta>,
    /// Highest peer sequence covered by this batch.
    pub last_sequence: u64,
    /// True if more changes are available past `last_sequence`.
    pub has_more: bool,
}

/// A batch of local changes sent to the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    /// Changed documents, in sequence order.
    pub deltas: Vec<RevisionDelta>,
}

/// Acknowledgement of a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    /// Number of deltas the peer applied or deliberately skipped.
    pub accepted: u64,
}
