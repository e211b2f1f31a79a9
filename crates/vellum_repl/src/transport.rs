//! Transport abstraction and the in-process loopback transport.

use crate::conflict::{apply_delta, DefaultResolver};
use crate::error::{ReplError, ReplResult};
use crate::message::{
    BasicCredentials, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse,
    PushRequest, PushResponse, RevisionDelta, PROTOCOL_VERSION,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use vellum_core::{Database, SequenceNumber};

/// Session transport to a replication peer.
///
/// Implementations own framing and encoding; the replicator only sees the
/// message types. Every method may block up to the configured timeout.
pub trait ReplTransport: Send + Sync {
    /// Opens a session.
    fn handshake(&self, request: &HandshakeRequest) -> ReplResult<HandshakeResponse>;

    /// Requests changes after a sequence.
    fn pull(&self, request: &PullRequest) -> ReplResult<PullResponse>;

    /// Sends local changes.
    fn push(&self, request: &PushRequest) -> ReplResult<PushResponse>;

    /// Closes the session. Idempotent.
    fn close(&self) -> ReplResult<()>;
}

/// Transport bound directly to another open database in this process.
///
/// Used by tests and by applications that replicate between two local
/// databases. Pushes are applied to the peer with the default conflict
/// rule.
pub struct LoopbackTransport {
    peer: Database,
    connected: AtomicBool,
    required_credentials: Option<BasicCredentials>,
}

impl LoopbackTransport {
    /// Binds the transport to a peer database.
    #[must_use]
    pub fn new(peer: Database) -> Self {
        Self {
            peer,
            connected: AtomicBool::new(true),
            required_credentials: None,
        }
    }

    /// Requires sessions to present these basic credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.required_credentials = Some(BasicCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Simulates losing or regaining the connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn check_connected(&self) -> ReplResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ReplError::transport_retryable("loopback peer unreachable"))
        }
    }
}

impl ReplTransport for LoopbackTransport {
    fn handshake(&self, request: &HandshakeRequest) -> ReplResult<HandshakeResponse> {
        self.check_connected()?;

        if let Some(required) = &self.required_credentials {
            if request.credentials.as_ref() != Some(required) {
                return Err(ReplError::Authentication("bad credentials".into()));
            }
        }
        if request.protocol_version != PROTOCOL_VERSION {
            return Ok(HandshakeResponse::reject(format!(
                "unsupported protocol version {}",
                request.protocol_version
            )));
        }
        for key in &request.collections {
            if self.peer.collection(&key.scope, &key.name).is_err() {
                return Ok(HandshakeResponse::reject(format!(
                    "peer has no collection {key}"
                )));
            }
        }
        Ok(HandshakeResponse::accept())
    }

    fn pull(&self, request: &PullRequest) -> ReplResult<PullResponse> {
        self.check_connected()?;

        let key = &request.collection;
        let collection = self.peer.collection(&key.scope, &key.name)?;
        let changes = collection.changes_since(
            SequenceNumber::new(request.since),
            Some(request.limit as usize),
        )?;

        let mut deltas = Vec::with_capacity(changes.len());
        let mut last_sequence = request.since;
        for entry in &changes {
            last_sequence = entry.sequence.as_u64();
            // Purged between listing and reading; nothing to send.
            let Some(revision) = collection.document_revision(&entry.document_id)? else {
                continue;
            };
            deltas.push(RevisionDelta {
                collection: key.clone(),
                id: revision.id,
                sequence: revision.sequence.as_u64(),
                revision: revision.revision.as_u64(),
                body: revision.body,
                expiration: revision.expiration.map(|t| t.as_millis()),
            });
        }

        let has_more = last_sequence < collection.last_sequence()?.as_u64();
        Ok(PullResponse {
            deltas,
            last_sequence,
            has_more,
        })
    }

    fn push(&self, request: &PushRequest) -> ReplResult<PushResponse> {
        self.check_connected()?;

        let mut accepted = 0u64;
        for delta in &request.deltas {
            let key = &delta.collection;
            let collection = self.peer.collection(&key.scope, &key.name)?;
            apply_delta(&collection, delta, &DefaultResolver)?;
            accepted += 1;
        }
        Ok(PushResponse { accepted })
    }

    fn close(&self) -> ReplResult<()> {
        Ok(())
    }
}

/// A scripted transport for tests.
///
/// Responses are consumed in order; when a queue runs dry the transport
/// answers with an empty success.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    handshakes: Mutex<VecDeque<ReplResult<HandshakeResponse>>>,
    pulls: Mutex<VecDeque<ReplResult<PullResponse>>>,
    pushes: Mutex<VecDeque<ReplResult<PushResponse>>>,
}

impl MockTransport {
    /// Creates a connected mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            handshakes: Mutex::new(VecDeque::new()),
            pulls: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues a handshake outcome.
    pub fn enqueue_handshake(&self, outcome: ReplResult<HandshakeResponse>) {
        self.handshakes.lock().push_back(outcome);
    }

    /// Queues a pull outcome.
    pub fn enqueue_pull(&self, outcome: ReplResult<PullResponse>) {
        self.pulls.lock().push_back(outcome);
    }

    /// Queues a push outcome.
    pub fn enqueue_push(&self, outcome: ReplResult<PushResponse>) {
        self.pushes.lock().push_back(outcome);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn check_connected(&self) -> ReplResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ReplError::transport_retryable("mock disconnected"))
        }
    }
}

impl ReplTransport for MockTransport {
    fn handshake(&self, _request: &HandshakeRequest) -> ReplResult<HandshakeResponse> {
        self.check_connected()?;
        self.handshakes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HandshakeResponse::accept()))
    }

    fn pull(&self, request: &PullRequest) -> ReplResult<PullResponse> {
        self.check_connected()?;
        self.pulls.lock().pop_front().unwrap_or_else(|| {
            Ok(PullResponse {
                deltas: Vec::new(),
                last_sequence: request.since,
                has_more: false,
            })
        })
    }

    fn push(&self, request: &PushRequest) -> ReplResult<PushResponse> {
        self.check_connected()?;
        self.pushes.lock().pop_front().unwrap_or_else(|| {
            Ok(PushResponse {
                accepted: request.deltas.len() as u64,
            })
        })
    }

    fn close(&self) -> ReplResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CollectionKey;

    #[test]
    fn disconnected_mock_fails_retryably() {
        let mock = MockTransport::new();
        mock.set_connected(false);
        let request = PullRequest {
            collection: CollectionKey::new("_default", "_default"),
            since: 0,
            limit: 10,
        };
        let err = mock.pull(&request).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn loopback_rejects_unknown_collections() {
        let peer = Database::open_in_memory("loopback-hs").unwrap();
        let transport = LoopbackTransport::new(peer);
        let request = HandshakeRequest {
            client_id: "client".into(),
            protocol_version: PROTOCOL_VERSION,
            collections: vec![CollectionKey::new("nope", "nothing")],
            credentials: None,
        };
        let response = transport.handshake(&request).unwrap();
        assert!(!response.accepted);
    }

    #[test]
    fn loopback_enforces_credentials() {
        let peer = Database::open_in_memory("loopback-auth").unwrap();
        let transport = LoopbackTransport::new(peer).with_credentials("sync", "s3cret");
        let request = HandshakeRequest {
            client_id: "client".into(),
            protocol_version: PROTOCOL_VERSION,
            collections: vec![CollectionKey::new("_default", "_default")],
            credentials: None,
        };
        assert!(matches!(
            transport.handshake(&request),
            Err(ReplError::Authentication(_))
        ));
    }
}
