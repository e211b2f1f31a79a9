//! The replicator: background session, activity machine, listeners.

use crate::checkpoint;
use crate::config::{Authenticator, CollectionConfig, ReplicatorConfig};
use crate::conflict::{apply_delta, ConflictResolver, DefaultResolver};
use crate::error::{ReplError, ReplResult};
use crate::message::{
    BasicCredentials, CollectionKey, HandshakeRequest, PullRequest, PushRequest, RevisionDelta,
    PROTOCOL_VERSION,
};
use crate::transport::ReplTransport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vellum_core::{ChangeEvent, Database, SequenceNumber};

/// Granularity of stop checks inside waits and backoff sleeps.
const STOP_POLL: Duration = Duration::from_millis(50);

/// What the replicator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    /// No session is running.
    #[default]
    Stopped,
    /// The session lost its connection and is waiting to reconnect.
    Offline,
    /// The session is opening a connection and handshaking.
    Connecting,
    /// A continuous session is waiting for changes.
    Idle,
    /// Documents are being transferred.
    Busy,
}

impl Activity {
    /// True while a session exists, in any state but `Stopped`.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Activity::Stopped
    }
}

/// Transfer progress for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Documents transferred so far.
    pub completed: u64,
    /// Documents known to need transfer.
    pub total: u64,
}

/// A snapshot of the replicator's state, delivered to status listeners.
///
/// An error does not imply `Stopped`; recoverable failures report
/// `Offline` with the error while the session keeps retrying.
#[derive(Debug, Clone, Default)]
pub struct ReplicatorStatus {
    /// Current activity.
    pub activity: Activity,
    /// Transfer progress.
    pub progress: Progress,
    /// Most recent error, if any.
    pub error: Option<Arc<ReplError>>,
}

/// A per-document replication notification.
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    /// Collection of the document.
    pub collection: CollectionKey,
    /// Document key.
    pub id: String,
    /// True if the replicated revision was a deletion.
    pub deleted: bool,
    /// True if the document was pushed; false if pulled.
    pub pushed: bool,
}

type StatusCallback = Arc<dyn Fn(&ReplicatorStatus) + Send + Sync>;
type DocumentCallback = Arc<dyn Fn(&DocumentEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    status: Mutex<HashMap<u64, StatusCallback>>,
    documents: Mutex<HashMap<u64, DocumentCallback>>,
}

enum Notification {
    Status(ReplicatorStatus),
    Document(DocumentEvent),
}

#[derive(Clone, Copy)]
enum ListenerKind {
    Status,
    Document,
}

/// Deregisters a replicator listener when dropped.
pub struct ListenerToken {
    id: u64,
    kind: ListenerKind,
    listeners: Weak<Listeners>,
}

impl Drop for ListenerToken {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            match self.kind {
                ListenerKind::Status => {
                    listeners.status.lock().remove(&self.id);
                }
                ListenerKind::Document => {
                    listeners.documents.lock().remove(&self.id);
                }
            }
        }
    }
}

struct ReplicatorInner {
    db: Database,
    config: ReplicatorConfig,
    transport: Arc<dyn ReplTransport>,
    status: Mutex<ReplicatorStatus>,
    listeners: Arc<Listeners>,
    notify_tx: Mutex<Option<mpsc::Sender<Notification>>>,
    stop_requested: AtomicBool,
    next_listener_id: AtomicU64,
}

impl ReplicatorInner {
    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn notify(&self, notification: Notification) {
        if let Some(tx) = &*self.notify_tx.lock() {
            let _ = tx.send(notification);
        }
    }

    /// Mutates the status under its lock, then publishes the new snapshot.
    fn update_status(&self, apply: impl FnOnce(&mut ReplicatorStatus)) {
        let snapshot = {
            let mut status = self.status.lock();
            apply(&mut status);
            status.clone()
        };
        self.notify(Notification::Status(snapshot));
    }

    fn set_activity(&self, activity: Activity) {
        self.update_status(|s| s.activity = activity);
    }
}

/// Replicates configured collections between the local database and a
/// peer reached through a [`ReplTransport`].
///
/// The session runs on a background thread. `start` and `stop` are
/// non-blocking; completion and failures are observed through status
/// listeners.
pub struct Replicator {
    inner: Arc<ReplicatorInner>,
    session: Mutex<Option<JoinHandle<()>>>,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    /// Creates a replicator over the given transport.
    ///
    /// # Errors
    ///
    /// Fails if no collections are configured or a configured collection
    /// does not exist locally.
    pub fn new(
        db: &Database,
        config: ReplicatorConfig,
        transport: impl ReplTransport + 'static,
    ) -> ReplResult<Self> {
        if config.collections.is_empty() {
            return Err(ReplError::Database(vellum_core::Error::invalid_argument(
                "replicator needs at least one collection",
            )));
        }
        for cc in &config.collections {
            db.collection(&cc.scope, &cc.name)?;
        }

        let listeners = Arc::new(Listeners::default());
        let (tx, rx) = mpsc::channel::<Notification>();
        let dispatch_targets = Arc::downgrade(&listeners);
        let notifier = thread::Builder::new()
            .name("vellum-repl-notify".into())
            .spawn(move || dispatch_loop(&rx, &dispatch_targets))
            .ok();

        Ok(Self {
            inner: Arc::new(ReplicatorInner {
                db: db.clone(),
                config,
                transport: Arc::new(transport),
                status: Mutex::new(ReplicatorStatus::default()),
                listeners,
                notify_tx: Mutex::new(Some(tx)),
                stop_requested: AtomicBool::new(false),
                next_listener_id: AtomicU64::new(1),
            }),
            session: Mutex::new(None),
            notifier: Mutex::new(notifier),
        })
    }

    /// Starts a session. No-op if one is already running.
    ///
    /// With `reset_checkpoint` the persisted progress markers are
    /// discarded first and replication rescans from sequence zero.
    pub fn start(&self, reset_checkpoint: bool) {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if let Some(finished) = session.take() {
            let _ = finished.join();
        }

        self.inner.stop_requested.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *session = thread::Builder::new()
            .name("vellum-repl".into())
            .spawn(move || session_main(&inner, reset_checkpoint))
            .ok();
    }

    /// Requests a graceful stop at the next batch boundary.
    ///
    /// Non-blocking; observe completion through a status listener
    /// reaching [`Activity::Stopped`].
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
    }

    /// The current status snapshot.
    #[must_use]
    pub fn status(&self) -> ReplicatorStatus {
        self.inner.status.lock().clone()
    }

    /// Registers a status listener, called on every status change.
    ///
    /// Dispatch runs serialized on this replicator's notification thread.
    pub fn add_status_listener(
        &self,
        callback: impl Fn(&ReplicatorStatus) + Send + Sync + 'static,
    ) -> ListenerToken {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .status
            .lock()
            .insert(id, Arc::new(callback));
        ListenerToken {
            id,
            kind: ListenerKind::Status,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Registers a listener for per-document push/pull notifications.
    pub fn add_document_listener(
        &self,
        callback: impl Fn(&DocumentEvent) + Send + Sync + 'static,
    ) -> ListenerToken {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .documents
            .lock()
            .insert(id, Arc::new(callback));
        ListenerToken {
            id,
            kind: ListenerKind::Document,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        if let Some(session) = self.session.lock().take() {
            let _ = session.join();
        }
        *self.inner.notify_tx.lock() = None;
        if let Some(notifier) = self.notifier.lock().take() {
            let _ = notifier.join();
        }
    }
}

/// Listener dispatch loop. Callbacks are cloned out of the map and invoked
/// with the lock released, so a callback may register or drop listeners
/// without deadlocking.
fn dispatch_loop(rx: &mpsc::Receiver<Notification>, targets: &Weak<Listeners>) {
    while let Ok(notification) = rx.recv() {
        let Some(listeners) = targets.upgrade() else {
            break;
        };
        match notification {
            Notification::Status(status) => {
                let ids: Vec<u64> = listeners.status.lock().keys().copied().collect();
                for id in ids {
                    let callback = listeners.status.lock().get(&id).map(Arc::clone);
                    if let Some(callback) = callback {
                        callback(&status);
                    }
                }
            }
            Notification::Document(event) => {
                let ids: Vec<u64> = listeners.documents.lock().keys().copied().collect();
                for id in ids {
                    let callback = listeners.documents.lock().get(&id).map(Arc::clone);
                    if let Some(callback) = callback {
                        callback(&event);
                    }
                }
            }
        }
    }
}

/// Session thread body: connect, replicate, reconnect with backoff on
/// recoverable failures, and finish in `Stopped`.
fn session_main(inner: &Arc<ReplicatorInner>, reset_checkpoint: bool) {
    let mut reset_pending = reset_checkpoint;
    let mut attempt = 0u32;
    let mut final_error: Option<Arc<ReplError>> = None;

    loop {
        if inner.stopping() {
            break;
        }
        inner.update_status(|s| {
            s.activity = Activity::Connecting;
            s.progress = Progress::default();
            s.error = None;
        });

        match run_session(inner, &mut reset_pending) {
            Ok(()) | Err(ReplError::Cancelled) => break,
            Err(error) if error.is_retryable() => {
                attempt += 1;
                let error = Arc::new(error);
                tracing::warn!(attempt, %error, "replication went offline");
                if inner.config.max_attempts != 0 && attempt >= inner.config.max_attempts {
                    final_error = Some(error);
                    break;
                }
                inner.update_status(|s| {
                    s.activity = Activity::Offline;
                    s.error = Some(Arc::clone(&error));
                });
                sleep_interruptible(inner, inner.config.retry.delay_for_attempt(attempt - 1));
            }
            Err(error) => {
                tracing::error!(%error, "replication failed");
                final_error = Some(Arc::new(error));
                break;
            }
        }
    }

    let _ = inner.transport.close();
    inner.update_status(|s| {
        s.activity = Activity::Stopped;
        if final_error.is_some() {
            s.error = final_error.clone();
        }
    });
}

fn run_session(inner: &Arc<ReplicatorInner>, reset_pending: &mut bool) -> ReplResult<()> {
    let config = &inner.config;

    if *reset_pending {
        for cc in &config.collections {
            checkpoint::reset(
                &inner.db,
                &config.endpoint,
                &CollectionKey::new(&cc.scope, &cc.name),
            )?;
        }
        *reset_pending = false;
    }

    let credentials = match &config.authenticator {
        Authenticator::Basic { username, password } => Some(BasicCredentials {
            username: username.clone(),
            password: password.clone(),
        }),
        Authenticator::None | Authenticator::PinnedCertificate(_) => None,
    };
    let response = inner.transport.handshake(&HandshakeRequest {
        client_id: inner.db.name().to_string(),
        protocol_version: PROTOCOL_VERSION,
        collections: config
            .collections
            .iter()
            .map(|cc| CollectionKey::new(&cc.scope, &cc.name))
            .collect(),
        credentials,
    })?;
    if !response.accepted {
        return Err(ReplError::Protocol(
            response.error.unwrap_or_else(|| "handshake rejected".into()),
        ));
    }
    tracing::debug!(endpoint = %config.endpoint, "replication session opened");

    // Subscribed before the first cycle, so commits during a cycle are not
    // missed by the idle wait.
    let feed = inner.db.change_feed().subscribe();

    loop {
        inner.set_activity(Activity::Busy);
        for cc in &config.collections {
            if inner.stopping() {
                return Ok(());
            }
            if config.direction.pulls() {
                pull_collection(inner, cc)?;
            }
            if config.direction.pushes() {
                push_collection(inner, cc)?;
            }
        }

        if !config.continuous {
            return Ok(());
        }
        inner.set_activity(Activity::Idle);
        wait_for_wakeup(inner, &feed);
        if inner.stopping() {
            return Ok(());
        }
    }
}

fn pull_collection(inner: &ReplicatorInner, cc: &CollectionConfig) -> ReplResult<()> {
    let key = CollectionKey::new(&cc.scope, &cc.name);
    let collection = inner.db.collection(&cc.scope, &cc.name)?;
    let resolver: &dyn ConflictResolver = cc
        .conflict_resolver
        .as_deref()
        .unwrap_or(&DefaultResolver);
    let mut ckpt = checkpoint::load(&inner.db, &inner.config.endpoint, &key)?;

    loop {
        if inner.stopping() {
            return Err(ReplError::Cancelled);
        }
        let response = inner.transport.pull(&PullRequest {
            collection: key.clone(),
            since: ckpt.remote,
            limit: inner.config.batch_size,
        })?;

        let batch = response.deltas.len() as u64;
        inner.update_status(|s| s.progress.total += batch);

        for delta in &response.deltas {
            if cc.pull_filter.as_ref().is_some_and(|f| !f(delta)) {
                continue;
            }
            if apply_delta(&collection, delta, resolver)? {
                inner.notify(Notification::Document(DocumentEvent {
                    collection: key.clone(),
                    id: delta.id.clone(),
                    deleted: delta.is_deleted(),
                    pushed: false,
                }));
            }
        }
        inner.update_status(|s| s.progress.completed += batch);

        ckpt.remote = response.last_sequence;
        checkpoint::store(&inner.db, &inner.config.endpoint, &key, ckpt)?;

        if !response.has_more {
            return Ok(());
        }
    }
}

fn push_collection(inner: &ReplicatorInner, cc: &CollectionConfig) -> ReplResult<()> {
    let key = CollectionKey::new(&cc.scope, &cc.name);
    let collection = inner.db.collection(&cc.scope, &cc.name)?;
    let batch_size = inner.config.batch_size as usize;
    let mut ckpt = checkpoint::load(&inner.db, &inner.config.endpoint, &key)?;

    loop {
        if inner.stopping() {
            return Err(ReplError::Cancelled);
        }
        let changes =
            collection.changes_since(SequenceNumber::new(ckpt.local), Some(batch_size))?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut last = ckpt.local;
        let mut deltas = Vec::with_capacity(changes.len());
        for entry in &changes {
            last = entry.sequence.as_u64();
            // Purged after the change was listed; nothing to send.
            let Some(revision) = collection.document_revision(&entry.document_id)? else {
                continue;
            };
            let delta = RevisionDelta {
                collection: key.clone(),
                id: revision.id,
                sequence: revision.sequence.as_u64(),
                revision: revision.revision.as_u64(),
                body: revision.body,
                expiration: revision.expiration.map(|t| t.as_millis()),
            };
            // Filtered changes still advance the checkpoint.
            if cc.push_filter.as_ref().is_some_and(|f| !f(&delta)) {
                continue;
            }
            deltas.push(delta);
        }

        inner.update_status(|s| s.progress.total += deltas.len() as u64);
        if !deltas.is_empty() {
            inner.transport.push(&PushRequest {
                deltas: deltas.clone(),
            })?;
            for delta in &deltas {
                inner.notify(Notification::Document(DocumentEvent {
                    collection: key.clone(),
                    id: delta.id.clone(),
                    deleted: delta.is_deleted(),
                    pushed: true,
                }));
            }
        }
        inner.update_status(|s| s.progress.completed += deltas.len() as u64);

        ckpt.local = last;
        checkpoint::store(&inner.db, &inner.config.endpoint, &key, ckpt)?;

        if changes.len() < batch_size {
            return Ok(());
        }
    }
}

/// Idle wait in continuous mode: returns on a local commit, the heartbeat
/// deadline, or a stop request.
fn wait_for_wakeup(inner: &ReplicatorInner, feed: &mpsc::Receiver<ChangeEvent>) {
    let deadline = Instant::now() + inner.config.heartbeat;
    loop {
        if inner.stopping() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let slice = (deadline - now).min(STOP_POLL);
        match feed.recv_timeout(slice) {
            Ok(_) => {
                // Coalesce the burst; one cycle covers all of it.
                while feed.try_recv().is_ok() {}
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn sleep_interruptible(inner: &ReplicatorInner, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        if inner.stopping() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}
