//! Post-commit change notification.
//!
//! Two delivery mechanisms share the same [`ChangeEvent`] type:
//!
//! - [`ChangeFeed`] hands out mpsc receivers, for consumers that poll on
//!   their own schedule (the replicator's push side).
//! - [`Notifier`] invokes registered callbacks from a dedicated dispatch
//!   thread, for consumers that want to be driven (live queries and
//!   collection change listeners). Callbacks for one notifier are
//!   serialized; a slow listener delays later events but never re-enters.
//!
//! Events are published after the originating commit is durable and its
//! locks are released, so a listener reading back through the database
//! observes the committed state.

use crate::types::{CollectionId, SequenceNumber};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

/// A committed document change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Collection the change happened in.
    pub collection: CollectionId,
    /// Key of the changed document.
    pub document_id: String,
    /// Sequence number assigned by the commit.
    pub sequence: SequenceNumber,
    /// True if the change is a deletion (tombstone write).
    pub deleted: bool,
}

/// Fan-out of change events to mpsc subscribers.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates an empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publishes an event to all live subscribers, pruning dead ones.
    pub fn publish(&self, event: &ChangeEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync + 'static>;
type ListenerMap = Mutex<HashMap<u64, Callback>>;

/// Deregisters its listener when dropped.
#[must_use = "dropping the token removes the listener"]
pub struct ListenerToken {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl std::fmt::Debug for ListenerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerToken").field("id", &self.id).finish()
    }
}

impl Drop for ListenerToken {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(&self.id);
        }
    }
}

/// Dispatches change events to callbacks on a background thread.
pub struct Notifier {
    listeners: Arc<ListenerMap>,
    next_id: AtomicU64,
    tx: Sender<ChangeEvent>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl Notifier {
    /// Creates a notifier and starts its dispatch thread.
    #[must_use]
    pub fn new() -> Self {
        let listeners: Arc<ListenerMap> = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel::<ChangeEvent>();

        let dispatch = Arc::clone(&listeners);
        let handle = std::thread::Builder::new()
            .name("vellum-notifier".into())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    // Snapshot ids, then clone each callback out of the map
                    // and invoke it with the lock released, so a callback may
                    // register or drop listeners without deadlocking.
                    let ids: Vec<u64> = dispatch.lock().keys().copied().collect();
                    for id in ids {
                        let callback = dispatch.lock().get(&id).map(Arc::clone);
                        if let Some(callback) = callback {
                            callback(&event);
                        }
                    }
                }
            })
            .ok();

        Self {
            listeners,
            next_id: AtomicU64::new(1),
            tx,
            handle,
        }
    }

    /// Registers a callback; it stays active until the token is dropped.
    pub fn add_listener(
        &self,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> ListenerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Arc::new(callback));
        ListenerToken {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Queues an event for dispatch.
    pub fn publish(&self, event: ChangeEvent) {
        // Send only fails if the dispatch thread is gone; events are then
        // silently dropped, matching shutdown semantics.
        let _ = self.tx.send(event);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the channel ends the dispatch loop after queued events.
        let (closed_tx, _) = mpsc::channel();
        self.tx = closed_tx;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
