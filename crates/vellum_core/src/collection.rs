//! Collections and the per-collection document store.
//!
//! A [`Collection`] is a cheap handle into one named collection of an open
//! database. Every operation revalidates the handle against the catalog,
//! so a handle to a deleted collection fails with `NotFound` instead of
//! touching stale state.
//!
//! Writes take the collection's write lock, append to the journal, apply
//! in memory, then publish a change event after the lock is released.
//! Readers see either the old or the new committed state, never a partial
//! write.

use crate::change_feed::{ChangeEvent, ListenerToken};
use crate::database::DatabaseInner;
use crate::document::{Document, MutableDocument};
use crate::error::{Error, Result};
use crate::index::{BuiltIndex, IndexSpec};
use crate::journal::JournalRecord;
use crate::types::{CollectionId, Revision, SequenceNumber, Timestamp};
use crate::value::{Object, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// How a save or delete treats a concurrent revision change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyControl {
    /// The incoming write wins; properties written since the base revision
    /// was read are overlaid rather than silently discarded.
    #[default]
    LastWriteWins,
    /// The write fails with `Conflict` if the stored revision has moved
    /// past the base revision.
    FailOnConflict,
}

/// One entry in a collection's change history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    /// Key of the changed document.
    pub document_id: String,
    /// Sequence number of the document's latest change.
    pub sequence: SequenceNumber,
    /// True if the latest change was a deletion.
    pub deleted: bool,
}

/// Full stored state of a document, tombstones included.
///
/// Used by replication, which must see deletions and expirations that
/// normal reads hide.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRevision {
    /// Document key.
    pub id: String,
    /// Sequence of the latest change.
    pub sequence: SequenceNumber,
    /// Current revision counter.
    pub revision: Revision,
    /// Properties; `None` marks a tombstone.
    pub body: Option<Object>,
    /// Expiration timestamp, if one is set.
    pub expiration: Option<Timestamp>,
}

impl DocumentRevision {
    /// True if this revision is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.body.is_none()
    }
}

/// A stored document revision; `body: None` is a tombstone.
#[derive(Debug, Clone)]
pub(crate) struct StoredDocument {
    pub(crate) sequence: SequenceNumber,
    pub(crate) revision: Revision,
    pub(crate) body: Option<Object>,
    pub(crate) expiration: Option<Timestamp>,
}

impl StoredDocument {
    fn is_live(&self) -> bool {
        self.body.is_some()
            && !self
                .expiration
                .is_some_and(|e| e.is_past(Timestamp::now()))
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) docs: BTreeMap<String, StoredDocument>,
    pub(crate) by_seq: BTreeMap<SequenceNumber, String>,
    pub(crate) next_seq: u64,
    pub(crate) indexes: BTreeMap<String, (IndexSpec, BuiltIndex)>,
    /// Expiring documents ordered by timestamp, for cheap sweeps.
    expiring: std::collections::BTreeSet<(Timestamp, String)>,
}

impl StoreState {
    fn next_sequence(&mut self) -> SequenceNumber {
        self.next_seq += 1;
        SequenceNumber::new(self.next_seq)
    }

    /// Installs a document revision, maintaining by_seq and indexes.
    pub(crate) fn apply_put(
        &mut self,
        id: &str,
        sequence: SequenceNumber,
        revision: Revision,
        body: Option<Object>,
        expiration: Option<Timestamp>,
    ) {
        if let Some(old) = self.docs.get(id) {
            self.by_seq.remove(&old.sequence);
            if let Some(old_exp) = old.expiration {
                self.expiring.remove(&(old_exp, id.to_string()));
            }
        }
        for (_, (_, index)) in self.indexes.iter_mut() {
            match &body {
                Some(properties) => index.update(id, properties),
                None => index.remove(id),
            }
        }
        if let Some(exp) = expiration {
            self.expiring.insert((exp, id.to_string()));
        }
        self.by_seq.insert(sequence, id.to_string());
        self.docs.insert(
            id.to_string(),
            StoredDocument {
                sequence,
                revision,
                body,
                expiration,
            },
        );
        self.next_seq = self.next_seq.max(sequence.as_u64());
    }

    pub(crate) fn apply_purge(&mut self, id: &str) -> Option<StoredDocument> {
        let stored = self.docs.remove(id)?;
        self.by_seq.remove(&stored.sequence);
        if let Some(exp) = stored.expiration {
            self.expiring.remove(&(exp, id.to_string()));
        }
        for (_, (_, index)) in self.indexes.iter_mut() {
            index.remove(id);
        }
        Some(stored)
    }

    pub(crate) fn apply_set_expiration(&mut self, id: &str, expiration: Option<Timestamp>) {
        if let Some(stored) = self.docs.get_mut(id) {
            if let Some(old) = stored.expiration {
                self.expiring.remove(&(old, id.to_string()));
            }
            stored.expiration = expiration;
            if let Some(exp) = expiration {
                self.expiring.insert((exp, id.to_string()));
            }
        }
    }

    /// Ids of documents whose expiration has passed.
    pub(crate) fn due_expired(&self, now: Timestamp) -> Vec<String> {
        self.expiring
            .iter()
            .take_while(|(ts, _)| ts.is_past(now))
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub(crate) fn apply_create_index(&mut self, name: &str, spec: IndexSpec) {
        let mut index = BuiltIndex::new(&spec);
        for (id, stored) in &self.docs {
            if let Some(body) = &stored.body {
                index.update(id, body);
            }
        }
        self.indexes.insert(name.to_string(), (spec, index));
    }
}

/// Document store backing one collection.
#[derive(Debug)]
pub(crate) struct CollectionStore {
    pub(crate) state: RwLock<StoreState>,
}

impl CollectionStore {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }
}

/// A handle to one collection of an open database.
///
/// Handles are cheap to clone and remain valid until the collection or the
/// database is deleted or closed, after which operations fail.
#[derive(Debug, Clone)]
pub struct Collection {
    inner: Arc<DatabaseInner>,
    id: CollectionId,
    scope: String,
    name: String,
}

impl Collection {
    pub(crate) fn new(
        inner: Arc<DatabaseInner>,
        id: CollectionId,
        scope: String,
        name: String,
    ) -> Self {
        Self {
            inner,
            id,
            scope,
            name,
        }
    }

    /// The collection's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the collection belongs to.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Internal id, stable for the collection's lifetime.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    fn store(&self) -> Result<Arc<CollectionStore>> {
        self.inner.check_open()?;
        if !self.inner.catalog.read().contains_id(self.id) {
            return Err(Error::not_found(format!(
                "collection {}.{}",
                self.scope, self.name
            )));
        }
        self.inner
            .stores
            .read()
            .get(&self.id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("collection {}.{}", self.scope, self.name)))
    }

    fn publish(&self, document_id: String, sequence: SequenceNumber, deleted: bool) {
        let event = ChangeEvent {
            collection: self.id,
            document_id,
            sequence,
            deleted,
        };
        self.inner.feed.publish(&event);
        self.inner.notifier.publish(event);
    }

    /// Number of live, unexpired documents.
    pub fn count(&self) -> Result<u64> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(state.docs.values().filter(|d| d.is_live()).count() as u64)
    }

    /// Highest sequence number committed in this collection.
    pub fn last_sequence(&self) -> Result<SequenceNumber> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(SequenceNumber::new(state.next_seq))
    }

    /// Loads a document snapshot.
    ///
    /// Returns `Ok(None)` for documents that are absent, deleted, or past
    /// their expiration.
    pub fn document(&self, id: &str) -> Result<Option<Document>> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(state.docs.get(id).filter(|d| d.is_live()).map(|stored| {
            Document::new(
                id.to_string(),
                stored.sequence,
                stored.revision,
                stored.body.clone().unwrap_or_default(),
                stored.expiration,
                false,
            )
        }))
    }

    /// Loads a document directly as a mutable copy.
    pub fn mutable_document(&self, id: &str) -> Result<Option<MutableDocument>> {
        Ok(self.document(id)?.map(|doc| doc.to_mutable()))
    }

    /// Saves a document with [`ConcurrencyControl::LastWriteWins`].
    pub fn save(&self, document: &mut MutableDocument) -> Result<Document> {
        self.save_with(document, ConcurrencyControl::LastWriteWins)
    }

    /// Saves a document under the given concurrency control and returns
    /// the committed snapshot.
    ///
    /// On success the document's base revision advances to the committed
    /// revision, so the same instance can be saved again without conflict.
    ///
    /// # Errors
    ///
    /// Fails with `Conflict` under `FailOnConflict` when the stored
    /// revision differs from the document's base revision.
    pub fn save_with(
        &self,
        document: &mut MutableDocument,
        control: ConcurrencyControl,
    ) -> Result<Document> {
        let store = self.store()?;
        let mut state = store.state.write();

        let existing = state.docs.get(document.id());
        let base = document.base_revision();
        let stale = match existing {
            Some(stored) => stored.revision != base,
            None => base != Revision::NONE,
        };

        let mut body = document.properties().clone();
        if stale {
            match control {
                ConcurrencyControl::FailOnConflict => {
                    return Err(Error::conflict(document.id()));
                }
                ConcurrencyControl::LastWriteWins => {
                    if let Some(stored_body) = existing.and_then(|d| d.body.clone()) {
                        body = overlay(stored_body, document.properties());
                    }
                }
            }
        }

        let revision = existing.map_or(Revision::new(1), |d| d.revision.next());
        // Saving keeps any expiration already set on the document.
        let expiration = existing.and_then(|d| d.expiration);
        let sequence = state.next_sequence();

        self.inner.journal.append(&JournalRecord::Put {
            collection: self.id.as_u32(),
            id: document.id().to_string(),
            sequence: sequence.as_u64(),
            revision: revision.as_u64(),
            properties: Value::Object(body.clone()),
            expiration: expiration.map(Timestamp::as_millis),
        })?;

        state.apply_put(
            document.id(),
            sequence,
            revision,
            Some(body.clone()),
            expiration,
        );
        sweep_expired(&self.inner.journal, self.id, &mut state)?;
        drop(state);

        tracing::debug!(
            collection = %self.name,
            id = document.id(),
            %sequence,
            %revision,
            "saved document"
        );
        document.set_base_revision(revision);
        document.set_properties(body.clone());
        self.publish(document.id().to_string(), sequence, false);
        Ok(Document::new(
            document.id().to_string(),
            sequence,
            revision,
            body,
            expiration,
            false,
        ))
    }

    /// Deletes a document with [`ConcurrencyControl::LastWriteWins`].
    pub fn delete(&self, document: &Document) -> Result<()> {
        self.delete_with(document, ConcurrencyControl::LastWriteWins)
    }

    /// Deletes a document, leaving a tombstone in the change history.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the document does not exist or is already
    /// deleted, and with `Conflict` under `FailOnConflict` when the stored
    /// revision has moved past the snapshot's revision.
    pub fn delete_with(&self, document: &Document, control: ConcurrencyControl) -> Result<()> {
        self.delete_by_id(document.id(), document.revision(), control)
    }

    pub(crate) fn delete_by_id(
        &self,
        id: &str,
        base: Revision,
        control: ConcurrencyControl,
    ) -> Result<()> {
        let store = self.store()?;
        let mut state = store.state.write();

        let stored = state
            .docs
            .get(id)
            .filter(|d| d.body.is_some())
            .ok_or_else(|| Error::not_found(format!("document {id}")))?;

        if control == ConcurrencyControl::FailOnConflict && stored.revision != base {
            return Err(Error::conflict(id));
        }

        let revision = stored.revision.next();
        let sequence = state.next_sequence();

        self.inner.journal.append(&JournalRecord::Tombstone {
            collection: self.id.as_u32(),
            id: id.to_string(),
            sequence: sequence.as_u64(),
            revision: revision.as_u64(),
        })?;

        state.apply_put(id, sequence, revision, None, None);
        sweep_expired(&self.inner.journal, self.id, &mut state)?;
        drop(state);

        tracing::debug!(collection = %self.name, id, %sequence, "deleted document");
        self.publish(id.to_string(), sequence, true);
        Ok(())
    }

    /// Removes a document and its tombstone without leaving history.
    ///
    /// Purged documents never appear in `changes_since` again and are not
    /// replicated.
    pub fn purge(&self, document: &Document) -> Result<()> {
        self.purge_by_id(document.id())
    }

    /// Purges a document by id.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if no document or tombstone exists for the id.
    pub fn purge_by_id(&self, id: &str) -> Result<()> {
        let store = self.store()?;
        let mut state = store.state.write();

        if !state.docs.contains_key(id) {
            return Err(Error::not_found(format!("document {id}")));
        }

        self.inner.journal.append(&JournalRecord::Purge {
            collection: self.id.as_u32(),
            id: id.to_string(),
        })?;

        state.apply_purge(id);
        drop(state);

        tracing::debug!(collection = %self.name, id, "purged document");
        Ok(())
    }

    /// Reads a document's expiration timestamp.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the document does not exist.
    pub fn expiration(&self, id: &str) -> Result<Option<Timestamp>> {
        let store = self.store()?;
        let state = store.state.read();
        state
            .docs
            .get(id)
            .filter(|d| d.body.is_some())
            .map(|d| d.expiration)
            .ok_or_else(|| Error::not_found(format!("document {id}")))
    }

    /// Sets or clears a document's expiration.
    ///
    /// Expiration changes do not assign a new sequence number; once the
    /// timestamp passes, the document stops appearing in reads and queries.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the document does not exist.
    pub fn set_expiration(&self, id: &str, expiration: Option<Timestamp>) -> Result<()> {
        let store = self.store()?;
        let mut state = store.state.write();

        if !state.docs.get(id).is_some_and(|d| d.body.is_some()) {
            return Err(Error::not_found(format!("document {id}")));
        }

        self.inner.journal.append(&JournalRecord::SetExpiration {
            collection: self.id.as_u32(),
            id: id.to_string(),
            expiration: expiration.map(Timestamp::as_millis),
        })?;

        state.apply_set_expiration(id, expiration);
        Ok(())
    }

    /// Physically purges every document whose expiration has passed,
    /// returning how many were removed.
    ///
    /// Expired documents are already invisible to reads; this reclaims
    /// their storage. A sweep also runs opportunistically on writes and on
    /// the database's purge-interval timer.
    pub fn purge_expired(&self) -> Result<u64> {
        let store = self.store()?;
        let mut state = store.state.write();
        sweep_expired(&self.inner.journal, self.id, &mut state)
    }

    /// Changes committed after `since`, in sequence order, capped at
    /// `limit` entries when given.
    ///
    /// Includes tombstones, so consumers can propagate deletions; purged
    /// documents are absent entirely.
    pub fn changes_since(
        &self,
        since: SequenceNumber,
        limit: Option<usize>,
    ) -> Result<Vec<ChangeEntry>> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(state
            .by_seq
            .range((Bound::Excluded(since), Bound::Unbounded))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(&sequence, id)| ChangeEntry {
                document_id: id.clone(),
                sequence,
                deleted: state.docs.get(id).is_none_or(|d| d.body.is_none()),
            })
            .collect())
    }

    /// Snapshot of all live, unexpired documents, ordered by id.
    pub fn all_documents(&self) -> Result<Vec<Document>> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(state
            .docs
            .iter()
            .filter(|(_, d)| d.is_live())
            .map(|(id, stored)| {
                Document::new(
                    id.clone(),
                    stored.sequence,
                    stored.revision,
                    stored.body.clone().unwrap_or_default(),
                    stored.expiration,
                    false,
                )
            })
            .collect())
    }

    /// Reads a document's full stored state, including tombstones and
    /// expired revisions.
    ///
    /// Returns `None` only when the document was never written or has been
    /// purged.
    pub fn document_revision(&self, id: &str) -> Result<Option<DocumentRevision>> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(state.docs.get(id).map(|stored| DocumentRevision {
            id: id.to_string(),
            sequence: stored.sequence,
            revision: stored.revision,
            body: stored.body.clone(),
            expiration: stored.expiration,
        }))
    }

    /// Installs a revision directly, bypassing optimistic concurrency.
    ///
    /// The write gets a fresh local sequence and the next local revision.
    /// A `None` body writes a tombstone, even for a document this database
    /// has never seen; replication uses this to propagate remote deletes.
    pub fn apply_revision(
        &self,
        id: &str,
        body: Option<Object>,
        expiration: Option<Timestamp>,
    ) -> Result<SequenceNumber> {
        let store = self.store()?;
        let mut state = store.state.write();

        let revision = state
            .docs
            .get(id)
            .map_or(Revision::new(1), |d| d.revision.next());
        let sequence = state.next_sequence();
        let deleted = body.is_none();

        match &body {
            Some(properties) => self.inner.journal.append(&JournalRecord::Put {
                collection: self.id.as_u32(),
                id: id.to_string(),
                sequence: sequence.as_u64(),
                revision: revision.as_u64(),
                properties: Value::Object(properties.clone()),
                expiration: expiration.map(Timestamp::as_millis),
            })?,
            None => self.inner.journal.append(&JournalRecord::Tombstone {
                collection: self.id.as_u32(),
                id: id.to_string(),
                sequence: sequence.as_u64(),
                revision: revision.as_u64(),
            })?,
        }

        state.apply_put(id, sequence, revision, body, expiration);
        drop(state);

        tracing::debug!(collection = %self.name, id, %sequence, "applied revision");
        self.publish(id.to_string(), sequence, deleted);
        Ok(sequence)
    }

    /// Creates or replaces a named index.
    ///
    /// Creating an index with the same name and an identical definition is
    /// a no-op; a different definition replaces the old index and rebuilds
    /// its entries.
    pub fn create_index(&self, name: &str, spec: IndexSpec) -> Result<()> {
        let store = self.store()?;
        let mut state = store.state.write();

        if state.indexes.get(name).is_some_and(|(s, _)| *s == spec) {
            return Ok(());
        }

        self.inner.journal.append(&JournalRecord::CreateIndex {
            collection: self.id.as_u32(),
            name: name.to_string(),
            spec: spec.clone(),
        })?;

        state.apply_create_index(name, spec);
        tracing::debug!(collection = %self.name, index = name, "created index");
        Ok(())
    }

    /// Deletes a named index.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if no index has that name.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        let store = self.store()?;
        let mut state = store.state.write();

        if !state.indexes.contains_key(name) {
            return Err(Error::not_found(format!("index {name}")));
        }

        self.inner.journal.append(&JournalRecord::DeleteIndex {
            collection: self.id.as_u32(),
            name: name.to_string(),
        })?;

        state.indexes.remove(name);
        Ok(())
    }

    /// Names of all indexes, sorted.
    pub fn index_names(&self) -> Result<Vec<String>> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(state.indexes.keys().cloned().collect())
    }

    /// Definitions of all indexes as (name, spec) pairs, sorted by name.
    pub fn indexes(&self) -> Result<Vec<(String, IndexSpec)>> {
        let store = self.store()?;
        let state = store.state.read();
        Ok(state
            .indexes
            .iter()
            .map(|(name, (spec, _))| (name.clone(), spec.clone()))
            .collect())
    }

    /// Live documents whose indexed key equals `key`, via a value index.
    pub fn scan_index_eq(&self, index: &str, key: &[Value]) -> Result<Vec<Document>> {
        let store = self.store()?;
        let state = store.state.read();
        let (_, built) = state
            .indexes
            .get(index)
            .ok_or_else(|| Error::not_found(format!("index {index}")))?;
        let ids = built.scan_eq(key);
        Ok(Self::load_ids(&state, &ids))
    }

    /// Live documents whose first indexed key component is in range, in
    /// index key order.
    pub fn scan_index_range(
        &self,
        index: &str,
        lower: Bound<&Value>,
        upper: Bound<&Value>,
    ) -> Result<Vec<Document>> {
        let store = self.store()?;
        let state = store.state.read();
        let (_, built) = state
            .indexes
            .get(index)
            .ok_or_else(|| Error::not_found(format!("index {index}")))?;
        let ids = built.scan_range(lower, upper);
        Ok(Self::load_ids(&state, &ids))
    }

    /// Live documents matching all tokens of a full-text query.
    pub fn full_text_match(&self, index: &str, query: &str) -> Result<Vec<Document>> {
        let store = self.store()?;
        let state = store.state.read();
        let (_, built) = state
            .indexes
            .get(index)
            .ok_or_else(|| Error::not_found(format!("index {index}")))?;
        let ids = built.match_text(query);
        Ok(Self::load_ids(&state, &ids))
    }

    fn load_ids(state: &StoreState, ids: &[String]) -> Vec<Document> {
        ids.iter()
            .filter_map(|id| {
                let stored = state.docs.get(id).filter(|d| d.is_live())?;
                Some(Document::new(
                    id.clone(),
                    stored.sequence,
                    stored.revision,
                    stored.body.clone().unwrap_or_default(),
                    stored.expiration,
                    false,
                ))
            })
            .collect()
    }

    /// Registers a callback invoked after each commit in this collection.
    pub fn add_change_listener(
        &self,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Result<ListenerToken> {
        self.inner.check_open()?;
        let id = self.id;
        Ok(self.inner.notifier.add_listener(move |event| {
            if event.collection == id {
                callback(event);
            }
        }))
    }
}

/// Purges all documents in `state` whose expiration has passed, writing
/// purge records to the journal. Caller holds the store's write lock.
pub(crate) fn sweep_expired(
    journal: &crate::journal::Journal,
    collection: CollectionId,
    state: &mut StoreState,
) -> Result<u64> {
    let due = state.due_expired(Timestamp::now());
    if due.is_empty() {
        return Ok(0);
    }
    for id in &due {
        journal.append(&JournalRecord::Purge {
            collection: collection.as_u32(),
            id: id.clone(),
        })?;
        state.apply_purge(id);
    }
    tracing::debug!(%collection, purged = due.len(), "purged expired documents");
    Ok(due.len() as u64)
}

/// Overlays incoming top-level properties onto a stored body: incoming
/// keys win, stored-only keys survive.
fn overlay(mut stored: Object, incoming: &Object) -> Object {
    for (key, value) in incoming.iter() {
        stored.set(key.clone(), value.clone());
    }
    stored
}
