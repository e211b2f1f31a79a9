//! The database: open, replay, collection lifecycle, metadata, compaction.

use crate::catalog::Catalog;
use crate::change_feed::{ChangeFeed, Notifier};
use crate::collection::{Collection, CollectionStore};
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{Error, Result};
use crate::journal::{Journal, JournalRecord};
use crate::types::{CollectionId, Revision, SequenceNumber, Timestamp};
use crate::value::Value;
use crate::{DEFAULT_COLLECTION, DEFAULT_SCOPE};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vellum_storage::{FileBackend, MemoryBackend, StorageBackend};

struct Sweeper {
    stop: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Shared state behind every [`Database`] and [`Collection`] handle.
pub(crate) struct DatabaseInner {
    name: String,
    path: Option<PathBuf>,
    _dir: Option<DatabaseDir>,
    pub(crate) journal: Journal,
    pub(crate) catalog: RwLock<Catalog>,
    pub(crate) stores: RwLock<HashMap<CollectionId, Arc<CollectionStore>>>,
    pub(crate) notifier: Notifier,
    pub(crate) feed: ChangeFeed,
    closed: AtomicBool,
    sweeper: parking_lot::Mutex<Option<Sweeper>>,
}

impl DatabaseInner {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DatabaseInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseInner")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// An embedded document database.
///
/// Cloning a `Database` yields another handle to the same open store.
/// The store stays open until [`Database::close`] is called; dropping the
/// last handle releases the directory lock.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens (or creates) a database at the given directory path.
    ///
    /// # Errors
    ///
    /// Fails with `StoreUnavailable` if the directory is locked by another
    /// process, and with `Corrupt` if the journal cannot be replayed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database with explicit configuration.
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let name = path
            .file_name()
            .map_or_else(|| "db".to_string(), |n| n.to_string_lossy().into_owned());

        Self::bootstrap(
            name,
            Some(path.to_path_buf()),
            Some(dir),
            Box::new(backend),
            config,
        )
    }

    /// Opens a transient in-memory database, mostly useful in tests and as
    /// a replication target.
    pub fn open_in_memory(name: impl Into<String>) -> Result<Self> {
        Self::bootstrap(
            name.into(),
            None,
            None,
            Box::new(MemoryBackend::new()),
            Config::default(),
        )
    }

    fn bootstrap(
        name: String,
        path: Option<PathBuf>,
        dir: Option<DatabaseDir>,
        backend: Box<dyn StorageBackend>,
        config: Config,
    ) -> Result<Self> {
        let journal = Journal::new(backend, config.sync_on_commit);
        let records = journal.replay()?;
        let fresh = records.is_empty();

        let mut catalog = Catalog::new();
        let mut stores: HashMap<CollectionId, Arc<CollectionStore>> = HashMap::new();
        stores.insert(CollectionId::new(0), Arc::new(CollectionStore::new()));

        for record in records {
            apply_record(&mut catalog, &mut stores, record)?;
        }

        if fresh {
            journal.append(&JournalRecord::Format {
                version: config.format_version,
            })?;
        }

        tracing::info!(name, persistent = path.is_some(), "opened database");

        let inner = Arc::new(DatabaseInner {
            name,
            path,
            _dir: dir,
            journal,
            catalog: RwLock::new(catalog),
            stores: RwLock::new(stores),
            notifier: Notifier::new(),
            feed: ChangeFeed::new(),
            closed: AtomicBool::new(false),
            sweeper: parking_lot::Mutex::new(None),
        });

        if let Some(interval) = config.expiry_purge_interval {
            *inner.sweeper.lock() = spawn_sweeper(Arc::downgrade(&inner), interval);
        }

        Ok(Self { inner })
    }

    /// The database name (directory name for persistent databases).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The database directory, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// The change feed shared by all collections.
    #[must_use]
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.inner.feed
    }

    /// The default collection, which always exists.
    pub fn default_collection(&self) -> Result<Collection> {
        self.inner.check_open()?;
        Ok(Collection::new(
            Arc::clone(&self.inner),
            CollectionId::new(0),
            DEFAULT_SCOPE.to_string(),
            DEFAULT_COLLECTION.to_string(),
        ))
    }

    /// Looks up a collection by scope and name.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if no such collection exists.
    pub fn collection(&self, scope: &str, name: &str) -> Result<Collection> {
        self.inner.check_open()?;
        let id = self
            .inner
            .catalog
            .read()
            .get(scope, name)
            .ok_or_else(|| Error::not_found(format!("collection {scope}.{name}")))?;
        Ok(Collection::new(
            Arc::clone(&self.inner),
            id,
            scope.to_string(),
            name.to_string(),
        ))
    }

    /// Creates a collection, or returns the existing one with that name.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the scope or collection name is
    /// empty, contains disallowed characters, or uses a reserved `_` prefix
    /// other than the default names.
    pub fn create_collection(&self, scope: &str, name: &str) -> Result<Collection> {
        self.inner.check_open()?;
        validate_name(scope, "scope")?;
        validate_name(name, "collection")?;

        let mut catalog = self.inner.catalog.write();
        if let Some(id) = catalog.get(scope, name) {
            return Ok(Collection::new(
                Arc::clone(&self.inner),
                id,
                scope.to_string(),
                name.to_string(),
            ));
        }

        let id = catalog.insert(scope, name);
        self.inner.journal.append(&JournalRecord::CreateCollection {
            id: id.as_u32(),
            scope: scope.to_string(),
            name: name.to_string(),
        })?;
        self.inner
            .stores
            .write()
            .insert(id, Arc::new(CollectionStore::new()));

        tracing::debug!(scope, name, %id, "created collection");
        Ok(Collection::new(
            Arc::clone(&self.inner),
            id,
            scope.to_string(),
            name.to_string(),
        ))
    }

    /// Deletes a collection and all its documents.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if no such collection exists and with
    /// `InvalidArgument` for the default collection.
    pub fn delete_collection(&self, scope: &str, name: &str) -> Result<()> {
        self.inner.check_open()?;
        if scope == DEFAULT_SCOPE && name == DEFAULT_COLLECTION {
            return Err(Error::invalid_argument(
                "the default collection cannot be deleted",
            ));
        }

        let mut catalog = self.inner.catalog.write();
        let id = catalog
            .get(scope, name)
            .ok_or_else(|| Error::not_found(format!("collection {scope}.{name}")))?;

        self.inner
            .journal
            .append(&JournalRecord::DeleteCollection { id: id.as_u32() })?;
        catalog.remove_id(id);
        self.inner.stores.write().remove(&id);

        tracing::debug!(scope, name, %id, "deleted collection");
        Ok(())
    }

    /// Sorted names of all scopes containing at least one collection.
    pub fn scope_names(&self) -> Result<Vec<String>> {
        self.inner.check_open()?;
        Ok(self.inner.catalog.read().scope_names())
    }

    /// Sorted names of all collections in a scope.
    pub fn collection_names(&self, scope: &str) -> Result<Vec<String>> {
        self.inner.check_open()?;
        Ok(self.inner.catalog.read().collection_names(scope))
    }

    /// Reads a database metadata entry.
    ///
    /// Metadata is local to this database and never replicated; the
    /// replicator stores its checkpoints here.
    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        self.inner.check_open()?;
        Ok(self.inner.catalog.read().meta_get(key).map(str::to_string))
    }

    /// Writes a database metadata entry.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.inner.check_open()?;
        let mut catalog = self.inner.catalog.write();
        self.inner.journal.append(&JournalRecord::PutMeta {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        catalog.meta_set(key.to_string(), value.to_string());
        Ok(())
    }

    /// Removes a database metadata entry, if present.
    pub fn remove_metadata(&self, key: &str) -> Result<()> {
        self.inner.check_open()?;
        let mut catalog = self.inner.catalog.write();
        if catalog.meta_get(key).is_some() {
            self.inner.journal.append(&JournalRecord::DeleteMeta {
                key: key.to_string(),
            })?;
            catalog.meta_remove(key);
        }
        Ok(())
    }

    /// Rewrites the journal to contain only current state.
    ///
    /// Superseded document revisions, purged documents, and deleted
    /// collections are dropped; tombstones and expirations are kept.
    /// Blocks writers for the duration.
    pub fn compact(&self) -> Result<()> {
        self.inner.check_open()?;

        // Lock order: catalog, then every store in id order. Writers take
        // at most one of these, so this cannot deadlock against them.
        let catalog = self.inner.catalog.write();
        let stores = self.inner.stores.read();
        let mut ids: Vec<CollectionId> = stores.keys().copied().collect();
        ids.sort_unstable();
        let guards: Vec<_> = ids
            .iter()
            .filter_map(|id| stores.get(id).map(|s| (*id, s.state.write())))
            .collect();

        let mut records = vec![JournalRecord::Format { version: 1 }];
        for (key, value) in catalog.meta_iter() {
            records.push(JournalRecord::PutMeta {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        for (qualified, id) in catalog.iter() {
            if id != CollectionId::new(0) {
                records.push(JournalRecord::CreateCollection {
                    id: id.as_u32(),
                    scope: qualified.scope.clone(),
                    name: qualified.name.clone(),
                });
            }
        }
        for (id, state) in &guards {
            for (name, (spec, _)) in &state.indexes {
                records.push(JournalRecord::CreateIndex {
                    collection: id.as_u32(),
                    name: name.clone(),
                    spec: spec.clone(),
                });
            }
            for (doc_id, stored) in &state.docs {
                match &stored.body {
                    Some(body) => {
                        records.push(JournalRecord::Put {
                            collection: id.as_u32(),
                            id: doc_id.clone(),
                            sequence: stored.sequence.as_u64(),
                            revision: stored.revision.as_u64(),
                            properties: Value::Object(body.clone()),
                            expiration: stored.expiration.map(Timestamp::as_millis),
                        });
                    }
                    None => {
                        records.push(JournalRecord::Tombstone {
                            collection: id.as_u32(),
                            id: doc_id.clone(),
                            sequence: stored.sequence.as_u64(),
                            revision: stored.revision.as_u64(),
                        });
                    }
                }
            }
        }

        self.inner.journal.rewrite(&records)?;
        tracing::info!(records = records.len(), "compacted journal");
        Ok(())
    }

    /// Closes the database; all further operations on any handle fail with
    /// `StoreClosed`.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            let _ = sweeper.stop.send(());
            let _ = sweeper.handle.join();
        }
        tracing::info!(name = self.inner.name, "closed database");
        Ok(())
    }
}

fn spawn_sweeper(
    inner: std::sync::Weak<DatabaseInner>,
    interval: std::time::Duration,
) -> Option<Sweeper> {
    let (stop, rx) = std::sync::mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("vellum-expiry".into())
        .spawn(move || loop {
            match rx.recv_timeout(interval) {
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            let Some(inner) = inner.upgrade() else { return };
            if inner.check_open().is_err() {
                return;
            }
            let stores = inner.stores.read();
            for (&id, store) in stores.iter() {
                let mut state = store.state.write();
                if let Err(error) =
                    crate::collection::sweep_expired(&inner.journal, id, &mut state)
                {
                    tracing::warn!(%id, %error, "expiry sweep failed");
                }
            }
        })
        .ok()?;
    Some(Sweeper { stop, handle })
}

fn apply_record(
    catalog: &mut Catalog,
    stores: &mut HashMap<CollectionId, Arc<CollectionStore>>,
    record: JournalRecord,
) -> Result<()> {
    match record {
        JournalRecord::Format { version } => {
            if version > 1 {
                return Err(Error::corrupt(format!(
                    "unsupported database format version {version}"
                )));
            }
        }
        JournalRecord::CreateCollection { id, scope, name } => {
            let id = CollectionId::new(id);
            catalog.insert_with_id(&scope, &name, id);
            stores.insert(id, Arc::new(CollectionStore::new()));
        }
        JournalRecord::DeleteCollection { id } => {
            let id = CollectionId::new(id);
            catalog.remove_id(id);
            stores.remove(&id);
        }
        JournalRecord::Put {
            collection,
            id,
            sequence,
            revision,
            properties,
            expiration,
        } => {
            let body = match properties {
                Value::Object(object) => object,
                _ => return Err(Error::corrupt("document body is not an object")),
            };
            if let Some(mut state) = store_state(stores, collection) {
                state.apply_put(
                    &id,
                    SequenceNumber::new(sequence),
                    Revision::new(revision),
                    Some(body),
                    expiration.map(Timestamp::from_millis),
                );
            }
        }
        JournalRecord::Tombstone {
            collection,
            id,
            sequence,
            revision,
        } => {
            if let Some(mut state) = store_state(stores, collection) {
                state.apply_put(
                    &id,
                    SequenceNumber::new(sequence),
                    Revision::new(revision),
                    None,
                    None,
                );
            }
        }
        JournalRecord::Purge { collection, id } => {
            if let Some(mut state) = store_state(stores, collection) {
                state.apply_purge(&id);
            }
        }
        JournalRecord::SetExpiration {
            collection,
            id,
            expiration,
        } => {
            if let Some(mut state) = store_state(stores, collection) {
                state.apply_set_expiration(&id, expiration.map(Timestamp::from_millis));
            }
        }
        JournalRecord::CreateIndex {
            collection,
            name,
            spec,
        } => {
            if let Some(mut state) = store_state(stores, collection) {
                state.apply_create_index(&name, spec);
            }
        }
        JournalRecord::DeleteIndex { collection, name } => {
            if let Some(mut state) = store_state(stores, collection) {
                state.indexes.remove(&name);
            }
        }
        JournalRecord::PutMeta { key, value } => catalog.meta_set(key, value),
        JournalRecord::DeleteMeta { key } => {
            catalog.meta_remove(&key);
        }
    }
    Ok(())
}

/// Resolves a record's collection to its store. A write racing a
/// `delete_collection` can land in the journal after the delete record,
/// so an unknown collection is not corruption; the delete wins and the
/// record is skipped.
fn store_state(
    stores: &HashMap<CollectionId, Arc<CollectionStore>>,
    collection: u32,
) -> Option<parking_lot::RwLockWriteGuard<'_, crate::collection::StoreState>> {
    let store = stores.get(&CollectionId::new(collection));
    if store.is_none() {
        tracing::warn!(collection, "skipping journal record for deleted collection");
    }
    Some(store?.state.write())
}

fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument(format!("{what} name is empty")));
    }
    if name.starts_with('_') && name != DEFAULT_SCOPE {
        return Err(Error::invalid_argument(format!(
            "{what} names starting with '_' are reserved: {name}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '%'))
    {
        return Err(Error::invalid_argument(format!(
            "invalid {what} name: {name}"
        )));
    }
    Ok(())
}
