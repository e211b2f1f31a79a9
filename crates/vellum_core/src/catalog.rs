//! The collection catalog.
//!
//! Maps scope and collection names to [`CollectionId`]s and carries the
//! database-level metadata map (replication checkpoints live there). The
//! catalog is rebuilt from the journal on open; the default collection in
//! the default scope always exists.

use crate::types::CollectionId;
use crate::{DEFAULT_COLLECTION, DEFAULT_SCOPE};
use std::collections::BTreeMap;

/// A fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QualifiedName {
    pub(crate) scope: String,
    pub(crate) name: String,
}

impl QualifiedName {
    pub(crate) fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

/// In-memory name registry for scopes, collections, and database metadata.
#[derive(Debug)]
pub(crate) struct Catalog {
    collections: BTreeMap<QualifiedName, CollectionId>,
    next_id: u32,
    meta: BTreeMap<String, String>,
}

impl Catalog {
    /// Creates a catalog containing only the default collection.
    pub(crate) fn new() -> Self {
        let mut collections = BTreeMap::new();
        collections.insert(
            QualifiedName::new(DEFAULT_SCOPE, DEFAULT_COLLECTION),
            CollectionId::new(0),
        );
        Self {
            collections,
            next_id: 1,
            meta: BTreeMap::new(),
        }
    }

    /// Looks up a collection by scope and name.
    pub(crate) fn get(&self, scope: &str, name: &str) -> Option<CollectionId> {
        self.collections
            .get(&QualifiedName::new(scope, name))
            .copied()
    }

    /// True if the id is still mapped to a live collection.
    pub(crate) fn contains_id(&self, id: CollectionId) -> bool {
        self.collections.values().any(|&v| v == id)
    }

    /// Registers a new collection and returns its id.
    pub(crate) fn insert(&mut self, scope: &str, name: &str) -> CollectionId {
        let id = CollectionId::new(self.next_id);
        self.next_id += 1;
        self.collections.insert(QualifiedName::new(scope, name), id);
        id
    }

    /// Registers a collection under a known id, during journal replay.
    pub(crate) fn insert_with_id(&mut self, scope: &str, name: &str, id: CollectionId) {
        self.collections.insert(QualifiedName::new(scope, name), id);
        self.next_id = self.next_id.max(id.as_u32() + 1);
    }

    /// Removes a collection mapping by id.
    pub(crate) fn remove_id(&mut self, id: CollectionId) -> Option<QualifiedName> {
        let key = self
            .collections
            .iter()
            .find(|(_, &v)| v == id)
            .map(|(k, _)| k.clone())?;
        self.collections.remove(&key);
        Some(key)
    }

    /// Sorted list of scope names that contain at least one collection.
    pub(crate) fn scope_names(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self
            .collections
            .keys()
            .map(|q| q.scope.clone())
            .collect();
        scopes.dedup();
        scopes
    }

    /// Sorted list of collection names within a scope.
    pub(crate) fn collection_names(&self, scope: &str) -> Vec<String> {
        self.collections
            .keys()
            .filter(|q| q.scope == scope)
            .map(|q| q.name.clone())
            .collect()
    }

    /// Iterates all collections as (qualified name, id) pairs.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&QualifiedName, CollectionId)> {
        self.collections.iter().map(|(q, &id)| (q, id))
    }

    pub(crate) fn meta_get(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub(crate) fn meta_set(&mut self, key: String, value: String) {
        self.meta.insert(key, value);
    }

    pub(crate) fn meta_remove(&mut self, key: &str) -> Option<String> {
        self.meta.remove(key)
    }

    pub(crate) fn meta_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.meta.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
