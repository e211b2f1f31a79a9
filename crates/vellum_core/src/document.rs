//! Documents and mutable documents.
//!
//! A [`Document`] is an immutable snapshot of a stored revision. Mutation
//! goes through [`MutableDocument`], obtained either fresh or as a copy of
//! a loaded document; the copy remembers the revision it was derived from,
//! which is what save-time conflict detection compares against.

use crate::error::{Error, Result};
use crate::types::{Revision, SequenceNumber, Timestamp};
use crate::value::{Object, Value};

/// An immutable document snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    sequence: SequenceNumber,
    revision: Revision,
    properties: Object,
    expiration: Option<Timestamp>,
    deleted: bool,
}

impl Document {
    pub(crate) fn new(
        id: String,
        sequence: SequenceNumber,
        revision: Revision,
        properties: Object,
        expiration: Option<Timestamp>,
        deleted: bool,
    ) -> Self {
        Self {
            id,
            sequence,
            revision,
            properties,
            expiration,
            deleted,
        }
    }

    /// The document's key, unique within its collection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sequence number assigned at the last committed save.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Revision generation of this snapshot.
    #[must_use]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// The property set.
    #[must_use]
    pub fn properties(&self) -> &Object {
        &self.properties
    }

    /// Looks up a top-level property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Expiration timestamp, if one is set.
    #[must_use]
    pub fn expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    /// True if this snapshot is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Serializes the property set to a JSON string.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the properties cannot be encoded.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&Value::Object(self.properties.clone()))
            .map_err(|e| Error::invalid_argument(format!("cannot encode properties: {e}")))
    }

    /// Creates a mutable copy safe for independent modification.
    ///
    /// The copy carries this snapshot's revision as its base, so a later
    /// `FailOnConflict` save detects intervening writes.
    #[must_use]
    pub fn to_mutable(&self) -> MutableDocument {
        MutableDocument {
            id: self.id.clone(),
            base_revision: self.revision,
            properties: self.properties.clone(),
        }
    }
}

/// A document open for modification.
///
/// Not written to the database until saved through a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct MutableDocument {
    id: String,
    base_revision: Revision,
    properties: Object,
}

impl MutableDocument {
    /// Creates a new empty mutable document with the given key.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_revision: Revision::NONE,
            properties: Object::new(),
        }
    }

    /// Creates a new mutable document with a generated key.
    ///
    /// Keys are time-ordered (`doc-<epoch-nanos>`) so freshly created
    /// documents sort roughly by creation time.
    #[must_use]
    pub fn new_auto() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self::new(format!("doc-{nanos:x}"))
    }

    /// The document's key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The revision this document was derived from; `Revision::NONE` for a
    /// document never loaded from the store.
    #[must_use]
    pub fn base_revision(&self) -> Revision {
        self.base_revision
    }

    pub(crate) fn set_base_revision(&mut self, revision: Revision) {
        self.base_revision = revision;
    }

    /// The property set.
    #[must_use]
    pub fn properties(&self) -> &Object {
        &self.properties
    }

    /// Mutable access to the property set.
    pub fn properties_mut(&mut self) -> &mut Object {
        &mut self.properties
    }

    /// Replaces the whole property set.
    pub fn set_properties(&mut self, properties: Object) {
        self.properties = properties;
    }

    /// Sets a top-level property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.properties.set(key, value);
        self
    }

    /// Removes a top-level property.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    /// Looks up a top-level property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Replaces the property set from a JSON object string.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the string is not a JSON object.
    pub fn set_json(&mut self, json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::invalid_argument(format!("invalid JSON: {e}")))?;
        match value {
            Value::Object(object) => {
                self.properties = object;
                Ok(())
            }
            _ => Err(Error::invalid_argument("JSON root must be an object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_document_has_empty_properties() {
        let doc = MutableDocument::new("d1");
        assert_eq!(doc.id(), "d1");
        assert!(doc.properties().is_empty());
        assert_eq!(doc.base_revision(), Revision::NONE);
    }

    #[test]
    fn auto_ids_are_unique() {
        let a = MutableDocument::new_auto();
        let b = MutableDocument::new_auto();
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("doc-"));
    }

    #[test]
    fn mutable_copy_is_independent() {
        let stored = Document::new(
            "d1".into(),
            SequenceNumber::new(4),
            Revision::new(2),
            {
                let mut o = Object::new();
                o.set("name", "original");
                o
            },
            None,
            false,
        );

        let mut copy = stored.to_mutable();
        copy.set("name", "changed");

        assert_eq!(stored.get("name"), Some(&Value::from("original")));
        assert_eq!(copy.get("name"), Some(&Value::from("changed")));
        assert_eq!(copy.base_revision(), Revision::new(2));
    }

    #[test]
    fn set_json_replaces_properties() {
        let mut doc = MutableDocument::new("d1");
        doc.set("old", 1);
        doc.set_json(r#"{"type":"sensor","temperature":21.5}"#).unwrap();
        assert_eq!(doc.get("old"), None);
        assert_eq!(doc.get("temperature"), Some(&Value::from(21.5)));
    }

    #[test]
    fn set_json_rejects_non_object_root() {
        let mut doc = MutableDocument::new("d1");
        assert!(matches!(
            doc.set_json("[1,2,3]"),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
