//! Ordered value index entries.

use crate::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Composite index key, ordered component-wise by the total value ordering.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexKey(Vec<Value>);

impl IndexKey {
    pub(crate) fn new(components: Vec<Value>) -> Self {
        Self(components)
    }

    fn components(&self) -> &[Value] {
        &self.0
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.cmp_total(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// BTree of composite keys to the documents holding them.
#[derive(Debug, Default)]
pub(crate) struct ValueIndex {
    entries: BTreeMap<IndexKey, BTreeSet<String>>,
    by_doc: HashMap<String, IndexKey>,
}

impl ValueIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, doc_id: &str, key: IndexKey) {
        self.remove(doc_id);
        self.entries
            .entry(key.clone())
            .or_default()
            .insert(doc_id.to_string());
        self.by_doc.insert(doc_id.to_string(), key);
    }

    pub(crate) fn remove(&mut self, doc_id: &str) {
        if let Some(key) = self.by_doc.remove(doc_id) {
            if let Some(docs) = self.entries.get_mut(&key) {
                docs.remove(doc_id);
                if docs.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Documents whose key equals `key` exactly, sorted by id.
    pub(crate) fn scan_eq(&self, key: &[Value]) -> Vec<String> {
        self.entries
            .get(&IndexKey::new(key.to_vec()))
            .map(|docs| docs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Documents whose first key component falls within the bounds,
    /// in ascending key order.
    pub(crate) fn scan_range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<String> {
        let mut out = Vec::new();
        for (key, docs) in &self.entries {
            let Some(first) = key.components().first() else {
                continue;
            };
            let above_lower = match lower {
                Bound::Unbounded => true,
                Bound::Included(v) => first.cmp_total(v) != Ordering::Less,
                Bound::Excluded(v) => first.cmp_total(v) == Ordering::Greater,
            };
            let below_upper = match upper {
                Bound::Unbounded => true,
                Bound::Included(v) => first.cmp_total(v) != Ordering::Greater,
                Bound::Excluded(v) => first.cmp_total(v) == Ordering::Less,
            };
            if above_lower && below_upper {
                out.extend(docs.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: impl Into<Value>) -> IndexKey {
        IndexKey::new(vec![v.into()])
    }

    #[test]
    fn range_scan_returns_key_order() {
        let mut index = ValueIndex::new();
        index.insert("d3", key(30));
        index.insert("d1", key(10));
        index.insert("d2", key(20));

        let hits = index.scan_range(Bound::Included(&Value::from(10)), Bound::Excluded(&Value::from(30)));
        assert_eq!(hits, vec!["d1".to_string(), "d2".to_string()]);
    }

    #[test]
    fn duplicate_keys_collect_all_documents() {
        let mut index = ValueIndex::new();
        index.insert("b", key("x"));
        index.insert("a", key("x"));

        assert_eq!(index.scan_eq(&[Value::from("x")]), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn remove_clears_empty_key() {
        let mut index = ValueIndex::new();
        index.insert("d1", key(1));
        index.remove("d1");
        assert!(index.scan_eq(&[Value::from(1)]).is_empty());
        assert!(index.entries.is_empty());
    }

    #[test]
    fn mixed_types_order_by_rank() {
        let mut index = ValueIndex::new();
        index.insert("s", key("abc"));
        index.insert("n", key(5));
        index.insert("z", key(()));

        let all = index.scan_range(Bound::Unbounded, Bound::Unbounded);
        assert_eq!(all, vec!["z".to_string(), "n".to_string(), "s".to_string()]);
    }
}
