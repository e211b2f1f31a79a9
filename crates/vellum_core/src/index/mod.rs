//! Secondary indexes.
//!
//! Two kinds are supported: value indexes over one or more property path
//! expressions (composite keys, ordered by the total value ordering) and
//! full-text indexes over tokenized string properties. Index definitions
//! are journalled; the entries themselves are rebuilt from documents on
//! open.

mod fts;
mod value_index;

pub(crate) use fts::{tokenize, FtsIndex};
pub(crate) use value_index::{IndexKey, ValueIndex};

use crate::value::{Object, Value};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexSpec {
    /// Orders documents by one or more property paths.
    Value {
        /// Property paths forming the composite key, in order.
        expressions: Vec<String>,
    },
    /// Tokenizes string properties for `MATCH` queries.
    FullText {
        /// Property paths whose string values are indexed.
        expressions: Vec<String>,
        /// Stemming language hint; only `"en"` stop words are applied.
        language: Option<String>,
        /// Fold accented characters to their ASCII base before indexing.
        ignore_accents: bool,
    },
}

impl IndexSpec {
    /// Creates a value index definition.
    pub fn value<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Value {
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a full-text index definition with default options.
    pub fn full_text<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FullText {
            expressions: expressions.into_iter().map(Into::into).collect(),
            language: Some("en".into()),
            ignore_accents: false,
        }
    }

    /// The property paths this index covers.
    #[must_use]
    pub fn expressions(&self) -> &[String] {
        match self {
            Self::Value { expressions } | Self::FullText { expressions, .. } => expressions,
        }
    }

    /// True for a full-text index.
    #[must_use]
    pub fn is_full_text(&self) -> bool {
        matches!(self, Self::FullText { .. })
    }
}

/// A maintained index: definition plus built entries.
#[derive(Debug)]
pub(crate) enum BuiltIndex {
    Value {
        expressions: Vec<String>,
        index: ValueIndex,
    },
    FullText {
        expressions: Vec<String>,
        apply_stop_words: bool,
        ignore_accents: bool,
        index: FtsIndex,
    },
}

impl BuiltIndex {
    pub(crate) fn new(spec: &IndexSpec) -> Self {
        match spec {
            IndexSpec::Value { expressions } => Self::Value {
                expressions: expressions.clone(),
                index: ValueIndex::new(),
            },
            IndexSpec::FullText {
                expressions,
                language,
                ignore_accents,
            } => Self::FullText {
                expressions: expressions.clone(),
                apply_stop_words: language.as_deref() == Some("en"),
                ignore_accents: *ignore_accents,
                index: FtsIndex::new(),
            },
        }
    }

    /// Adds or refreshes the entry for a document.
    pub(crate) fn update(&mut self, doc_id: &str, properties: &Object) {
        self.remove(doc_id);
        match self {
            Self::Value { expressions, index } => {
                let key = IndexKey::new(
                    expressions
                        .iter()
                        .map(|expr| {
                            properties.resolve_path(expr).cloned().unwrap_or(Value::Null)
                        })
                        .collect(),
                );
                index.insert(doc_id, key);
            }
            Self::FullText {
                expressions,
                apply_stop_words,
                ignore_accents,
                index,
            } => {
                let mut tokens = Vec::new();
                for expr in expressions.iter() {
                    if let Some(Value::String(text)) = properties.resolve_path(expr) {
                        tokens.extend(tokenize(text, *apply_stop_words, *ignore_accents));
                    }
                }
                index.insert(doc_id, tokens);
            }
        }
    }

    /// Removes a document's entry, if any.
    pub(crate) fn remove(&mut self, doc_id: &str) {
        match self {
            Self::Value { index, .. } => index.remove(doc_id),
            Self::FullText { index, .. } => index.remove(doc_id),
        }
    }

    /// Documents whose composite key equals `key` exactly.
    pub(crate) fn scan_eq(&self, key: &[Value]) -> Vec<String> {
        match self {
            Self::Value { index, .. } => index.scan_eq(key),
            Self::FullText { .. } => Vec::new(),
        }
    }

    /// Documents whose first key component falls in the range, in key order.
    pub(crate) fn scan_range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<String> {
        match self {
            Self::Value { index, .. } => index.scan_range(lower, upper),
            Self::FullText { .. } => Vec::new(),
        }
    }

    /// Documents matching every token of a full-text query.
    pub(crate) fn match_text(&self, query: &str) -> Vec<String> {
        match self {
            Self::FullText {
                apply_stop_words,
                ignore_accents,
                index,
                ..
            } => index.matching(&tokenize(query, *apply_stop_words, *ignore_accents)),
            Self::Value { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(json: &str) -> Object {
        match serde_json::from_str::<Value>(json).unwrap() {
            Value::Object(o) => o,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn spec_serializes_stably() {
        let spec = IndexSpec::value(["type", "age"]);
        let json = serde_json::to_string(&spec).unwrap();
        let back: IndexSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn value_index_update_replaces_old_key() {
        let mut index = BuiltIndex::new(&IndexSpec::value(["age"]));
        index.update("d1", &props(r#"{"age": 30}"#));
        index.update("d1", &props(r#"{"age": 31}"#));

        assert!(index.scan_eq(&[Value::from(30)]).is_empty());
        assert_eq!(index.scan_eq(&[Value::from(31)]), vec!["d1".to_string()]);
    }

    #[test]
    fn missing_property_indexes_as_null() {
        let mut index = BuiltIndex::new(&IndexSpec::value(["age"]));
        index.update("d1", &props(r#"{"name": "x"}"#));
        assert_eq!(index.scan_eq(&[Value::Null]), vec!["d1".to_string()]);
    }

    #[test]
    fn composite_keys_match_all_components() {
        let mut index = BuiltIndex::new(&IndexSpec::value(["type", "age"]));
        index.update("d1", &props(r#"{"type": "user", "age": 30}"#));
        index.update("d2", &props(r#"{"type": "user", "age": 31}"#));

        assert_eq!(
            index.scan_eq(&[Value::from("user"), Value::from(30)]),
            vec!["d1".to_string()]
        );
    }

    #[test]
    fn full_text_matches_all_query_tokens() {
        let mut index = BuiltIndex::new(&IndexSpec::full_text(["bio"]));
        index.update("d1", &props(r#"{"bio": "Rust systems programming"}"#));
        index.update("d2", &props(r#"{"bio": "Python scripting"}"#));

        assert_eq!(index.match_text("rust SYSTEMS"), vec!["d1".to_string()]);
        assert!(index.match_text("rust scripting").is_empty());
    }
}
