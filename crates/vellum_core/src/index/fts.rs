//! Full-text tokenization and the inverted index.

use std::collections::{BTreeSet, HashMap};

/// English stop words skipped during indexing and querying.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Splits text into lowercase alphanumeric tokens.
///
/// Tokens are separated by any non-alphanumeric character. With
/// `apply_stop_words`, common English words are dropped; with
/// `ignore_accents`, accented Latin letters fold to their ASCII base.
pub(crate) fn tokenize(text: &str, apply_stop_words: bool, ignore_accents: bool) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        let ch = if ignore_accents { fold_accent(ch) } else { ch };
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    if apply_stop_words {
        tokens.retain(|t| !STOP_WORDS.contains(&t.as_str()));
    }
    tokens
}

/// Maps an accented Latin character to its unaccented base, where known.
fn fold_accent(ch: char) -> char {
    match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        other => other,
    }
}

/// Inverted index from token to the documents containing it.
#[derive(Debug, Default)]
pub(crate) struct FtsIndex {
    postings: HashMap<String, BTreeSet<String>>,
    by_doc: HashMap<String, Vec<String>>,
}

impl FtsIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, doc_id: &str, tokens: Vec<String>) {
        self.remove(doc_id);
        for token in &tokens {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(doc_id.to_string());
        }
        self.by_doc.insert(doc_id.to_string(), tokens);
    }

    pub(crate) fn remove(&mut self, doc_id: &str) {
        if let Some(tokens) = self.by_doc.remove(doc_id) {
            for token in tokens {
                if let Some(docs) = self.postings.get_mut(&token) {
                    docs.remove(doc_id);
                    if docs.is_empty() {
                        self.postings.remove(&token);
                    }
                }
            }
        }
    }

    /// Documents containing every query token, sorted by id.
    ///
    /// An empty token list matches nothing.
    pub(crate) fn matching(&self, tokens: &[String]) -> Vec<String> {
        let mut iter = tokens.iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let Some(mut docs) = self.postings.get(first).cloned() else {
            return Vec::new();
        };
        for token in iter {
            match self.postings.get(token) {
                Some(next) => docs.retain(|d| next.contains(d)),
                None => return Vec::new(),
            }
            if docs.is_empty() {
                return Vec::new();
            }
        }
        docs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Hello, World! 42", false, false),
            vec!["hello", "world", "42"]
        );
    }

    #[test]
    fn stop_words_are_dropped() {
        assert_eq!(
            tokenize("the quick and the dead", true, false),
            vec!["quick", "dead"]
        );
    }

    #[test]
    fn accents_fold_when_enabled() {
        assert_eq!(tokenize("café", false, true), vec!["cafe"]);
        assert_eq!(tokenize("café", false, false), vec!["café"]);
    }

    #[test]
    fn matching_requires_all_tokens() {
        let mut index = FtsIndex::new();
        index.insert("d1", tokenize("rust systems programming", true, false));
        index.insert("d2", tokenize("systems design", true, false));

        let hits = index.matching(&tokenize("systems", true, false));
        assert_eq!(hits, vec!["d1".to_string(), "d2".to_string()]);

        let hits = index.matching(&tokenize("rust systems", true, false));
        assert_eq!(hits, vec!["d1".to_string()]);
    }

    #[test]
    fn reinsert_replaces_tokens() {
        let mut index = FtsIndex::new();
        index.insert("d1", tokenize("old words", true, false));
        index.insert("d1", tokenize("new words", true, false));

        assert!(index.matching(&["old".to_string()]).is_empty());
        assert_eq!(index.matching(&["new".to_string()]), vec!["d1".to_string()]);
    }
}
