//! Query text normalisation shared by the classifier and the cache.

use sha2::{Digest, Sha256};

/// Lowercase, replace punctuation with spaces and collapse whitespace
///
/// Apostrophes are kept so contractions stay single words.
#[must_use]
pub fn normalize(query: &str) -> String {
    let mapped: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    mapped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word (or whole-phrase) match of `term` inside normalised text
#[must_use]
pub fn contains_term(normalized: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let haystack = format!(" {normalized} ");
    haystack.contains(&format!(" {term} "))
}

/// Stable cache key: sha256 hex digest of the normalised query
#[must_use]
pub fn cache_key(query: &str) -> String {
    hex::encode(Sha256::digest(normalize(query).as_bytes()))
}

/// First `len` characters of the normalised query
#[must_use]
pub fn prefix(query: &str, len: usize) -> String {
    normalize(query).chars().take(len).collect()
}
