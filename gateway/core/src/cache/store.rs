//! Remote cache capabilities
//!
//! The semantic cache talks to two optional collaborators: an [`Embedder`]
//! turning text into vectors and a [`VectorStore`] keeping responses by key
//! and by vector. Both have null implementations standing in for "backend
//! unavailable"; the cache then runs on its local map alone.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::OllamaBackend;
use crate::error::BackendError;

/// Metadata stored next to every remote cache payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Original query text
    pub query: String,
    /// Write time, unix milliseconds
    pub written_at_ms: i64,
    /// Time to live in milliseconds
    pub ttl_ms: u64,
}

impl EntryMetadata {
    /// Metadata for an entry written now
    #[must_use]
    pub fn now(query: impl Into<String>, ttl: Duration) -> Self {
        Self {
            query: query.into(),
            written_at_ms: chrono::Utc::now().timestamp_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether the entry is still valid at `now_ms`
    #[must_use]
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        u64::try_from(now_ms.saturating_sub(self.written_at_ms)).is_ok_and(|age| age < self.ttl_ms)
    }
}

/// Exact lookup result
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEntry {
    /// Cached response
    pub payload: String,
    /// Entry metadata
    pub metadata: EntryMetadata,
}

/// Nearest-neighbour result
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    /// Key the entry was written under
    pub key: String,
    /// Cosine distance to the query vector (0 = identical)
    pub distance: f32,
    /// Cached response
    pub payload: String,
    /// Entry metadata
    pub metadata: EntryMetadata,
}

/// Turns text into an embedding vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether embeddings can be produced at all
    fn is_available(&self) -> bool {
        true
    }

    /// Embed `text`
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

/// Remote response store with exact and similarity lookup
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether the store is reachable at all
    fn is_available(&self) -> bool {
        true
    }

    /// Exact lookup by key
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, BackendError>;

    /// Up to `k` nearest entries, closest first
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, BackendError>;

    /// Insert or replace the entry under `key`
    async fn upsert(
        &self,
        key: &str,
        vector: Option<Vec<f32>>,
        payload: &str,
        metadata: EntryMetadata,
    ) -> Result<(), BackendError>;
}

/// Embedder that is never available
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Err(BackendError::Connection("no embedder configured".into()))
    }
}

/// Vector store that is never available
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVectorStore;

#[async_trait]
impl VectorStore for NullVectorStore {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Result<Option<StoredEntry>, BackendError> {
        Ok(None)
    }

    async fn search(&self, _vector: &[f32], _k: usize) -> Result<Vec<SearchHit>, BackendError> {
        Ok(Vec::new())
    }

    async fn upsert(
        &self,
        _key: &str,
        _vector: Option<Vec<f32>>,
        _payload: &str,
        _metadata: EntryMetadata,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    vector: Option<Vec<f32>>,
    payload: String,
    metadata: EntryMetadata,
}

/// Default cap on entries held by [`InMemoryVectorStore`]
pub const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// In-process vector store, brute-force cosine search
///
/// Holds at most `capacity` entries. A write that would exceed it first drops
/// expired entries, then the oldest written ones.
#[derive(Debug)]
pub struct InMemoryVectorStore {
    capacity: usize,
    entries: DashMap<String, MemoryEntry>,
    order: Mutex<VecDeque<String>>,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STORE_CAPACITY)
    }
}

impl InMemoryVectorStore {
    /// Empty store with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store holding at most `capacity` entries (at least one)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cosine distance, `1 - cos(a, b)`; mismatched or zero vectors are maximally far
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, BackendError> {
        Ok(self.entries.get(key).map(|e| StoredEntry {
            payload: e.payload.clone(),
            metadata: e.metadata.clone(),
        }))
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, BackendError> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let stored = entry.vector.as_ref()?;
                Some(SearchHit {
                    key: entry.key().clone(),
                    distance: cosine_distance(vector, stored),
                    payload: entry.payload.clone(),
                    metadata: entry.metadata.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn upsert(
        &self,
        key: &str,
        vector: Option<Vec<f32>>,
        payload: &str,
        metadata: EntryMetadata,
    ) -> Result<(), BackendError> {
        let entry = MemoryEntry {
            vector,
            payload: payload.to_string(),
            metadata,
        };

        // The order lock serialises writers so the cap holds under concurrency
        let mut order = self.order.lock();
        if self.entries.insert(key.to_string(), entry).is_some() {
            order.retain(|k| k != key);
        }
        order.push_back(key.to_string());

        if order.len() > self.capacity {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let entries = &self.entries;
            order.retain(|k| {
                let fresh = entries.get(k).is_some_and(|e| e.metadata.is_fresh(now_ms));
                if !fresh {
                    entries.remove(k);
                }
                fresh
            });
        }
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        Ok(())
    }
}

/// Embeddings from an Ollama pool
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    backend: OllamaBackend,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    /// Embed with `model` on `backend`
    pub fn new(backend: OllamaBackend, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.backend.embed(&self.model, text, self.timeout).await
    }
}
