//! Semantic Response Cache
//!
//! Answers repeated (or near-identical) queries without a model call.
//!
//! # Lookup order
//!
//! ```text
//!   get(query)
//!     │
//!     ├─► VectorStore::get(hash)            exact, remote     ─┐
//!     ├─► Embedder::embed → search(k = 1)   similar, remote   ─┼─ "cache" breaker + timeout
//!     ├─► BoundedMap::get(hash)             exact, local       │  any failure = skip tier
//!     └─► miss                                                ─┘
//! ```
//!
//! Every tier checks freshness: an entry older than its TTL is never
//! returned, even while a backend still holds it. Writes always land in the
//! local map; the remote write is best effort.

pub mod bounded;
pub mod store;
pub mod ttl;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{BackendError, GatewayError};
use crate::resilience::{BreakerRegistry, CircuitBreaker};
use crate::text;

pub use bounded::BoundedMap;
pub use store::{
    EntryMetadata, Embedder, InMemoryVectorStore, NullEmbedder, NullVectorStore, OllamaEmbedder,
    SearchHit, StoredEntry, VectorStore, DEFAULT_STORE_CAPACITY,
};
pub use ttl::{TtlPolicy, TtlTier};

/// Breaker guarding every remote cache call
pub const CACHE_BREAKER: &str = "cache";

/// Cache settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; a disabled cache never hits and never stores
    pub enabled: bool,
    /// Minimum similarity (1 - cosine distance) for a nearest-neighbour hit
    pub similarity_threshold: f32,
    /// Size cap of the local map
    pub max_local_entries: usize,
    /// Size cap of the in-process vector store
    pub max_store_entries: usize,
    /// Timeout of each remote call
    pub backend_timeout: Duration,
    /// TTL per query tier
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.92,
            max_local_entries: 1000,
            max_store_entries: DEFAULT_STORE_CAPACITY,
            backend_timeout: Duration::from_secs(2),
            ttl: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Disabled cache
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the similarity threshold
    #[must_use]
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the local size cap
    #[must_use]
    pub fn with_max_local_entries(mut self, n: usize) -> Self {
        self.max_local_entries = n;
        self
    }

    /// Set the in-process vector store size cap
    #[must_use]
    pub fn with_max_store_entries(mut self, n: usize) -> Self {
        self.max_store_entries = n;
        self
    }

    /// Set the remote call timeout
    #[must_use]
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Set the TTL policy
    #[must_use]
    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Which tier answered a lookup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Remote store, exact key
    Exact,
    /// Remote store, nearest neighbour
    Similar,
    /// Local map
    Local,
}

/// A cache hit
#[derive(Clone, Debug, PartialEq)]
pub struct CacheHit {
    /// Cached response text
    pub response: String,
    /// Tier that answered
    pub source: CacheSource,
    /// 1.0 for exact hits
    pub similarity: f32,
}

/// Cache counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Remote exact hits
    pub exact_hits: u64,
    /// Remote similarity hits
    pub similar_hits: u64,
    /// Local map hits
    pub local_hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
    /// Accepted writes
    pub writes: u64,
    /// Failed, timed out or short-circuited remote calls
    pub backend_errors: u64,
    /// Entries in the local map
    pub local_entries: usize,
    /// Vector store name
    pub vector_store: String,
    /// Embedder name
    pub embedder: String,
}

#[derive(Debug, Default)]
struct Counters {
    exact_hits: AtomicU64,
    similar_hits: AtomicU64,
    local_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    backend_errors: AtomicU64,
}

#[derive(Clone, Debug)]
struct LocalEntry {
    response: String,
    written_at: Instant,
    ttl: Duration,
}

impl LocalEntry {
    fn is_fresh(&self) -> bool {
        self.written_at.elapsed() < self.ttl
    }
}

/// Multi-tier response cache
pub struct SemanticCache {
    config: CacheConfig,
    local: BoundedMap<String, LocalEntry>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    breaker: Arc<CircuitBreaker>,
    counters: Counters,
}

impl std::fmt::Debug for SemanticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("config", &self.config)
            .field("store", &self.store.name())
            .field("embedder", &self.embedder.name())
            .field("local_entries", &self.local.len())
            .finish_non_exhaustive()
    }
}

impl SemanticCache {
    /// Cache backed by `store`, with similarity lookups through `embedder`
    pub fn new(
        config: CacheConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        breakers: &BreakerRegistry,
    ) -> Self {
        tracing::debug!(
            store = store.name(),
            embedder = embedder.name(),
            enabled = config.enabled,
            "Semantic cache created"
        );
        Self {
            local: BoundedMap::new(config.max_local_entries),
            config,
            embedder,
            store,
            breaker: breakers.get_or_create(CACHE_BREAKER),
            counters: Counters::default(),
        }
    }

    /// Cache with no remote backend
    pub fn local_only(config: CacheConfig, breakers: &BreakerRegistry) -> Self {
        Self::new(
            config,
            Arc::new(NullEmbedder),
            Arc::new(NullVectorStore),
            breakers,
        )
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look `query` up; failures of any tier are misses for that tier
    pub async fn get(&self, query: &str) -> Option<CacheHit> {
        if !self.config.enabled {
            return None;
        }
        let key = text::cache_key(query);

        if let Some(hit) = self.lookup_remote(&key, query).await {
            return Some(hit);
        }

        if let Some(entry) = self.local.get(&key) {
            if entry.is_fresh() {
                self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %&key[..12], "Local cache hit");
                return Some(CacheHit {
                    response: entry.response,
                    source: CacheSource::Local,
                    similarity: 1.0,
                });
            }
            self.local.remove(&key);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn lookup_remote(&self, key: &str, query: &str) -> Option<CacheHit> {
        if !self.store.is_available() {
            return None;
        }
        let now_ms = chrono::Utc::now().timestamp_millis();

        if let Some(Some(entry)) = self.guarded("get", self.store.get(key)).await {
            if entry.metadata.is_fresh(now_ms) {
                self.counters.exact_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(store = self.store.name(), "Exact cache hit");
                return Some(CacheHit {
                    response: entry.payload,
                    source: CacheSource::Exact,
                    similarity: 1.0,
                });
            }
            tracing::debug!(store = self.store.name(), "Expired remote entry skipped");
        }

        if !self.embedder.is_available() {
            return None;
        }
        let vector = self.guarded("embed", self.embedder.embed(query)).await?;
        let hits = self.guarded("search", self.store.search(&vector, 1)).await?;
        let best = hits.into_iter().next()?;
        let similarity = 1.0 - best.distance;
        if similarity >= self.config.similarity_threshold && best.metadata.is_fresh(now_ms) {
            self.counters.similar_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                similarity,
                matched = %best.metadata.query,
                "Similar cache hit"
            );
            return Some(CacheHit {
                response: best.payload,
                source: CacheSource::Similar,
                similarity,
            });
        }
        None
    }

    /// Store `response` for `query`
    ///
    /// Without `ttl` the policy picks one from the query. Blank responses
    /// are ignored. Remote failures are logged and swallowed.
    pub async fn set(&self, query: &str, response: &str, ttl: Option<Duration>) {
        if !self.config.enabled || response.trim().is_empty() {
            return;
        }
        let ttl = ttl.unwrap_or_else(|| self.config.ttl.ttl_for(query));
        let key = text::cache_key(query);

        self.local.insert(
            key.clone(),
            LocalEntry {
                response: response.to_string(),
                written_at: Instant::now(),
                ttl,
            },
        );
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        if !self.store.is_available() {
            return;
        }
        let vector = if self.embedder.is_available() {
            self.guarded("embed", self.embedder.embed(query)).await
        } else {
            None
        };
        let metadata = EntryMetadata::now(query, ttl);
        self.guarded("upsert", self.store.upsert(&key, vector, response, metadata))
            .await;
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            exact_hits: self.counters.exact_hits.load(Ordering::Relaxed),
            similar_hits: self.counters.similar_hits.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
            local_entries: self.local.len(),
            vector_store: self.store.name().to_string(),
            embedder: self.embedder.name().to_string(),
        }
    }

    /// Run one remote call under the cache breaker and timeout
    async fn guarded<T, Fut>(&self, op: &'static str, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let limit = self.config.backend_timeout;
        let result = self
            .breaker
            .call(|| async move {
                tokio::time::timeout(limit, fut)
                    .await
                    .unwrap_or(Err(BackendError::Timeout(limit)))
            })
            .await;

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                let err = GatewayError::CacheBackend(format!("{op}: {e}"));
                if e.is_open() {
                    tracing::debug!(error = %err, "Cache backend short-circuited");
                } else {
                    tracing::warn!(
                        store = self.store.name(),
                        error = %err,
                        "Cache backend degraded, continuing without it"
                    );
                }
                None
            }
        }
    }
}
