//! Pool Registry
//!
//! Resolves each named pool to its endpoint and caches the list of models
//! currently loaded on it.
//!
//! The model list is fetched lazily on first use and then kept until
//! [`PoolRegistry::invalidate`] is called; there is no background refresh.
//! A model unloaded after the first fetch keeps looking available until the
//! cache is invalidated. Failed fetches are not cached.
//!
//! A pool without a URL is never reachable: every availability check on it
//! answers `false`, and asking for its endpoint is an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::catalog::PoolId;
use crate::backend::{InferenceBackend, OllamaBackend};
use crate::error::{GatewayError, Result};

/// Endpoint settings of one pool
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolConfig {
    /// Base URL; `None` leaves the pool unconfigured
    pub url: Option<String>,
    /// Model used when no catalog candidate is available
    pub default_model: String,
}

impl PoolConfig {
    /// Configured pool
    pub fn new(url: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            default_model: default_model.into(),
        }
    }

    /// Pool with no endpoint
    pub fn unconfigured(default_model: impl Into<String>) -> Self {
        Self {
            url: None,
            default_model: default_model.into(),
        }
    }
}

#[derive(Clone, Debug)]
struct ModelListCache {
    names: Vec<String>,
    fetched_at: Instant,
}

/// One inference pool
pub struct Pool {
    id: PoolId,
    default_model: String,
    backend: Option<Arc<dyn InferenceBackend>>,
    models: RwLock<Option<ModelListCache>>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("url", &self.backend.as_ref().map(|b| b.base_url().to_string()))
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Pool id
    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Whether the pool has an endpoint
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Configured default model
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Base URL, if configured
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.backend.as_ref().map(|b| b.base_url())
    }
}

/// Both pools, always present, possibly unconfigured
#[derive(Debug)]
pub struct PoolRegistry {
    pools: HashMap<PoolId, Pool>,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `requested` and `loaded` refer to the same model
///
/// Case-insensitive substring match in either direction, so `llama3` matches
/// a loaded `llama3:8b` and `llama3:8b` matches a loaded `llama3`.
#[must_use]
pub fn model_matches(requested: &str, loaded: &str) -> bool {
    let requested = requested.trim().to_lowercase();
    let loaded = loaded.trim().to_lowercase();
    if requested.is_empty() || loaded.is_empty() {
        return false;
    }
    loaded.contains(&requested) || requested.contains(&loaded)
}

impl PoolRegistry {
    /// Registry with both pools unconfigured
    #[must_use]
    pub fn new() -> Self {
        let pools = PoolId::ALL
            .into_iter()
            .map(|id| {
                (
                    id,
                    Pool {
                        id,
                        default_model: String::new(),
                        backend: None,
                        models: RwLock::new(None),
                    },
                )
            })
            .collect();
        Self { pools }
    }

    /// Build Ollama clients for every configured pool
    #[must_use]
    pub fn from_configs(configs: &HashMap<PoolId, PoolConfig>, timeout: Duration) -> Self {
        let mut registry = Self::new();
        for (id, config) in configs {
            let backend: Option<Arc<dyn InferenceBackend>> = config.url.as_ref().map(|url| {
                Arc::new(OllamaBackend::new(id.as_str(), url.clone(), timeout))
                    as Arc<dyn InferenceBackend>
            });
            registry = registry.with_backend(*id, config.default_model.clone(), backend);
        }
        registry
    }

    /// Install (or remove, with `None`) the backend of a pool
    #[must_use]
    pub fn with_backend(
        mut self,
        id: PoolId,
        default_model: impl Into<String>,
        backend: Option<Arc<dyn InferenceBackend>>,
    ) -> Self {
        self.pools.insert(
            id,
            Pool {
                id,
                default_model: default_model.into(),
                backend,
                models: RwLock::new(None),
            },
        );
        self
    }

    fn get(&self, id: PoolId) -> &Pool {
        // Both ids are inserted by `new` and never removed
        &self.pools[&id]
    }

    /// Pool by id
    #[must_use]
    pub fn pool(&self, id: PoolId) -> &Pool {
        self.get(id)
    }

    /// Whether `id` has an endpoint
    #[must_use]
    pub fn is_configured(&self, id: PoolId) -> bool {
        self.get(id).is_configured()
    }

    /// Base URL of `id`; an unconfigured pool is an error
    pub fn base_url(&self, id: PoolId) -> Result<String> {
        self.get(id)
            .url()
            .map(ToString::to_string)
            .ok_or(GatewayError::PoolNotConfigured(id))
    }

    /// Client of `id`; an unconfigured pool is an error
    pub fn backend(&self, id: PoolId) -> Result<Arc<dyn InferenceBackend>> {
        self.get(id)
            .backend
            .clone()
            .ok_or(GatewayError::PoolNotConfigured(id))
    }

    /// Default model of `id`
    #[must_use]
    pub fn default_model(&self, id: PoolId) -> &str {
        self.get(id).default_model()
    }

    /// Models loaded on `id`, fetched once and then served from cache
    pub async fn loaded_models(&self, id: PoolId) -> Vec<String> {
        let pool = self.get(id);
        let Some(backend) = pool.backend.clone() else {
            return Vec::new();
        };

        if let Some(cached) = pool.models.read().as_ref() {
            return cached.names.clone();
        }

        match backend.list_models().await {
            Ok(models) => {
                let names: Vec<String> = models.into_iter().map(|m| m.name).collect();
                tracing::debug!(pool = %id, count = names.len(), "Fetched pool model list");
                *pool.models.write() = Some(ModelListCache {
                    names: names.clone(),
                    fetched_at: Instant::now(),
                });
                names
            }
            Err(e) => {
                tracing::warn!(pool = %id, error = %e, "Failed to list pool models");
                Vec::new()
            }
        }
    }

    /// Whether `model` is loaded on `id`
    pub async fn is_model_available(&self, model: &str, id: PoolId) -> bool {
        if !self.is_configured(id) {
            return false;
        }
        self.loaded_models(id)
            .await
            .iter()
            .any(|loaded| model_matches(model, loaded))
    }

    /// When the cached model list of `id` was fetched
    #[must_use]
    pub fn models_fetched_at(&self, id: PoolId) -> Option<Instant> {
        self.get(id).models.read().as_ref().map(|c| c.fetched_at)
    }

    /// Drop the cached model list of `id`
    pub fn invalidate(&self, id: PoolId) {
        *self.get(id).models.write() = None;
    }

    /// Drop every cached model list
    pub fn invalidate_all(&self) {
        for id in PoolId::ALL {
            self.invalidate(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::error::BackendError;

    fn registry_with(fast: &Arc<MockBackend>) -> PoolRegistry {
        PoolRegistry::new().with_backend(
            PoolId::Fast,
            "llama3.2:3b",
            Some(Arc::clone(fast) as Arc<dyn InferenceBackend>),
        )
    }

    #[test]
    fn test_model_matching_is_bidirectional() {
        assert!(model_matches("llama3", "llama3:8b"));
        assert!(model_matches("LLAMA3:8b", "llama3"));
        assert!(!model_matches("mistral", "llama3:8b"));
        assert!(!model_matches("", "llama3:8b"));
        assert!(!model_matches("llama3", ""));
    }

    #[tokio::test]
    async fn test_unconfigured_pool_is_never_available() {
        let registry = PoolRegistry::new();
        assert!(!registry.is_model_available("llama3", PoolId::Big).await);
        assert!(matches!(
            registry.base_url(PoolId::Big),
            Err(GatewayError::PoolNotConfigured(PoolId::Big))
        ));
        assert!(registry.backend(PoolId::Fast).is_err());
        assert!(registry.loaded_models(PoolId::Big).await.is_empty());
    }

    #[tokio::test]
    async fn test_model_list_is_cached_until_invalidated() {
        let fast = Arc::new(MockBackend::new("fast").with_models(&["llama3.2:3b"]));
        let registry = registry_with(&fast);

        assert!(registry.is_model_available("llama3.2", PoolId::Fast).await);
        assert!(registry.is_model_available("llama3.2:3b", PoolId::Fast).await);
        assert_eq!(fast.list_calls(), 1);
        assert!(registry.models_fetched_at(PoolId::Fast).is_some());

        // Unloaded on the pool, but the cached list still reports it
        fast.set_models(&[]);
        assert!(registry.is_model_available("llama3.2:3b", PoolId::Fast).await);

        registry.invalidate(PoolId::Fast);
        assert!(!registry.is_model_available("llama3.2:3b", PoolId::Fast).await);
        assert_eq!(fast.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_listing_is_not_cached() {
        let fast = Arc::new(MockBackend::new("fast").with_models(&["qwen2.5:3b"]));
        fast.fail_listing(Some(BackendError::Connection("refused".into())));
        let registry = registry_with(&fast);

        assert!(!registry.is_model_available("qwen2.5:3b", PoolId::Fast).await);
        assert!(registry.models_fetched_at(PoolId::Fast).is_none());

        fast.fail_listing(None);
        assert!(registry.is_model_available("qwen2.5:3b", PoolId::Fast).await);
    }

    #[test]
    fn test_from_configs() {
        let mut configs = HashMap::new();
        configs.insert(PoolId::Big, PoolConfig::new("http://gpu:11434/", "qwen2.5:32b"));
        configs.insert(PoolId::Fast, PoolConfig::unconfigured("llama3.2:3b"));
        let registry = PoolRegistry::from_configs(&configs, Duration::from_secs(5));

        assert_eq!(registry.base_url(PoolId::Big).unwrap(), "http://gpu:11434");
        assert!(!registry.is_configured(PoolId::Fast));
        assert_eq!(registry.default_model(PoolId::Fast), "llama3.2:3b");
    }
}
