//! Gateway Facade
//!
//! The context object built once at startup and shared by every request
//! handler. It owns one instance of each stateful component:
//!
//! ```text
//!   GatewayRequest
//!        │
//!        ▼
//!   RateLimiter::admit(caller, "route") ──✗──► AdmissionRejected
//!        │
//!        ▼
//!   SemanticCache::get(query) ──hit──► response (no model call)
//!        │ miss
//!        ▼
//!   Router::route ──► Classifier → pool → CircuitBreaker → RetryPolicy → pool
//!        │
//!        ▼
//!   SemanticCache::set(query, response)   (non-empty answers only)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::OllamaBackend;
use crate::cache::{
    CacheSource, CacheStats, Embedder, InMemoryVectorStore, NullEmbedder, NullVectorStore,
    OllamaEmbedder, SemanticCache, VectorStore,
};
use crate::config::{CacheStoreKind, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::resilience::{BreakerRegistry, BreakerStats, RateLimitError, RateLimiter};
use crate::routing::{
    Classification, Classifier, ClassifierStats, Importance, ModelMetricsSummary, PoolId,
    PoolRegistry, QueryType, RouteDecision, RouteRequest, Router,
};

/// Endpoint name used for admission control of routed queries
pub const ROUTE_ENDPOINT: &str = "route";

fn default_caller() -> String {
    "anonymous".to_string()
}

/// One query entering the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// Caller identity for admission control
    #[serde(default = "default_caller")]
    pub caller: String,
    /// Query text
    pub query: String,
    /// Routing hint
    #[serde(default)]
    pub importance: Importance,
    /// System prompt passed to the model
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Prior context from an external retrieval step; not part of the cache key
    #[serde(default)]
    pub context: Option<String>,
}

impl GatewayRequest {
    /// Normal-importance request
    pub fn new(caller: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            query: query.into(),
            importance: Importance::Normal,
            system_prompt: None,
            context: None,
        }
    }

    /// Set the importance
    #[must_use]
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the prior context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn to_route_request(&self) -> RouteRequest {
        let mut request = RouteRequest::new(self.query.clone()).with_importance(self.importance);
        if let Some(ref prompt) = self.system_prompt {
            request = request.with_system_prompt(prompt.clone());
        }
        if let Some(ref context) = self.context {
            request = request.with_context(context.clone());
        }
        request
    }
}

/// Answer to a [`GatewayRequest`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GatewayResponse {
    /// Correlates this answer with the gateway's log lines
    pub request_id: Uuid,
    /// Answer text; empty when every model call failed
    pub response: String,
    /// Cache tier that answered, if any
    pub cached: Option<CacheSource>,
    /// Routing decision, absent for cache hits
    pub decision: Option<RouteDecision>,
    /// Classification, absent for cache hits
    pub classification: Option<Classification>,
}

/// Snapshot of every counter in the gateway
#[derive(Clone, Debug, Serialize)]
pub struct GatewayStats {
    /// Per-model call counters and latency
    pub models: BTreeMap<String, ModelMetricsSummary>,
    /// Decisions per query type
    pub query_types: BTreeMap<QueryType, u64>,
    /// Routing decisions made
    pub total_routed: u64,
    /// Decisions that forced the big pool default
    pub total_fallbacks: u64,
    /// Ensembles run
    pub total_ensembles: u64,
    /// Most recent routing decision
    pub last_decision: Option<RouteDecision>,
    /// Every breaker, sorted by name
    pub breakers: Vec<BreakerStats>,
    /// Cache counters
    pub cache: CacheStats,
    /// Classifier cascade counters
    pub classifier: ClassifierStats,
    /// Requests admitted by the rate limiter
    pub admitted: u64,
    /// Requests rejected by the rate limiter
    pub rejected: u64,
    /// Seconds since the router was built
    pub uptime_secs: u64,
}

/// Health of one pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    /// Whether the pool has an endpoint
    pub configured: bool,
    /// Endpoint, if configured
    pub url: Option<String>,
    /// Fallback model of the pool
    pub default_model: String,
    /// Models currently loaded
    pub loaded_models: Vec<String>,
}

/// Result of [`Gateway::health_check`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    /// Whether the classification model is loaded
    pub classifier_available: bool,
    /// Whether each query type has an available candidate
    pub query_types: BTreeMap<QueryType, bool>,
    /// Per-pool state
    pub pools: BTreeMap<PoolId, PoolHealth>,
}

impl HealthReport {
    /// At least one pool answers model listings with something loaded
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.pools.values().any(|p| !p.loaded_models.is_empty())
    }
}

/// Inference gateway
#[derive(Debug)]
pub struct Gateway {
    limiter: RateLimiter,
    cache: SemanticCache,
    router: Router,
    breakers: Arc<BreakerRegistry>,
}

impl Gateway {
    /// Compose a gateway from already-built parts
    ///
    /// `breakers` must be the registry the router and cache were built with.
    pub fn new(
        limiter: RateLimiter,
        cache: SemanticCache,
        router: Router,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            limiter,
            cache,
            router,
            breakers,
        }
    }

    /// Build every component from configuration
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for invalid values and
    /// [`GatewayError::PoolNotConfigured`] if embeddings are requested from a
    /// pool without an endpoint.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;

        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let pools = Arc::new(PoolRegistry::from_configs(
            &config.pools,
            config.router.request_timeout,
        ));
        if !pools.is_configured(config.classifier.pool) {
            tracing::warn!(
                pool = %config.classifier.pool,
                "Classifier pool has no endpoint, classification will use keywords only"
            );
        }

        let classifier = Arc::new(Classifier::new(
            config.classifier.clone(),
            Arc::clone(&pools),
            Arc::clone(&breakers),
        ));
        let router = Router::new(
            config.router.clone(),
            config.catalog.clone(),
            Arc::clone(&pools),
            Arc::clone(&breakers),
            config.retry.clone(),
            classifier,
        );

        let store: Arc<dyn VectorStore> = match config.cache_store {
            CacheStoreKind::None => Arc::new(NullVectorStore),
            CacheStoreKind::Memory => {
                Arc::new(InMemoryVectorStore::with_capacity(config.cache.max_store_entries))
            }
        };
        let embedder: Arc<dyn Embedder> = match &config.embedding {
            Some(embedding) => {
                let url = pools.base_url(embedding.pool)?;
                let backend =
                    OllamaBackend::new(embedding.pool.as_str(), url, config.cache.backend_timeout);
                Arc::new(OllamaEmbedder::new(
                    backend,
                    embedding.model.clone(),
                    config.cache.backend_timeout,
                ))
            }
            None => Arc::new(NullEmbedder),
        };
        let cache = SemanticCache::new(config.cache.clone(), embedder, store, &breakers);

        tracing::info!(
            big = pools.is_configured(PoolId::Big),
            fast = pools.is_configured(PoolId::Fast),
            cache_store = ?config.cache_store,
            rate_limit = config.rate_limit.enabled,
            "Gateway initialized"
        );

        Ok(Self::new(
            RateLimiter::new(config.rate_limit.clone()),
            cache,
            router,
            breakers,
        ))
    }

    /// Answer one query
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AdmissionRejected`] when the caller or the
    /// endpoint is over its rate, and [`GatewayError::PoolNotConfigured`]
    /// when routing is forced onto a pool without an endpoint. Model
    /// failures are not errors; they produce an empty response.
    pub async fn route(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("route", %request_id, caller = %request.caller);
        self.route_inner(request, request_id).instrument(span).await
    }

    async fn route_inner(
        &self,
        request: &GatewayRequest,
        request_id: Uuid,
    ) -> Result<GatewayResponse> {
        self.limiter
            .admit(&request.caller, ROUTE_ENDPOINT)
            .map_err(|RateLimitError::Exhausted { caller, endpoint, .. }| {
                GatewayError::AdmissionRejected { caller, endpoint }
            })?;

        if let Some(hit) = self.cache.get(&request.query).await {
            tracing::debug!(caller = %request.caller, source = ?hit.source, "Answered from cache");
            return Ok(GatewayResponse {
                request_id,
                response: hit.response,
                cached: Some(hit.source),
                decision: None,
                classification: None,
            });
        }

        let outcome = self.router.route(&request.to_route_request()).await?;

        if outcome.response.trim().is_empty() {
            tracing::warn!(
                model = %outcome.decision.model,
                pool = %outcome.decision.pool,
                "Every model call failed, returning empty response"
            );
        } else {
            self.cache.set(&request.query, &outcome.response, None).await;
        }

        Ok(GatewayResponse {
            request_id,
            response: outcome.response,
            cached: None,
            decision: Some(outcome.decision),
            classification: Some(outcome.classification),
        })
    }

    /// Classify without routing
    pub async fn classify(&self, query: &str) -> Classification {
        self.router.classifier().classify(query).await
    }

    /// Counter snapshot
    pub fn stats(&self) -> GatewayStats {
        let metrics = self.router.metrics();
        GatewayStats {
            models: metrics.model_summaries(),
            query_types: metrics.query_type_counts(),
            total_routed: metrics.total_routed.get(),
            total_fallbacks: metrics.total_fallbacks.get(),
            total_ensembles: metrics.total_ensembles.get(),
            last_decision: self.router.last_decision(),
            breakers: self.breakers.stats(),
            cache: self.cache.stats(),
            classifier: self.router.classifier().stats(),
            admitted: self.limiter.admitted(),
            rejected: self.limiter.rejected(),
            uptime_secs: metrics.uptime().as_secs(),
        }
    }

    /// Check classifier, candidates and pools
    pub async fn health_check(&self) -> HealthReport {
        let pools = self.router.pools();
        let mut pool_health = BTreeMap::new();
        for id in PoolId::ALL {
            let pool = pools.pool(id);
            pool_health.insert(
                id,
                PoolHealth {
                    configured: pool.is_configured(),
                    url: pool.url().map(str::to_string),
                    default_model: pool.default_model().to_string(),
                    loaded_models: pools.loaded_models(id).await,
                },
            );
        }

        HealthReport {
            classifier_available: self.router.classifier().is_available().await,
            query_types: self.router.availability().await,
            pools: pool_health,
        }
    }

    /// The router
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The cache
    pub fn cache(&self) -> &SemanticCache {
        &self.cache
    }

    /// The rate limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The breaker registry
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }
}
