//! Query Router
//!
//! Picks a model (or an ensemble of models) for a classified query and
//! executes the call.
//!
//! # Strategies
//!
//! - **Best** (`normal`): first available candidate by weight, pools in
//!   priority order
//! - **Fastest** (`fast`): smallest available candidate across pools
//! - **Ensemble** (`critical`): up to `ensemble_size` candidates called
//!   concurrently, answers merged by a synthesis call on the big pool
//!
//! When no candidate is available, each pool's default model is tried, and
//! as a last resort the big pool's default is forced with `fallback = true`.
//!
//! # Usage
//!
//! ```ignore
//! let router = Router::new(config, catalog, pools, breakers, retry, classifier);
//! let outcome = router.route(&RouteRequest::new("what's the weather right now")).await?;
//! println!("{}", outcome.response);
//! ```
//!
//! Every model call runs as `breaker(pool).call(retry(generate))`. A call that
//! fails after retries, or is blocked by an open breaker, yields an empty
//! response instead of an error; only an unconfigured pool is surfaced.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::catalog::{Importance, ModelCatalog, ModelSpec, PoolId, QueryType};
use super::classifier::{Classification, Classifier};
use super::metrics::{CallOutcome, RouterMetrics};
use super::policy::{pool_priority, RouteDecision, RouteReason};
use super::pools::PoolRegistry;
use crate::backend::LlmRequest;
use crate::error::{BackendError, GatewayError, Result};
use crate::resilience::{BreakerError, BreakerRegistry, ErrorClass, RetryPolicy};

// ============================================================================
// Configuration
// ============================================================================

/// Router settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Sampling temperature of routed calls
    pub temperature: f32,
    /// `num_predict` of routed calls (0 = pool default)
    pub num_predict: u32,
    /// Timeout of a single generate attempt
    pub request_timeout: Duration,
    /// Maximum ensemble members for critical queries
    pub ensemble_size: usize,
    /// Model used for ensemble synthesis (defaults to the big pool default)
    pub synthesis_model: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            num_predict: 0,
            request_timeout: Duration::from_secs(120),
            ensemble_size: 3,
            synthesis_model: None,
        }
    }
}

// ============================================================================
// Router Request/Response
// ============================================================================

/// A query to route
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteRequest {
    /// User query
    pub query: String,
    /// Routing hint
    pub importance: Importance,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Prior context (memory/RAG text)
    pub context: Option<String>,
    /// Pre-computed classification; classified on demand when absent
    pub classification: Option<Classification>,
}

impl RouteRequest {
    /// Normal-importance request
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Set importance
    #[must_use]
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set prior context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Skip classification
    #[must_use]
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }
}

/// Result of [`Router::route`]
#[derive(Clone, Debug, PartialEq)]
pub struct RouteOutcome {
    /// Response text; empty when every call failed
    pub response: String,
    /// Decision of the call that produced `response`
    pub decision: RouteDecision,
    /// Classification used
    pub classification: Classification,
}

// ============================================================================
// Router
// ============================================================================

/// Model router
#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    catalog: ModelCatalog,
    pools: Arc<PoolRegistry>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    classifier: Arc<Classifier>,
    metrics: RouterMetrics,
    last_decision: RwLock<Option<RouteDecision>>,
}

impl Router {
    /// Create a router
    #[must_use]
    pub fn new(
        config: RouterConfig,
        catalog: ModelCatalog,
        pools: Arc<PoolRegistry>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
        classifier: Arc<Classifier>,
    ) -> Self {
        Self {
            config,
            catalog,
            pools,
            breakers,
            retry,
            classifier,
            metrics: RouterMetrics::new(),
            last_decision: RwLock::new(None),
        }
    }

    /// Classify, pick a strategy by importance, and execute
    pub async fn route(&self, request: &RouteRequest) -> Result<RouteOutcome> {
        let classification = match request.classification {
            Some(c) => c,
            None => self.classifier.classify(&request.query).await,
        };
        let qt = classification.query_type;
        let confidence = classification.confidence;

        tracing::debug!(
            query_type = %qt,
            confidence,
            importance = %request.importance,
            "Routing query"
        );

        if request.importance == Importance::Critical {
            return self.ensemble_query(request, classification).await;
        }

        let decision = match request.importance {
            Importance::Fast => self.query_fastest(qt, confidence, request.importance).await,
            _ => self.query_best(qt, confidence, request.importance).await,
        };
        let response = self.execute(&decision, request).await?;

        Ok(RouteOutcome {
            response,
            decision,
            classification,
        })
    }

    /// First available candidate by weight, pools in priority order
    pub async fn query_best(
        &self,
        query_type: QueryType,
        confidence: f32,
        importance: Importance,
    ) -> RouteDecision {
        let priority = pool_priority(query_type, importance);
        for pool in priority {
            for spec in self.catalog.candidates(query_type) {
                if !spec.allowed_on(pool) {
                    continue;
                }
                if self.pools.is_model_available(&spec.name, pool).await {
                    return self.candidate_decision(
                        spec,
                        pool,
                        RouteReason::BestCandidate,
                        query_type,
                        confidence,
                    );
                }
            }
        }
        self.default_decision(query_type, confidence, priority).await
    }

    /// Smallest available candidate across the priority-ordered pools
    pub async fn query_fastest(
        &self,
        query_type: QueryType,
        confidence: f32,
        importance: Importance,
    ) -> RouteDecision {
        let priority = pool_priority(query_type, importance);
        let available = self.available_candidates(query_type, priority, usize::MAX).await;

        let mut fastest: Option<&(ModelSpec, PoolId)> = None;
        for entry in &available {
            if fastest.map_or(true, |(best, _)| entry.0.size_b < best.size_b) {
                fastest = Some(entry);
            }
        }

        match fastest {
            Some((spec, pool)) => self.candidate_decision(
                spec,
                *pool,
                RouteReason::FastestCandidate,
                query_type,
                confidence,
            ),
            None => self.default_decision(query_type, confidence, priority).await,
        }
    }

    /// Concurrent ensemble with a synthesis pass
    ///
    /// Failed or empty member answers are dropped. One surviving answer is
    /// returned as is; two or more are merged by a synthesis call. With no
    /// survivors the query falls back to [`Router::query_best`].
    pub async fn ensemble_query(
        &self,
        request: &RouteRequest,
        classification: Classification,
    ) -> Result<RouteOutcome> {
        let qt = classification.query_type;
        let confidence = classification.confidence;
        let priority = pool_priority(qt, Importance::Critical);
        self.metrics.total_ensembles.inc();

        let members = self
            .available_candidates(qt, priority, self.config.ensemble_size.max(1))
            .await;

        let calls = members.iter().map(|(spec, pool)| {
            let decision =
                self.candidate_decision(spec, *pool, RouteReason::EnsembleMember, qt, confidence);
            async move {
                let result = self.execute(&decision, request).await;
                (decision, result)
            }
        });
        let results = join_all(calls).await;

        let mut answers: Vec<(RouteDecision, String)> = Vec::new();
        for (decision, result) in results {
            match result {
                Ok(text) if !text.trim().is_empty() => answers.push((decision, text)),
                Ok(_) => {
                    tracing::debug!(model = %decision.model, "Ensemble member produced nothing");
                }
                Err(e) => {
                    tracing::warn!(model = %decision.model, error = %e, "Ensemble member failed");
                }
            }
        }

        tracing::info!(
            query_type = %qt,
            members = members.len(),
            succeeded = answers.len(),
            "Ensemble finished"
        );

        if answers.is_empty() {
            let decision = self.query_best(qt, confidence, Importance::Normal).await;
            let response = self.execute(&decision, request).await?;
            return Ok(RouteOutcome {
                response,
                decision,
                classification,
            });
        }

        if answers.len() == 1 {
            let (decision, response) = answers.remove(0);
            self.set_last_decision(&decision);
            return Ok(RouteOutcome {
                response,
                decision,
                classification,
            });
        }

        let synthesis = RouteDecision {
            model: self
                .config
                .synthesis_model
                .clone()
                .unwrap_or_else(|| self.pools.default_model(PoolId::Big).to_string()),
            pool: PoolId::Big,
            url: self.pools.base_url(PoolId::Big).ok(),
            reason: RouteReason::EnsembleSynthesis,
            query_type: qt,
            confidence,
            fallback: false,
            keep_alive: None,
        };
        let synthesis_request = RouteRequest {
            query: synthesis_prompt(&request.query, &answers),
            importance: Importance::Critical,
            system_prompt: request.system_prompt.clone(),
            context: None,
            classification: Some(classification),
        };

        match self.execute(&synthesis, &synthesis_request).await {
            Ok(text) if !text.trim().is_empty() => Ok(RouteOutcome {
                response: text,
                decision: synthesis,
                classification,
            }),
            other => {
                if let Err(e) = other {
                    tracing::warn!(error = %e, "Synthesis call failed, using first answer");
                } else {
                    tracing::warn!("Synthesis returned nothing, using first answer");
                }
                let (decision, response) = answers.remove(0);
                self.set_last_decision(&decision);
                Ok(RouteOutcome {
                    response,
                    decision,
                    classification,
                })
            }
        }
    }

    /// Execute a decision under the pool's breaker and the retry policy
    ///
    /// Records the decision as the most recent one. Backend failures and
    /// open breakers give `Ok("")`; an unconfigured pool is an error.
    pub async fn execute(&self, decision: &RouteDecision, request: &RouteRequest) -> Result<String> {
        self.set_last_decision(decision);
        self.metrics
            .record_decision(decision.query_type, decision.fallback);

        let backend = self.pools.backend(decision.pool)?;
        let breaker = self.breakers.get_or_create(&decision.pool.breaker_name());
        let timeout = self.config.request_timeout;

        let mut llm_request = LlmRequest::new(request.query.clone(), decision.model.clone())
            .with_max_tokens(self.config.num_predict)
            .with_temperature(self.config.temperature)
            .with_keep_alive(decision.keep_alive.clone())
            .with_timeout(timeout);
        llm_request.system = request.system_prompt.clone();
        llm_request.context = request.context.clone();

        let started = Instant::now();
        let result = breaker
            .call(|| {
                self.retry.retry(|| async {
                    match tokio::time::timeout(timeout, backend.generate(&llm_request)).await {
                        Ok(Ok(response)) if response.content.trim().is_empty() => {
                            Err(BackendError::Decode("empty response".into()))
                        }
                        Ok(result) => result,
                        Err(_) => Err(BackendError::Timeout(timeout)),
                    }
                })
            })
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(response) => {
                self.metrics
                    .record_call(&decision.model, CallOutcome::Success, elapsed);
                tracing::debug!(
                    model = %decision.model,
                    pool = %decision.pool,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Model call succeeded"
                );
                Ok(response.content)
            }
            Err(BreakerError::Open { name }) => {
                self.metrics
                    .record_call(&decision.model, CallOutcome::Blocked, Duration::ZERO);
                let err = GatewayError::BreakerOpen { name };
                tracing::warn!(model = %decision.model, error = %err, "Model call blocked");
                Ok(String::new())
            }
            Err(BreakerError::Inner(e)) => {
                let outcome = if matches!(e, BackendError::Decode(_)) {
                    CallOutcome::Empty
                } else {
                    CallOutcome::Failure
                };
                self.metrics.record_call(&decision.model, outcome, elapsed);
                let err = match self.retry.classifier.classify(&e) {
                    ErrorClass::Transient => GatewayError::TransientBackend(e.to_string()),
                    ErrorClass::Permanent => GatewayError::PermanentBackend(e.to_string()),
                };
                tracing::warn!(
                    model = %decision.model,
                    pool = %decision.pool,
                    error = %err,
                    "Model call failed"
                );
                Ok(String::new())
            }
        }
    }

    /// Available candidates in pool priority then weight order, deduplicated
    /// by model name, at most `limit`
    async fn available_candidates(
        &self,
        query_type: QueryType,
        priority: [PoolId; 2],
        limit: usize,
    ) -> Vec<(ModelSpec, PoolId)> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        for pool in priority {
            for spec in self.catalog.candidates(query_type) {
                if found.len() >= limit {
                    return found;
                }
                if !spec.allowed_on(pool) || seen.contains(&spec.name) {
                    continue;
                }
                if self.pools.is_model_available(&spec.name, pool).await {
                    seen.insert(spec.name.clone());
                    found.push((spec.clone(), pool));
                }
            }
        }
        found
    }

    async fn default_decision(
        &self,
        query_type: QueryType,
        confidence: f32,
        priority: [PoolId; 2],
    ) -> RouteDecision {
        for pool in priority {
            let model = self.pools.default_model(pool);
            if !model.is_empty() && self.pools.is_model_available(model, pool).await {
                return RouteDecision {
                    model: model.to_string(),
                    pool,
                    url: self.pools.base_url(pool).ok(),
                    reason: RouteReason::PoolDefault,
                    query_type,
                    confidence,
                    fallback: false,
                    keep_alive: None,
                };
            }
        }

        let model = self.pools.default_model(PoolId::Big).to_string();
        tracing::warn!(
            query_type = %query_type,
            model = %model,
            "No candidate or pool default available, forcing big pool default"
        );
        RouteDecision {
            model,
            pool: PoolId::Big,
            url: self.pools.base_url(PoolId::Big).ok(),
            reason: RouteReason::UltimateFallback,
            query_type,
            confidence,
            fallback: true,
            keep_alive: None,
        }
    }

    fn candidate_decision(
        &self,
        spec: &ModelSpec,
        pool: PoolId,
        reason: RouteReason,
        query_type: QueryType,
        confidence: f32,
    ) -> RouteDecision {
        RouteDecision {
            model: spec.name.clone(),
            pool,
            url: self.pools.base_url(pool).ok(),
            reason,
            query_type,
            confidence,
            fallback: false,
            keep_alive: spec.keep_alive.clone(),
        }
    }

    fn set_last_decision(&self, decision: &RouteDecision) {
        *self.last_decision.write() = Some(decision.clone());
    }

    /// Most recent decision, for observability only
    #[must_use]
    pub fn last_decision(&self) -> Option<RouteDecision> {
        self.last_decision.read().clone()
    }

    /// Whether each query type has at least one available candidate
    pub async fn availability(&self) -> BTreeMap<QueryType, bool> {
        let mut map = BTreeMap::new();
        for qt in QueryType::ALL {
            let priority = pool_priority(qt, Importance::Normal);
            let available = !self.available_candidates(qt, priority, 1).await.is_empty();
            map.insert(qt, available);
        }
        map
    }

    /// Router metrics
    #[must_use]
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Shared classifier
    #[must_use]
    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    /// Shared pool registry
    #[must_use]
    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }
}

fn synthesis_prompt(query: &str, answers: &[(RouteDecision, String)]) -> String {
    let mut prompt = String::from(
        "Several models answered the same question. Synthesize the single best answer, \
         combining what is correct and complete in each. Reply with the answer only.\n\n",
    );
    prompt.push_str("Question: ");
    prompt.push_str(query);
    prompt.push_str("\n\n");
    for (i, (decision, text)) in answers.iter().enumerate() {
        prompt.push_str(&format!("Answer {} ({}):\n{}\n\n", i + 1, decision.model, text.trim()));
    }
    prompt.push_str("Best answer:");
    prompt
}
