//! Query Classifier
//!
//! Cascading, latency-first classification of a query into a [`QueryType`]:
//!
//! ```text
//! 1. prefix cache   ── hit ──────────────► (cached type, 0.90)
//! 2. keyword score  ── best score >= 2 ──► (type, 0.85)
//! 3. small LLM call ── category parsed ──► (type, 0.90), cached
//! 4. default        ─────────────────────► (general, 0.50)
//! ```
//!
//! Step 3 is only reached when the two near-free steps fail. Every failure
//! inside the cascade is logged and the next step runs; classification
//! itself never fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::catalog::{PoolId, QueryType};
use super::pools::PoolRegistry;
use crate::backend::LlmRequest;
use crate::cache::BoundedMap;
use crate::error::GatewayError;
use crate::resilience::{BreakerError, BreakerRegistry};
use crate::text;

/// Confidence of a prefix-cache hit or an LLM classification
pub const CACHED_CONFIDENCE: f32 = 0.9;
/// Confidence of a keyword classification
pub const KEYWORD_CONFIDENCE: f32 = 0.85;
/// Confidence of the default classification
pub const DEFAULT_CONFIDENCE: f32 = 0.5;
/// Minimum keyword score accepted
pub const KEYWORD_THRESHOLD: usize = 2;

/// Classifier settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Pool hosting the classification model
    pub pool: PoolId,
    /// Small model used for step 3
    pub model: String,
    /// Timeout of the classification call
    pub timeout: Duration,
    /// Token budget of the classification call
    pub max_tokens: u32,
    /// Entries kept in the prefix cache
    pub cache_size: usize,
    /// Characters of the normalised query used as cache key
    pub prefix_len: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            pool: PoolId::Fast,
            model: "llama3.2:3b".to_string(),
            timeout: Duration::from_secs(3),
            max_tokens: 10,
            cache_size: 1000,
            prefix_len: 100,
        }
    }
}

/// Which cascade step produced a classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Prefix cache
    Cache,
    /// Keyword scoring
    Keywords,
    /// LLM call
    Llm,
    /// Nothing matched
    Default,
}

/// Result of [`Classifier::classify`]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Chosen category
    pub query_type: QueryType,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    /// Step that produced it
    pub method: ClassificationMethod,
}

/// Per-step counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierStats {
    /// Prefix cache hits
    pub cache_hits: u64,
    /// Keyword classifications
    pub keyword_hits: u64,
    /// LLM classifications
    pub llm_hits: u64,
    /// LLM steps that failed or gave no category
    pub llm_failures: u64,
    /// Default classifications
    pub defaults: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    keyword_hits: AtomicU64,
    llm_hits: AtomicU64,
    llm_failures: AtomicU64,
    defaults: AtomicU64,
}

/// Keyword score of every query type, in [`QueryType::ALL`] order
#[must_use]
pub fn keyword_scores(query: &str) -> Vec<(QueryType, usize)> {
    let normalized = text::normalize(query);
    QueryType::ALL
        .into_iter()
        .map(|t| {
            let score = t
                .keywords()
                .iter()
                .filter(|kw| text::contains_term(&normalized, kw))
                .count();
            (t, score)
        })
        .collect()
}

/// Best keyword match if its score reaches [`KEYWORD_THRESHOLD`]
///
/// Ties go to the type listed first in [`QueryType::ALL`].
#[must_use]
pub fn keyword_classify(query: &str) -> Option<QueryType> {
    let mut best: Option<(QueryType, usize)> = None;
    for (t, score) in keyword_scores(query) {
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((t, score));
        }
    }
    best.filter(|(_, s)| *s >= KEYWORD_THRESHOLD).map(|(t, _)| t)
}

/// First category name appearing in an LLM reply
#[must_use]
pub fn parse_category(reply: &str) -> Option<QueryType> {
    text::normalize(reply)
        .split(' ')
        .find_map(|word| word.parse::<QueryType>().ok())
}

fn classification_prompt(query: &str) -> String {
    let menu: Vec<&str> = QueryType::ALL.iter().map(QueryType::as_str).collect();
    format!(
        "Classify the query into exactly one of these categories: {}.\n\
         Reply with only the category name.\n\n\
         Query: {query}\n\
         Category:",
        menu.join(", ")
    )
}

/// Cascading query classifier
#[derive(Debug)]
pub struct Classifier {
    config: ClassifierConfig,
    pools: Arc<PoolRegistry>,
    breakers: Arc<BreakerRegistry>,
    cache: BoundedMap<String, QueryType>,
    counters: Counters,
}

impl Classifier {
    /// Create a classifier sharing the gateway's pools and breakers
    #[must_use]
    pub fn new(
        config: ClassifierConfig,
        pools: Arc<PoolRegistry>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        let cache = BoundedMap::new(config.cache_size);
        Self {
            config,
            pools,
            breakers,
            cache,
            counters: Counters::default(),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify `query`
    pub async fn classify(&self, query: &str) -> Classification {
        let key = text::prefix(query, self.config.prefix_len);

        if let Some(query_type) = self.cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Classification {
                query_type,
                confidence: CACHED_CONFIDENCE,
                method: ClassificationMethod::Cache,
            };
        }

        if let Some(query_type) = keyword_classify(query) {
            self.counters.keyword_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%query_type, "Classified by keywords");
            return Classification {
                query_type,
                confidence: KEYWORD_CONFIDENCE,
                method: ClassificationMethod::Keywords,
            };
        }

        match self.classify_with_llm(query).await {
            Ok(query_type) => {
                self.counters.llm_hits.fetch_add(1, Ordering::Relaxed);
                self.cache.insert(key, query_type);
                tracing::debug!(%query_type, "Classified by LLM");
                return Classification {
                    query_type,
                    confidence: CACHED_CONFIDENCE,
                    method: ClassificationMethod::Llm,
                };
            }
            Err(e) => {
                self.counters.llm_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "LLM classification unavailable, using default");
            }
        }

        self.counters.defaults.fetch_add(1, Ordering::Relaxed);
        Classification {
            query_type: QueryType::General,
            confidence: DEFAULT_CONFIDENCE,
            method: ClassificationMethod::Default,
        }
    }

    async fn classify_with_llm(&self, query: &str) -> Result<QueryType, GatewayError> {
        let backend = self
            .pools
            .backend(self.config.pool)
            .map_err(|e| GatewayError::ClassificationFallback(e.to_string()))?;
        let breaker = self.breakers.get_or_create(&self.config.pool.breaker_name());
        let timeout = self.config.timeout;

        let request = LlmRequest::new(classification_prompt(query), self.config.model.clone())
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(0.0)
            .with_timeout(timeout);

        let reply = breaker
            .call(|| async {
                match tokio::time::timeout(timeout, backend.generate(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(crate::error::BackendError::Timeout(timeout)),
                }
            })
            .await
            .map_err(|e| match e {
                BreakerError::Open { name } => {
                    GatewayError::ClassificationFallback(format!("breaker '{name}' open"))
                }
                BreakerError::Inner(err) => GatewayError::ClassificationFallback(err.to_string()),
            })?;

        parse_category(&reply.content).ok_or_else(|| {
            GatewayError::ClassificationFallback(format!(
                "no category in reply '{}'",
                reply.content.trim()
            ))
        })
    }

    /// Whether the classification model is reachable on its pool
    pub async fn is_available(&self) -> bool {
        self.pools
            .is_model_available(&self.config.model, self.config.pool)
            .await
    }

    /// Per-step counters
    #[must_use]
    pub fn stats(&self) -> ClassifierStats {
        ClassifierStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            keyword_hits: self.counters.keyword_hits.load(Ordering::Relaxed),
            llm_hits: self.counters.llm_hits.load(Ordering::Relaxed),
            llm_failures: self.counters.llm_failures.load(Ordering::Relaxed),
            defaults: self.counters.defaults.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::InferenceBackend;
    use crate::error::BackendError;
    use crate::resilience::BreakerConfig;
    use pretty_assertions::assert_eq;

    fn classifier(fast: &Arc<MockBackend>) -> Classifier {
        let pools = Arc::new(PoolRegistry::new().with_backend(
            PoolId::Fast,
            "llama3.2:3b",
            Some(Arc::clone(fast) as Arc<dyn InferenceBackend>),
        ));
        Classifier::new(
            ClassifierConfig::default(),
            pools,
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        )
    }

    #[test]
    fn test_weather_query_scores_secretary_only() {
        let scores = keyword_scores("what's the weather right now");
        let strong: Vec<_> = scores.iter().filter(|(_, s)| *s >= 2).collect();
        assert_eq!(strong, vec![&(QueryType::Secretary, 2)]);
        assert_eq!(
            keyword_classify("what's the weather right now"),
            Some(QueryType::Secretary)
        );
    }

    #[test]
    fn test_single_keyword_is_not_enough() {
        assert_eq!(keyword_classify("tell me a story"), None);
        assert_eq!(keyword_classify("hello there"), None);
    }

    #[test]
    fn test_keyword_tie_goes_to_first_type() {
        // code: python, function; math: calculate, equation
        assert_eq!(
            keyword_classify("python function to calculate an equation"),
            Some(QueryType::Code)
        );
    }

    #[test]
    fn test_parse_category() {
        assert_eq!(parse_category("Math"), Some(QueryType::Math));
        assert_eq!(
            parse_category("The category is: creative (or maybe code)"),
            Some(QueryType::Creative)
        );
        assert_eq!(parse_category("no idea"), None);
    }

    #[tokio::test]
    async fn test_keywords_need_no_network() {
        let fast = Arc::new(MockBackend::new("fast"));
        let c = classifier(&fast);

        let result = c.classify("fix this python function, it has a bug").await;
        assert_eq!(result.query_type, QueryType::Code);
        assert!((result.confidence - KEYWORD_CONFIDENCE).abs() < f32::EPSILON);
        assert_eq!(result.method, ClassificationMethod::Keywords);
        assert_eq!(fast.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_llm_step_then_cache() {
        let fast = Arc::new(MockBackend::new("fast"));
        fast.set_reply("llama3.2:3b", "reasoning");
        let c = classifier(&fast);

        let first = c.classify("Should I take the job offer?").await;
        assert_eq!(first.query_type, QueryType::Reasoning);
        assert_eq!(first.method, ClassificationMethod::Llm);
        assert_eq!(fast.total_requests(), 1);

        let request = &fast.requests()[0];
        assert_eq!(request.max_tokens, 10);
        assert!(request.prompt.contains("Reply with only the category name"));

        let second = c.classify("should i take the job offer").await;
        assert_eq!(second.query_type, QueryType::Reasoning);
        assert_eq!(second.method, ClassificationMethod::Cache);
        assert!((second.confidence - CACHED_CONFIDENCE).abs() < f32::EPSILON);
        assert_eq!(fast.total_requests(), 1);
        assert_eq!(c.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_llm_failure_defaults_to_general() {
        let fast = Arc::new(MockBackend::new("fast"));
        fast.set_failure(
            "llama3.2:3b",
            BackendError::Status {
                status: 500,
                body: "oom".into(),
            },
        );
        let c = classifier(&fast);

        let result = c.classify("hmm").await;
        assert_eq!(result.query_type, QueryType::General);
        assert!((result.confidence - DEFAULT_CONFIDENCE).abs() < f32::EPSILON);
        assert_eq!(c.stats().llm_failures, 1);
        assert_eq!(c.stats().defaults, 1);
    }

    #[tokio::test]
    async fn test_unconfigured_classifier_pool_defaults() {
        let c = Classifier::new(
            ClassifierConfig::default(),
            Arc::new(PoolRegistry::new()),
            Arc::new(BreakerRegistry::default()),
        );
        let result = c.classify("hmm").await;
        assert_eq!(result.method, ClassificationMethod::Default);
        assert!(!c.is_available().await);
    }

    #[tokio::test]
    async fn test_unparseable_reply_defaults() {
        let fast = Arc::new(MockBackend::new("fast"));
        fast.set_reply("llama3.2:3b", "I cannot say");
        let c = classifier(&fast);
        let result = c.classify("hmm").await;
        assert_eq!(result.query_type, QueryType::General);
        assert_eq!(result.method, ClassificationMethod::Default);
    }
}
