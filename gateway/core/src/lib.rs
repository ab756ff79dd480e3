//! Gateway Core - Admission, Resilience, Routing and Caching for LLM Pools
//!
//! This crate sits in front of one or more Ollama inference pools and
//! decides, for every query, whether to answer from cache, which model on
//! which pool to call, how many calls to issue in parallel, and how to
//! survive a pool that is slow or down.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Callers                                │
//! │        daemon CLI  ·  Unix socket clients  ·  embedding apps     │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ GatewayRequest
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          GATEWAY CORE                            │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                         Gateway                            │  │
//! │  │  ┌─────────────┐  ┌───────────────┐  ┌──────────────────┐  │  │
//! │  │  │ RateLimiter │→ │ SemanticCache │→ │      Router      │  │  │
//! │  │  │ caller/endp │  │ remote+local  │  │ Classifier, Pools│  │  │
//! │  │  └─────────────┘  └───────────────┘  └────────┬─────────┘  │  │
//! │  └───────────────────────────────────────────────┼────────────┘  │
//! │                     CircuitBreaker → RetryPolicy │               │
//! └──────────────────────────────────────────────────┼───────────────┘
//!                                                    │ HTTP
//!                                  ┌─────────────────┴──────────┐
//!                                  │  big pool   │  fast pool   │
//!                                  └────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Gateway`]: the context object composing every component
//! - [`Router`]: `query_best`, `query_fastest`, `ensemble_query`
//! - [`Classifier`]: cached → keywords → small LLM → `general`
//! - [`SemanticCache`]: exact and nearest-neighbour response cache
//! - [`CircuitBreaker`], [`RetryPolicy`], [`RateLimiter`]: resilience primitives
//!
//! # Quick Start
//!
//! ```ignore
//! use gateway_core::{load_config, Gateway, GatewayRequest, Importance};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config()?;
//!     let gateway = Gateway::from_config(&config)?;
//!
//!     let request = GatewayRequest::new("me", "what's the weather right now")
//!         .with_importance(Importance::Fast);
//!     let answer = gateway.route(&request).await?;
//!     println!("{}", answer.response);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: inference backend abstraction and the Ollama client
//! - [`cache`]: semantic cache, TTL policy, vector store capabilities
//! - [`config`]: TOML + environment configuration
//! - [`error`]: failure taxonomy
//! - [`gateway`]: the facade
//! - [`resilience`]: token buckets, circuit breakers, retry
//! - [`routing`]: catalog, pools, classifier, router
//! - [`text`]: query normalization shared by cache and classifier

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod resilience;
pub mod routing;
pub mod text;

// Re-exports for convenience
pub use backend::{InferenceBackend, LlmRequest, LlmResponse, ModelInfo, OllamaBackend};
pub use cache::{CacheConfig, CacheHit, CacheSource, CacheStats, SemanticCache, TtlPolicy};
pub use error::{BackendError, GatewayError, Result};
pub use gateway::{
    Gateway, GatewayRequest, GatewayResponse, GatewayStats, HealthReport, PoolHealth,
};

// Resilience exports
pub use resilience::{
    BreakerConfig, BreakerRegistry, BreakerStats, CircuitBreaker, CircuitState, RateLimitConfig,
    RateLimiter, RetryPolicy,
};

// Routing exports
pub use routing::{
    Classification, ClassificationMethod, Classifier, Importance, ModelCatalog, ModelSpec, PoolId,
    PoolRegistry, QueryType, RouteDecision, RouteReason, Router, RouterConfig,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, GatewayConfig, GatewayToml,
};
