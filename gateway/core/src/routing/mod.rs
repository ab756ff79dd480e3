//! Model Routing
//!
//! Decides which model on which pool answers a query, and runs the call.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!   query ──────────► │  Classifier  │  prefix cache → keywords → small LLM → general
//!                     └──────┬───────┘
//!                            │ (QueryType, confidence)
//!                            ▼
//!                     ┌──────────────┐     ┌───────────────┐
//!   importance ─────► │    Router    │ ──► │ ModelCatalog  │  candidates by weight
//!                     └──────┬───────┘     └───────────────┘
//!                            │
//!              ┌─────────────┼──────────────┐
//!              ▼             ▼              ▼
//!         query_best   query_fastest   ensemble_query
//!              │             │              │
//!              └─────────────┼──────────────┘
//!                            ▼
//!                     ┌──────────────┐
//!                     │ PoolRegistry │  big / fast, cached model lists
//!                     └──────┬───────┘
//!                            ▼
//!               CircuitBreaker(pool) → RetryPolicy → InferenceBackend
//! ```
//!
//! # Design Principles
//!
//! 1. **Never invent an endpoint**: an unconfigured pool is never selected
//!    silently; forcing it fails the request.
//! 2. **Failures degrade, they don't propagate**: a failed or blocked model
//!    call yields an empty answer and is recorded by its breaker.
//! 3. **Cheap before expensive**: classification reaches the LLM step only
//!    when keyword matching is inconclusive.

pub mod catalog;
pub mod classifier;
pub mod metrics;
pub mod policy;
pub mod pools;
pub mod router;

pub use catalog::{Importance, ModelCatalog, ModelSpec, PoolId, QueryType};
pub use classifier::{
    Classification, ClassificationMethod, Classifier, ClassifierConfig, ClassifierStats,
};
pub use metrics::{ModelMetricsSummary, RouterMetrics};
pub use policy::{pool_priority, RouteDecision, RouteReason};
pub use pools::{PoolConfig, PoolRegistry};
pub use router::{RouteOutcome, RouteRequest, Router, RouterConfig};
