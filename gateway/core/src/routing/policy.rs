//! Routing Policy
//!
//! Pool-priority rules and the [`RouteDecision`] record produced for every
//! resolved call.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::catalog::{Importance, PoolId, QueryType};

// ============================================================================
// Pool Priority
// ============================================================================

/// Order in which pools are tried
///
/// Fast importance or a fast-lane query type tries the fast pool first;
/// everything else starts on the big pool.
#[must_use]
pub fn pool_priority(query_type: QueryType, importance: Importance) -> [PoolId; 2] {
    if importance == Importance::Fast || query_type.is_fast_lane() {
        [PoolId::Fast, PoolId::Big]
    } else {
        [PoolId::Big, PoolId::Fast]
    }
}

// ============================================================================
// Route Decisions
// ============================================================================

/// Why a model was chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// Highest-weight available candidate
    BestCandidate,
    /// Smallest available candidate
    FastestCandidate,
    /// One of several ensemble members
    EnsembleMember,
    /// Synthesis pass over ensemble answers
    EnsembleSynthesis,
    /// No candidate was available; the pool's default was
    PoolDefault,
    /// Nothing was available; the big pool's default was forced
    UltimateFallback,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BestCandidate => "best available candidate",
            Self::FastestCandidate => "smallest available candidate",
            Self::EnsembleMember => "ensemble member",
            Self::EnsembleSynthesis => "ensemble synthesis",
            Self::PoolDefault => "pool default model",
            Self::UltimateFallback => "forced big-pool default",
        };
        f.write_str(s)
    }
}

/// Outcome of routing one call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Model to call
    pub model: String,
    /// Pool to call it on
    pub pool: PoolId,
    /// Resolved endpoint; `None` only for a forced fallback to an
    /// unconfigured pool, which fails when executed
    pub url: Option<String>,
    /// Why this model
    pub reason: RouteReason,
    /// Query type the decision was made for
    pub query_type: QueryType,
    /// Classifier confidence
    pub confidence: f32,
    /// Whether the forced ultimate fallback was used
    pub fallback: bool,
    /// Keep-alive policy for the call
    #[serde(default)]
    pub keep_alive: Option<String>,
}

impl RouteDecision {
    /// Human-readable one-line description
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{} on {} pool ({}; {} @ {:.2}{})",
            self.model,
            self.pool,
            self.reason,
            self.query_type,
            self.confidence,
            if self.fallback { ", fallback" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_priority() {
        assert_eq!(
            pool_priority(QueryType::Code, Importance::Normal),
            [PoolId::Big, PoolId::Fast]
        );
        assert_eq!(
            pool_priority(QueryType::Code, Importance::Fast),
            [PoolId::Fast, PoolId::Big]
        );
        assert_eq!(
            pool_priority(QueryType::Secretary, Importance::Normal),
            [PoolId::Fast, PoolId::Big]
        );
        assert_eq!(
            pool_priority(QueryType::Summary, Importance::Critical),
            [PoolId::Fast, PoolId::Big]
        );
    }

    #[test]
    fn test_describe() {
        let decision = RouteDecision {
            model: "llama3.2:3b".into(),
            pool: PoolId::Fast,
            url: Some("http://fast:11434".into()),
            reason: RouteReason::BestCandidate,
            query_type: QueryType::Secretary,
            confidence: 0.85,
            fallback: false,
            keep_alive: None,
        };
        assert_eq!(
            decision.describe(),
            "llama3.2:3b on fast pool (best available candidate; secretary @ 0.85)"
        );
    }
}
