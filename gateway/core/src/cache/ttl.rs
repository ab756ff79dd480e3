//! TTL policy: how long an answer stays valid, derived from the query.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::text;

const TIME_SENSITIVE: &[&str] = &[
    "today", "now", "right now", "latest", "current", "currently", "weather", "news",
    "price", "tonight", "this week", "score",
];

const DURABLE: &[&str] = &[
    "what is", "what are", "define", "definition", "explain", "how does", "meaning of",
    "calculate", "solve", "equation", "formula", "theorem", "math",
];

/// TTL bucket of a query
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlTier {
    /// Time-sensitive answers (minutes)
    Short,
    /// Everything else (an hour)
    Medium,
    /// Definitions, explanations, math (a day)
    Long,
}

/// TTL per tier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// TTL of time-sensitive answers
    pub short: Duration,
    /// Default TTL
    pub medium: Duration,
    /// TTL of explanatory and mathematical answers
    pub long: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(300),
            medium: Duration::from_secs(3600),
            long: Duration::from_secs(86_400),
        }
    }
}

impl TtlPolicy {
    /// Tier of `query`; time-sensitive terms win over durable ones
    #[must_use]
    pub fn tier(&self, query: &str) -> TtlTier {
        let normalized = text::normalize(query);
        if TIME_SENSITIVE.iter().any(|t| text::contains_term(&normalized, t)) {
            TtlTier::Short
        } else if DURABLE.iter().any(|t| text::contains_term(&normalized, t)) {
            TtlTier::Long
        } else {
            TtlTier::Medium
        }
    }

    /// TTL of a tier
    #[must_use]
    pub fn ttl(&self, tier: TtlTier) -> Duration {
        match tier {
            TtlTier::Short => self.short,
            TtlTier::Medium => self.medium,
            TtlTier::Long => self.long,
        }
    }

    /// TTL for `query`
    #[must_use]
    pub fn ttl_for(&self, query: &str) -> Duration {
        self.ttl(self.tier(query))
    }
}
