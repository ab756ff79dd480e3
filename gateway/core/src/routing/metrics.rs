//! Router Metrics
//!
//! Observability for routed calls:
//! - Per-model request/success/failure counters and latency distribution
//! - Routing counters (decisions, fallbacks, ensembles)
//! - Per-query-type decision counts
//!
//! Nothing here is consulted for routing correctness.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::catalog::QueryType;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds in milliseconds
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given bucket bounds
    #[must_use]
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Buckets suited to LLM call latency
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
            120_000.0,
        ])
    }

    /// Record a value in milliseconds
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn record(&self, value: f64) {
        if self.buckets.is_empty() {
            return;
        }
        let idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len() - 1);

        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        let v = value.max(0.0) as u64;
        self.sum.fetch_add(v, Ordering::Relaxed);
        self.max.fetch_max(v, Ordering::Relaxed);
    }

    /// Approximate percentile (bucket upper bound)
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        let total = self.total_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let target = ((total as f64) * p).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;
        for (i, count) in self.counts.iter().enumerate() {
            cumulative += count.load(Ordering::Relaxed);
            if cumulative >= target {
                return self.buckets[i];
            }
        }
        self.buckets.last().copied().unwrap_or(0.0)
    }

    /// Mean of recorded values
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn mean(&self) -> f64 {
        let total = self.total_count.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Largest recorded value
    #[must_use]
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Zeroed counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Model Metrics
// ============================================================================

/// How a model call ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    /// Non-empty response
    Success,
    /// The pool answered with empty text
    Empty,
    /// The call failed after retries
    Failure,
    /// The breaker blocked the call
    Blocked,
}

/// Metrics for a single model
#[derive(Debug)]
pub struct ModelMetrics {
    /// Model name
    pub model: String,
    /// Calls attempted (including blocked ones)
    pub requests: Counter,
    /// Calls with a non-empty answer
    pub successes: Counter,
    /// Calls that failed or returned nothing
    pub failures: Counter,
    /// Calls blocked by a breaker
    pub blocked: Counter,
    /// End-to-end latency of calls that reached the pool
    pub latency: Histogram,
}

impl ModelMetrics {
    /// Zeroed metrics for `model`
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            requests: Counter::new(),
            successes: Counter::new(),
            failures: Counter::new(),
            blocked: Counter::new(),
            latency: Histogram::latency_default(),
        }
    }

    /// Fraction of requests that did not succeed
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.requests.get();
        if total == 0 {
            return 0.0;
        }
        (total - self.successes.get().min(total)) as f64 / total as f64
    }

    /// Serializable summary
    #[must_use]
    pub fn summary(&self) -> ModelMetricsSummary {
        ModelMetricsSummary {
            model: self.model.clone(),
            requests: self.requests.get(),
            successes: self.successes.get(),
            failures: self.failures.get(),
            blocked: self.blocked.get(),
            error_rate: self.error_rate(),
            latency_p50_ms: self.latency.percentile(0.5),
            latency_p99_ms: self.latency.percentile(0.99),
            latency_mean_ms: self.latency.mean(),
        }
    }
}

/// Summary of model metrics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMetricsSummary {
    /// Model name
    pub model: String,
    /// Calls attempted
    pub requests: u64,
    /// Non-empty answers
    pub successes: u64,
    /// Failed or empty answers
    pub failures: u64,
    /// Breaker-blocked calls
    pub blocked: u64,
    /// Non-success fraction
    pub error_rate: f64,
    /// Approximate median latency
    pub latency_p50_ms: f64,
    /// Approximate p99 latency
    pub latency_p99_ms: f64,
    /// Mean latency
    pub latency_mean_ms: f64,
}

// ============================================================================
// Router Metrics
// ============================================================================

/// Centralized metrics for the router
#[derive(Debug)]
pub struct RouterMetrics {
    models: DashMap<String, Arc<ModelMetrics>>,
    query_types: DashMap<QueryType, Arc<Counter>>,
    /// Decisions made
    pub total_routed: Counter,
    /// Decisions that used the forced ultimate fallback
    pub total_fallbacks: Counter,
    /// Critical-importance ensembles run
    pub total_ensembles: Counter,
    started_at: Instant,
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterMetrics {
    /// Create a new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            models: DashMap::new(),
            query_types: DashMap::new(),
            total_routed: Counter::new(),
            total_fallbacks: Counter::new(),
            total_ensembles: Counter::new(),
            started_at: Instant::now(),
        }
    }

    /// Get or create metrics for a model
    pub fn model(&self, model: &str) -> Arc<ModelMetrics> {
        if let Some(m) = self.models.get(model) {
            return Arc::clone(m.value());
        }
        self.models
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(ModelMetrics::new(model)))
            .clone()
    }

    /// Record one model call
    #[allow(clippy::cast_precision_loss)]
    pub fn record_call(&self, model: &str, outcome: CallOutcome, elapsed: Duration) {
        let m = self.model(model);
        m.requests.inc();
        match outcome {
            CallOutcome::Success => m.successes.inc(),
            CallOutcome::Empty | CallOutcome::Failure => m.failures.inc(),
            CallOutcome::Blocked => {
                m.blocked.inc();
                return;
            }
        }
        m.latency.record(elapsed.as_millis() as f64);
    }

    /// Record a routing decision
    pub fn record_decision(&self, query_type: QueryType, fallback: bool) {
        self.total_routed.inc();
        if fallback {
            self.total_fallbacks.inc();
        }
        self.query_types
            .entry(query_type)
            .or_insert_with(|| Arc::new(Counter::new()))
            .inc();
    }

    /// Summaries for every model, keyed by name
    #[must_use]
    pub fn model_summaries(&self) -> BTreeMap<String, ModelMetricsSummary> {
        self.models
            .iter()
            .map(|m| (m.key().clone(), m.value().summary()))
            .collect()
    }

    /// Decision counts per query type
    #[must_use]
    pub fn query_type_counts(&self) -> BTreeMap<QueryType, u64> {
        self.query_types
            .iter()
            .map(|c| (*c.key(), c.value().get()))
            .collect()
    }

    /// Time since the collector was created
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_percentiles() {
        let h = Histogram::new(vec![10.0, 100.0, 1000.0]);
        for _ in 0..9 {
            h.record(5.0);
        }
        h.record(500.0);
        assert_eq!(h.percentile(0.5), 10.0);
        assert_eq!(h.percentile(0.99), 1000.0);
        assert_eq!(h.max(), 500);
        assert!((h.mean() - 54.5).abs() < 0.01);
    }

    #[test]
    fn test_empty_histogram() {
        let h = Histogram::latency_default();
        assert_eq!(h.percentile(0.9), 0.0);
        assert_eq!(h.mean(), 0.0);
    }

    #[test]
    fn test_record_call_outcomes() {
        let metrics = RouterMetrics::new();
        metrics.record_call("llama3.2:3b", CallOutcome::Success, Duration::from_millis(40));
        metrics.record_call("llama3.2:3b", CallOutcome::Empty, Duration::from_millis(40));
        metrics.record_call("llama3.2:3b", CallOutcome::Blocked, Duration::ZERO);

        let summary = &metrics.model_summaries()["llama3.2:3b"];
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.blocked, 1);
        assert!((summary.error_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_decision_counts() {
        let metrics = RouterMetrics::new();
        metrics.record_decision(QueryType::Code, false);
        metrics.record_decision(QueryType::Code, true);
        metrics.record_decision(QueryType::Summary, false);
        assert_eq!(metrics.total_routed.get(), 3);
        assert_eq!(metrics.total_fallbacks.get(), 1);
        assert_eq!(metrics.query_type_counts()[&QueryType::Code], 2);
    }
}
