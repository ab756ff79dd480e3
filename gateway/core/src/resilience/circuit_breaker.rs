//! Circuit Breaker
//!
//! One breaker per named external dependency (each inference pool, the
//! cache's remote backend). Breakers stop the gateway from hammering a
//! dependency that keeps failing and let a single trial through once a
//! cooldown has passed.
//!
//! ```text
//! +--------+   failure_threshold   +-------+        timeout         +-----------+
//! | Closed | --------------------> | Open  | ---------------------> | Half-Open |
//! +--------+                       +-------+                        +-----------+
//!     ^                                ^                                  |
//!     |                                |           1 failure              |
//!     |                                +----------------------------------+
//!     |           success_threshold consecutive trial successes           |
//!     +-------------------------------------------------------------------+
//! ```
//!
//! - **Closed**: calls pass through; failures are counted
//! - **Open**: calls are blocked without touching the dependency
//! - **Half-Open**: one trial at a time; concurrent callers are blocked
//!
//! # Thread Safety
//!
//! State lives behind a short `parking_lot` mutex that is never held across
//! the awaited call. Cumulative counters are atomics. The
//! [`BreakerRegistry`] hands out `Arc<CircuitBreaker>` from a `DashMap`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================================================
// Circuit Breaker State
// ============================================================================

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed (normal operation)
    #[default]
    Closed,

    /// Circuit is open (rejecting requests)
    Open,

    /// Circuit is half-open (testing recovery)
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Thresholds for a breaker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open trial successes that close it again
    pub success_threshold: u32,

    /// How long the circuit stays open before a trial is allowed
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n.max(1);
        self
    }

    /// Set the half-open success threshold
    #[must_use]
    pub fn with_success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n.max(1);
        self
    }

    /// Set the open-state timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Outcome of a failed [`CircuitBreaker::call`]
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker blocked the call; the dependency was not touched
    Open {
        /// Breaker name
        name: String,
    },
    /// The call ran and failed
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the breaker itself blocked the call
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { name } => write!(f, "circuit breaker '{name}' is open"),
            Self::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Point-in-time view of a breaker, for stats
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStats {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures
    pub failure_count: u32,
    /// Calls that reached the dependency
    pub total_calls: u64,
    /// Calls that reached the dependency and failed
    pub failed_calls: u64,
    /// Calls blocked by the breaker
    pub blocked_calls: u64,
}

/// Per-dependency failure isolation
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    blocked_calls: AtomicU64,
}

/// Admission ticket for one call; releases the half-open trial slot if the
/// call future is dropped before completing.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
            total_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            blocked_calls: AtomicU64::new(0),
        }
    }

    /// Breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state (without triggering the open → half-open transition)
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `f` under the breaker
    ///
    /// Blocked calls never invoke `f`. The original error is returned as
    /// [`BreakerError::Inner`] after bookkeeping.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.acquire().ok_or_else(|| BreakerError::Open {
            name: self.name.clone(),
        })?;

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let result = f().await;
        permit.settled = true;

        match result {
            Ok(value) => {
                self.on_success(permit.trial);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(permit.trial);
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(self.config.timeout, |t| Instant::now().saturating_duration_since(t));
                if elapsed < self.config.timeout {
                    drop(inner);
                    self.blocked_calls.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(breaker = %self.name, "Call blocked by open circuit");
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                inner.trial_in_flight = true;
                tracing::info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    drop(inner);
                    self.blocked_calls.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(breaker = %self.name, "Trial call already in flight, call blocked");
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Some(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        if trial {
            inner.trial_in_flight = false;
        }
        if trial && inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.half_open_successes = 0;
                tracing::info!(breaker = %self.name, "Circuit breaker closed, dependency recovered");
            }
        }
    }

    fn on_failure(&self, trial: bool) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        if trial {
            inner.trial_in_flight = false;
        }

        let reopen = inner.state == CircuitState::HalfOpen;
        if reopen || inner.failure_count >= self.config.failure_threshold {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    from = %inner.state,
                    "Circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
            inner.half_open_successes = 0;
        }
    }

    /// Force the breaker back to closed with zeroed counters
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::default();
    }

    /// Snapshot for stats
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            blocked_calls: self.blocked_calls.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Named breakers, created on first use
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
}

impl BreakerRegistry {
    /// Registry whose lazily created breakers use `default_config`
    #[must_use]
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Get the breaker for `name`, creating it with the default thresholds
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone())
    }

    /// Get the breaker for `name`, creating it with `config` on first use
    ///
    /// An existing breaker keeps its original thresholds.
    pub fn get_or_create_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    /// Existing breaker, if any
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Stats of every breaker, sorted by name
    #[must_use]
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Number of breakers
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn breaker(success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "pool:big",
            BreakerConfig::default()
                .with_failure_threshold(3)
                .with_success_threshold(success_threshold)
                .with_timeout(Duration::from_secs(10)),
        )
    }

    async fn fail(b: &CircuitBreaker, calls: &AtomicUsize) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom")
        })
        .await
    }

    async fn succeed(b: &CircuitBreaker, calls: &AtomicUsize) -> Result<u32, BreakerError<&'static str>> {
        b.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &'static str>(7)
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_blocks() {
        let b = breaker(2);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&b, &calls).await, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(b.state(), CircuitState::Open);

        // Blocked without invoking the closure
        let err = succeed(&b, &calls).await.unwrap_err();
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = b.stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.failed_calls, 3);
        assert_eq!(stats.blocked_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close_circuit() {
        let b = breaker(2);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(succeed(&b, &calls).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&b, &calls).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_resets_timer() {
        let b = breaker(2);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(matches!(fail(&b, &calls).await, Err(BreakerError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);

        // Timer restarted from the trial failure
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(succeed(&b, &calls).await.unwrap_err().is_open());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(succeed(&b, &calls).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_in_half_open() {
        let b = Arc::new(breaker(1));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = Arc::clone(&b);
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async move {
                    let _ = rx.await;
                    Ok::<_, &'static str>(1)
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        // Second caller is blocked while the trial is outstanding
        assert!(succeed(&b, &calls).await.unwrap_err().is_open());

        let _ = tx.send(());
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let b = breaker(1);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let pending = b.call(|| std::future::pending::<Result<(), &'static str>>());
        let timed = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed.is_err());

        assert!(succeed(&b, &calls).await.is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count_in_closed() {
        let b = breaker(1);
        let calls = AtomicUsize::new(0);
        let _ = fail(&b, &calls).await;
        let _ = fail(&b, &calls).await;
        let _ = succeed(&b, &calls).await;
        let _ = fail(&b, &calls).await;
        let _ = fail(&b, &calls).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_reuses_instances() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.get_or_create("pool:fast");
        let b = registry.get_or_create_with(
            "pool:fast",
            BreakerConfig::default().with_failure_threshold(99),
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().failure_threshold, 3);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("cache").is_none());

        registry.get_or_create("cache");
        let names: Vec<_> = registry.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["cache".to_string(), "pool:fast".to_string()]);
    }
}
