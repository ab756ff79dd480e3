//! Token-Bucket Admission Control
//!
//! Every request consults two buckets: one keyed by the caller identity and
//! one keyed by the logical endpoint. Both must hold enough tokens for the
//! request to be admitted (AND semantics); when either is short, neither is
//! drained.
//!
//! # Design
//!
//! - Buckets are created lazily on first use
//! - Tokens are fractional and always stay in `[0, capacity]`
//! - Refill is computed from elapsed monotonic time and never goes negative
//! - Each bucket sits behind its own short mutex; distinct keys never contend
//! - The caller map is capped; full buckets are dropped first since a fresh
//!   bucket is indistinguishable from a full one
//!
//! # Usage
//!
//! ```
//! use gateway_core::resilience::rate_limit::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::new()
//!         .with_caller_capacity(5)
//!         .with_endpoint_capacity(100),
//! );
//! assert!(limiter.admit("alice", "route").is_ok());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

// =============================================================================
// Configuration
// =============================================================================

/// Default cap on live per-caller buckets
pub const DEFAULT_MAX_CALLERS: usize = 10_000;

/// Configuration for caller and endpoint buckets
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether admission control is active (disabled admits everything)
    pub enabled: bool,

    /// Burst size of each per-caller bucket
    pub caller_capacity: u32,

    /// Tokens per second added to each per-caller bucket
    pub caller_refill_per_sec: f64,

    /// Burst size of each per-endpoint bucket
    pub endpoint_capacity: u32,

    /// Tokens per second added to each per-endpoint bucket
    pub endpoint_refill_per_sec: f64,

    /// Upper bound on live per-caller buckets
    pub max_callers: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            caller_capacity: 20,
            caller_refill_per_sec: 2.0,
            endpoint_capacity: 200,
            endpoint_refill_per_sec: 50.0,
            max_callers: DEFAULT_MAX_CALLERS,
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-caller burst size
    #[must_use]
    pub fn with_caller_capacity(mut self, capacity: u32) -> Self {
        self.caller_capacity = capacity;
        self
    }

    /// Set the per-caller refill rate
    #[must_use]
    pub fn with_caller_refill(mut self, per_sec: f64) -> Self {
        self.caller_refill_per_sec = per_sec;
        self
    }

    /// Set the per-endpoint burst size
    #[must_use]
    pub fn with_endpoint_capacity(mut self, capacity: u32) -> Self {
        self.endpoint_capacity = capacity;
        self
    }

    /// Set the per-endpoint refill rate
    #[must_use]
    pub fn with_endpoint_refill(mut self, per_sec: f64) -> Self {
        self.endpoint_refill_per_sec = per_sec;
        self
    }

    /// Set the cap on live per-caller buckets
    #[must_use]
    pub fn with_max_callers(mut self, max: usize) -> Self {
        self.max_callers = max.max(1);
        self
    }

    /// Create a disabled configuration (for testing)
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Which bucket denied a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketScope {
    /// The per-caller bucket
    Caller,
    /// The per-endpoint bucket
    Endpoint,
}

impl std::fmt::Display for BucketScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Caller => write!(f, "caller"),
            Self::Endpoint => write!(f, "endpoint"),
        }
    }
}

/// Errors related to rate limiting
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// One of the two buckets did not hold enough tokens
    #[error("rate limit exceeded for {scope} bucket (caller '{caller}', endpoint '{endpoint}')")]
    Exhausted {
        /// The bucket that ran dry
        scope: BucketScope,
        /// Caller identity of the request
        caller: String,
        /// Endpoint of the request
        endpoint: String,
    },
}

// =============================================================================
// Token Bucket
// =============================================================================

/// A single token bucket
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Add tokens for the time elapsed since the last refill
    ///
    /// A clock that appears to go backwards adds nothing.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let added = elapsed.as_secs_f64() * self.refill_per_sec;
        self.tokens = (self.tokens + added).clamp(0.0, self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Whether `n` tokens are available right now (after refill)
    #[must_use]
    pub fn has(&self, n: u32) -> bool {
        let n = f64::from(n);
        n <= self.capacity && self.tokens >= n
    }

    /// Take `n` tokens if available; leaves the bucket unchanged otherwise
    pub fn try_take(&mut self, n: u32) -> bool {
        if !self.has(n) {
            return false;
        }
        self.tokens = (self.tokens - f64::from(n)).max(0.0);
        true
    }

    /// Refill, then take `n` tokens if available
    pub fn consume(&mut self, n: u32) -> bool {
        self.refill(Instant::now());
        self.try_take(n)
    }

    /// Current (fractional) token count
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Bucket capacity
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Whether the bucket has refilled to capacity
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tokens >= self.capacity
    }
}

// =============================================================================
// Keyed Rate Limiter
// =============================================================================

type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Caller + endpoint admission control
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    callers: DashMap<String, SharedBucket>,
    endpoints: DashMap<String, SharedBucket>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with no buckets yet
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            callers: DashMap::new(),
            endpoints: DashMap::new(),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn caller_bucket(&self, caller: &str) -> SharedBucket {
        if let Some(bucket) = self.callers.get(caller) {
            return Arc::clone(&bucket);
        }
        if self.callers.len() >= self.config.max_callers {
            self.prune_callers();
        }
        // Clone the Arc out so the shard lock is released before the bucket lock
        self.callers
            .entry(caller.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.config.caller_capacity,
                    self.config.caller_refill_per_sec,
                )))
            })
            .clone()
    }

    /// Shrink the caller map to three quarters of its cap
    ///
    /// Full buckets go first. If that is not enough, the buckets holding the
    /// most tokens are dropped next. Buckets locked by an in-flight admission
    /// are kept.
    fn prune_callers(&self) {
        let target = self.config.max_callers.saturating_mul(3) / 4;
        let now = Instant::now();
        self.callers.retain(|_, bucket| match bucket.try_lock() {
            Some(mut b) => {
                b.refill(now);
                !b.is_full()
            }
            None => true,
        });

        let excess = self.callers.len().saturating_sub(target);
        if excess > 0 {
            let mut fullest: Vec<(String, f64)> = self
                .callers
                .iter()
                .filter_map(|entry| {
                    let tokens = entry.value().try_lock()?.tokens();
                    Some((entry.key().clone(), tokens))
                })
                .collect();
            fullest.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (key, _) in fullest.into_iter().take(excess) {
                self.callers.remove(&key);
            }
        }

        tracing::debug!(
            remaining = self.callers.len(),
            max = self.config.max_callers,
            "Pruned idle caller buckets"
        );
    }

    fn endpoint_bucket(&self, endpoint: &str) -> SharedBucket {
        self.endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.config.endpoint_capacity,
                    self.config.endpoint_refill_per_sec,
                )))
            })
            .clone()
    }

    /// Consume `n` tokens from the caller bucket for `key` only
    pub fn consume(&self, key: &str, n: u32) -> bool {
        if !self.config.enabled {
            return true;
        }
        let bucket = self.caller_bucket(key);
        let ok = bucket.lock().consume(n);
        ok
    }

    /// Admit one request from `caller` to `endpoint`
    ///
    /// Both buckets must pass; on rejection neither bucket is drained.
    pub fn admit(&self, caller: &str, endpoint: &str) -> Result<(), RateLimitError> {
        self.admit_n(caller, endpoint, 1)
    }

    /// Admit a request costing `n` tokens from both buckets
    pub fn admit_n(&self, caller: &str, endpoint: &str, n: u32) -> Result<(), RateLimitError> {
        if !self.config.enabled {
            self.admitted.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let endpoint_bucket = self.endpoint_bucket(endpoint);
        let caller_bucket = self.caller_bucket(caller);

        // Lock order is always endpoint then caller
        let mut ep = endpoint_bucket.lock();
        let mut cl = caller_bucket.lock();
        let now = Instant::now();
        ep.refill(now);
        cl.refill(now);

        let denied = if !ep.has(n) {
            Some(BucketScope::Endpoint)
        } else if !cl.has(n) {
            Some(BucketScope::Caller)
        } else {
            None
        };

        if let Some(scope) = denied {
            drop(cl);
            drop(ep);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(caller, endpoint, %scope, "Request rejected by rate limiter");
            return Err(RateLimitError::Exhausted {
                scope,
                caller: caller.to_string(),
                endpoint: endpoint.to_string(),
            });
        }

        ep.try_take(n);
        cl.try_take(n);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Current tokens in the caller bucket, if it exists
    #[must_use]
    pub fn caller_tokens(&self, caller: &str) -> Option<f64> {
        self.callers.get(caller).map(|b| b.lock().tokens())
    }

    /// Current tokens in the endpoint bucket, if it exists
    #[must_use]
    pub fn endpoint_tokens(&self, endpoint: &str) -> Option<f64> {
        self.endpoints.get(endpoint).map(|b| b.lock().tokens())
    }

    /// Total admitted requests
    #[must_use]
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Total rejected requests
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Number of live caller buckets
    #[must_use]
    pub fn caller_count(&self) -> usize {
        self.callers.len()
    }
}
