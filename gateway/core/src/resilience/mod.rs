//! Resilience Primitives
//!
//! The three building blocks every outbound call is wrapped in:
//!
//! ```text
//!   request ──► RateLimiter::admit ──► CircuitBreaker::call ──► RetryPolicy::retry ──► HTTP
//!               (caller AND endpoint)   (per dependency)         (per call)
//! ```
//!
//! None of them hold a lock across an awaited network call.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerRegistry, BreakerStats, CircuitBreaker, CircuitState,
};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter, TokenBucket};
pub use retry::{ErrorClass, ErrorClassifier, RetryError, RetryPolicy, MAX_BACKOFF_BASE};
