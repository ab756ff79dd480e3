//! Retry with Exponential Backoff
//!
//! [`RetryPolicy`] wraps a single outbound call. Errors are sorted by
//! [`ErrorClassifier`]: permanent ones are returned at once, transient ones
//! are retried after a growing, optionally jittered delay.
//!
//! Unrecognised errors count as transient. That keeps retries optimistic at
//! the cost of sometimes retrying a failure that will never succeed.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================================================
// Error Classification
// ============================================================================

/// Retry class of an error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Worth retrying (network, timeout, 5xx, 429)
    Transient,
    /// Retrying cannot help (4xx other than 429, syntax errors)
    Permanent,
}

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "500",
    "502",
    "503",
    "504",
    "429",
    "unavailable",
    "temporarily",
];

const PERMANENT_MARKERS: &[&str] = &[
    "404",
    "401",
    "403",
    "400",
    "not found",
    "unauthorized",
    "forbidden",
    "syntax error",
];

/// Substring classifier over an error's rendered message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassifier {
    transient: Vec<String>,
    permanent: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            transient: TRANSIENT_MARKERS.iter().map(ToString::to_string).collect(),
            permanent: PERMANENT_MARKERS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl ErrorClassifier {
    /// Classify an error by its message; transient markers win ties
    ///
    /// An `HTTP <status>` prefix decides on its own, so a 4xx whose body
    /// mentions "connection" or "500" is still permanent.
    pub fn classify(&self, err: &dyn fmt::Display) -> ErrorClass {
        let message = err.to_string().to_lowercase();
        if let Some(status) = http_status(&message) {
            return match status {
                429 | 500..=599 => ErrorClass::Transient,
                400..=499 => ErrorClass::Permanent,
                _ => ErrorClass::Transient,
            };
        }
        if self.transient.iter().any(|m| message.contains(m.as_str())) {
            ErrorClass::Transient
        } else if self.permanent.iter().any(|m| message.contains(m.as_str())) {
            ErrorClass::Permanent
        } else {
            ErrorClass::Transient
        }
    }

    /// Add an extra permanent marker
    #[must_use]
    pub fn with_permanent(mut self, marker: &str) -> Self {
        self.permanent.push(marker.to_lowercase());
        self
    }
}

/// Status code of a message rendered as `HTTP <status>...`
fn http_status(message: &str) -> Option<u16> {
    let rest = message.trim_start().strip_prefix("http ")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.len() == 3 {
        digits.parse().ok()
    } else {
        None
    }
}

/// Upper bound accepted for [`RetryPolicy::base`]
pub const MAX_BACKOFF_BASE: f64 = 10.0;

// ============================================================================
// Retry Policy
// ============================================================================

/// Failure of [`RetryPolicy::retry_within`]
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last attempt failed and no further attempt was made
    Failed(E),
    /// The wall-clock budget would be exceeded by another attempt
    DeadlineExceeded {
        /// Attempts made
        attempts: u32,
        /// The budget that ran out
        budget: Duration,
        /// Error of the last completed attempt, if any completed
        last_error: Option<E>,
    },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => e.fmt(f),
            Self::DeadlineExceeded {
                attempts, budget, ..
            } => write!(
                f,
                "retry budget of {budget:?} exceeded after {attempts} attempt(s)"
            ),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Bounded exponential backoff
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub base: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.0]`
    pub jitter: bool,
    /// Transient/permanent classification
    #[serde(skip)]
    pub classifier: ErrorClassifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            base: 2.0,
            jitter: true,
            classifier: ErrorClassifier::default(),
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the attempt limit
    #[must_use]
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    #[must_use]
    pub fn with_base(mut self, base: f64) -> Self {
        self.base = base;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let base = if self.base.is_finite() {
            self.base.max(1.0)
        } else {
            MAX_BACKOFF_BASE
        };
        Duration::try_from_secs_f64(delay.as_secs_f64() * base)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `f` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// Returns the last error once attempts are exhausted.
    pub async fn retry<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut delay = self.initial_delay.min(self.max_delay);
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if self.classifier.classify(&e) == ErrorClass::Permanent {
                        tracing::debug!(attempt, error = %e, "Permanent error, not retrying");
                        return Err(e);
                    }
                    if attempt >= self.max_attempts {
                        tracing::warn!(attempt, error = %e, "Retry attempts exhausted");
                        return Err(e);
                    }

                    let backoff = self.jittered(delay);
                    tracing::debug!(attempt, ?backoff, error = %e, "Transient error, retrying");
                    tokio::time::sleep(backoff).await;

                    // Exponential backoff: delay * base, capped at max_delay
                    delay = self.next_delay(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Retry transient failures until a wall-clock `budget` runs out
    ///
    /// Fails with [`RetryError::DeadlineExceeded`] as soon as the next
    /// backoff would cross the deadline, instead of starting an attempt that
    /// cannot finish in time. Attempts in flight at the deadline are cut off.
    pub async fn retry_within<F, Fut, T, E>(
        &self,
        budget: Duration,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let deadline = Instant::now() + budget;
        let mut delay = self.initial_delay.min(self.max_delay);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout_at(deadline, f()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(RetryError::DeadlineExceeded {
                        attempts,
                        budget,
                        last_error: None,
                    })
                }
            };

            let e = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if self.classifier.classify(&e) == ErrorClass::Permanent {
                return Err(RetryError::Failed(e));
            }

            let backoff = self.jittered(delay);
            if Instant::now() + backoff >= deadline {
                tracing::warn!(attempts, ?budget, error = %e, "Retry budget exhausted");
                return Err(RetryError::DeadlineExceeded {
                    attempts,
                    budget,
                    last_error: Some(e),
                });
            }
            // Budgeted backoff: sleep, then grow delay by base (retry attempt loop)
            tokio::time::sleep(backoff).await;
            delay = self.next_delay(delay);
        }
    }
}
