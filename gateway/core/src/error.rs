//! Error Types
//!
//! Every failure of an external dependency (inference pool, embedding
//! service, vector store) is converted into one of these kinds at its call
//! site, before it crosses a component boundary. Only [`GatewayError`] is
//! returned from the public facade.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::routing::catalog::PoolId;

/// Failure taxonomy of the gateway core
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The rate limiter denied the request. Never retried.
    #[error("request from '{caller}' to '{endpoint}' rejected by rate limiter")]
    AdmissionRejected {
        /// Caller identity
        caller: String,
        /// Logical endpoint
        endpoint: String,
    },

    /// A circuit breaker short-circuited the call
    #[error("circuit breaker '{name}' is open")]
    BreakerOpen {
        /// Breaker (dependency) name
        name: String,
    },

    /// Network, timeout or 5xx failure that survived every retry
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// 4xx (other than 429) or otherwise unrecoverable backend failure
    #[error("permanent backend error: {0}")]
    PermanentBackend(String),

    /// A classifier step failed; classification continues with the next step
    #[error("classification step failed: {0}")]
    ClassificationFallback(String),

    /// No candidate or pool default was available
    #[error("routing exhausted: {0}")]
    RoutingExhausted(String),

    /// A cache backend failed; treated as a miss
    #[error("cache backend error: {0}")]
    CacheBackend(String),

    /// A pool without a configured URL was explicitly requested
    #[error("pool '{0}' has no configured URL")]
    PoolNotConfigured(PoolId),

    /// Configuration could not be loaded or validated
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GatewayError {
    /// Short machine-readable kind, used in logs and socket replies
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AdmissionRejected { .. } => "admission_rejected",
            Self::BreakerOpen { .. } => "breaker_open",
            Self::TransientBackend(_) => "transient_backend",
            Self::PermanentBackend(_) => "permanent_backend",
            Self::ClassificationFallback(_) => "classification_fallback",
            Self::RoutingExhausted(_) => "routing_exhausted",
            Self::CacheBackend(_) => "cache_backend",
            Self::PoolNotConfigured(_) => "pool_not_configured",
            Self::Config(_) => "config",
        }
    }
}

/// Errors raised by HTTP clients of inference pools and cache backends
///
/// The rendered message carries the HTTP status or the words "timeout" /
/// "connection" so that [`crate::resilience::retry::ErrorClassifier`] can
/// sort it into transient or permanent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request did not complete within its timeout
    #[error("request timeout after {0:?}")]
    Timeout(Duration),

    /// The endpoint could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// The endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// The response body did not have the expected shape
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Any other client-side failure
    #[error("request failed: {0}")]
    Request(String),
}

impl BackendError {
    /// Convert a reqwest error, keeping the timeout/connection distinction
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Convenience alias for gateway results
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_messages_carry_classification_hints() {
        let timeout = BackendError::Timeout(Duration::from_secs(2));
        assert!(timeout.to_string().contains("timeout"));

        let conn = BackendError::Connection("refused".into());
        assert!(conn.to_string().contains("connection"));

        let status = BackendError::Status {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(status.to_string(), "HTTP 503: busy");
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::PoolNotConfigured(PoolId::Fast);
        assert_eq!(err.to_string(), "pool 'fast' has no configured URL");
        assert_eq!(err.kind(), "pool_not_configured");

        let err = GatewayError::AdmissionRejected {
            caller: "alice".into(),
            endpoint: "route".into(),
        };
        assert!(err.to_string().contains("alice"));
    }
}
