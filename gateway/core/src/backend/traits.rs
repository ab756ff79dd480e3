//! Inference Backend Traits
//!
//! Trait definitions for inference pools. The router only ever talks to an
//! `InferenceBackend`; the concrete HTTP client lives in `ollama.rs` and
//! tests substitute an in-process mock.
//!
//! A backend answers two questions:
//! - generate a completion for a prompt on a named model
//! - list the models it currently has loaded

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// A single non-streaming generate call
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    /// The user prompt
    pub prompt: String,
    /// Model to use (pool-specific identifier)
    pub model: String,
    /// Maximum tokens in response (`num_predict`, 0 = backend default)
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// System prompt, placed before everything else
    pub system: Option<String>,
    /// Prior context (memory/RAG text), placed between system and prompt
    pub context: Option<String>,
    /// How long the pool should keep the model loaded (e.g. "10m", "-1")
    pub keep_alive: Option<String>,
    /// Per-request timeout, overriding the client default
    pub timeout: Option<Duration>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: String::new(),
            max_tokens: 0,
            temperature: 0.7,
            system: None,
            context: None,
            keep_alive: None,
            timeout: None,
        }
    }
}

impl LlmRequest {
    /// Create a new request with prompt and model
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set prior context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set keep-alive policy
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Option<String>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Flatten system prompt, context and prompt into a single prompt string
    #[must_use]
    pub fn full_prompt(&self) -> String {
        let mut full = String::new();

        if let Some(system) = self.system.as_deref().filter(|s| !s.is_empty()) {
            full.push_str(system);
            full.push_str("\n\n");
        }

        if let Some(context) = self.context.as_deref().filter(|c| !c.is_empty()) {
            full.push_str(context);
            full.push('\n');
        }

        full.push_str(&self.prompt);
        full
    }
}

/// Completed response from a backend
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmResponse {
    /// Generated text
    pub content: String,
    /// Model that produced it
    pub model: String,
    /// Tokens generated, if reported
    pub tokens_used: Option<u32>,
    /// Backend-reported generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// A model loaded on a pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name, usually tagged (`llama3.2:3b`)
    pub name: String,
    /// Size on disk in bytes
    #[serde(default)]
    pub size: Option<u64>,
}

/// Client for one inference pool
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Base URL the backend talks to
    fn base_url(&self) -> &str;

    /// Run a non-streaming completion
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, BackendError>;

    /// List models currently available on the pool
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;

    /// Whether the pool answers at all
    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }
}
