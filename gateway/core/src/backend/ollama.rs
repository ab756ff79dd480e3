//! Ollama Backend Implementation
//!
//! HTTP client for one Ollama pool.
//!
//! # Ollama API
//!
//! - `/api/generate` - batch completions (`stream: false`)
//! - `/api/tags` - list loaded models
//! - `/api/embeddings` - embedding vectors, used by the semantic cache

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{InferenceBackend, LlmRequest, LlmResponse, ModelInfo};
use crate::error::BackendError;

/// Default request timeout for generate calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Deserialize)]
struct GenerateBody {
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
    /// Nanoseconds
    #[serde(default)]
    total_duration: Option<u64>,
}

#[derive(Deserialize)]
struct TagsBody {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct EmbeddingBody {
    embedding: Vec<f32>,
}

/// Ollama pool client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Pool name, used in logs
    name: String,
    /// Base URL without trailing slash
    base_url: String,
    /// Default timeout for requests that carry none
    timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a client for `base_url`
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build tuned HTTP client, using defaults");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(512);
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Fetch an embedding vector for `text` using `model`
    pub async fn embed(
        &self,
        model: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<f32>, BackendError> {
        let response = self
            .http_client
            .post(self.url("/api/embeddings"))
            .timeout(timeout)
            .json(&serde_json::json!({ "model": model, "prompt": text }))
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, timeout))?;

        let body: EmbeddingBody = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, timeout))?;

        if body.embedding.is_empty() {
            return Err(BackendError::Decode("empty embedding".into()));
        }
        Ok(body.embedding)
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, BackendError> {
        let timeout = request.timeout.unwrap_or(self.timeout);

        let mut options = serde_json::json!({ "temperature": request.temperature });
        if request.max_tokens > 0 {
            options["num_predict"] = serde_json::json!(request.max_tokens);
        }
        let mut body = serde_json::json!({
            "model": request.model,
            "prompt": request.full_prompt(),
            "stream": false,
            "options": options,
        });
        if let Some(keep_alive) = &request.keep_alive {
            body["keep_alive"] = serde_json::json!(keep_alive);
        }

        tracing::debug!(pool = %self.name, model = %request.model, "Sending generate request");

        let response = self
            .http_client
            .post(self.url("/api/generate"))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, timeout))?;

        let parsed: GenerateBody = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, timeout))?;

        Ok(LlmResponse {
            content: parsed.response,
            model: request.model.clone(),
            tokens_used: parsed.eval_count,
            duration_ms: parsed.total_duration.map(|ns| ns / 1_000_000),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let timeout = Duration::from_secs(5).min(self.timeout);
        let response = self
            .http_client
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, timeout))?;

        let tags: TagsBody = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, timeout))?;

        Ok(tags.models)
    }
}
