//! Mock Inference Backend
//!
//! In-process [`InferenceBackend`] for unit tests: a fixed model list,
//! scripted replies or failures per model, and a request history for
//! asserting which models were called.
//!
//! ```ignore
//! let pool = MockBackend::new("fast").with_models(&["llama3.2:3b"]);
//! pool.set_reply("llama3.2:3b", "sunny");
//! pool.fail_times("qwen2.5:7b", 2, BackendError::Timeout(Duration::from_secs(1)));
//! // ... route ...
//! assert_eq!(pool.request_count("llama3.2:3b"), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{InferenceBackend, LlmRequest, LlmResponse, ModelInfo};
use crate::error::BackendError;

#[derive(Clone, Debug)]
enum Script {
    Reply(String),
    Fail(BackendError),
    FailTimes(u32, BackendError),
}

/// Scriptable mock pool
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    base_url: String,
    models: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, Script>>,
    history: Mutex<Vec<LlmRequest>>,
    list_calls: AtomicUsize,
    list_failure: Mutex<Option<BackendError>>,
}

impl MockBackend {
    /// Mock pool with no models
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: format!("http://{name}.mock:11434"),
            models: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            list_failure: Mutex::new(None),
        }
    }

    /// Set the loaded model list
    #[must_use]
    pub fn with_models(self, models: &[&str]) -> Self {
        self.set_models(models);
        self
    }

    /// Replace the loaded model list
    pub fn set_models(&self, models: &[&str]) {
        *self.models.lock() = models.iter().map(ToString::to_string).collect();
    }

    /// Always answer `model` with `text`
    pub fn set_reply(&self, model: &str, text: &str) {
        self.scripts
            .lock()
            .insert(model.to_string(), Script::Reply(text.to_string()));
    }

    /// Always fail calls to `model`
    pub fn set_failure(&self, model: &str, err: BackendError) {
        self.scripts
            .lock()
            .insert(model.to_string(), Script::Fail(err));
    }

    /// Fail the next `n` calls to `model`, then answer with the default reply
    pub fn fail_times(&self, model: &str, n: u32, err: BackendError) {
        self.scripts
            .lock()
            .insert(model.to_string(), Script::FailTimes(n, err));
    }

    /// Make `list_models` fail
    pub fn fail_listing(&self, err: Option<BackendError>) {
        *self.list_failure.lock() = err;
    }

    /// All generate requests so far
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.history.lock().clone()
    }

    /// Number of generate requests for `model`
    pub fn request_count(&self, model: &str) -> usize {
        self.history.lock().iter().filter(|r| r.model == model).count()
    }

    /// Number of generate requests
    pub fn total_requests(&self) -> usize {
        self.history.lock().len()
    }

    /// Number of `list_models` calls
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, BackendError> {
        self.history.lock().push(request.clone());

        let outcome = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(&request.model) {
                Some(Script::Reply(text)) => Ok(text.clone()),
                Some(Script::Fail(err)) => Err(err.clone()),
                Some(Script::FailTimes(n, err)) if *n > 0 => {
                    *n -= 1;
                    Err(err.clone())
                }
                _ => Ok(format!("{} says: {}", request.model, request.prompt)),
            }
        };

        outcome.map(|content| LlmResponse {
            content,
            model: request.model.clone(),
            tokens_used: None,
            duration_ms: None,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_failure.lock().clone() {
            return Err(err);
        }
        Ok(self
            .models
            .lock()
            .iter()
            .map(|name| ModelInfo {
                name: name.clone(),
                size: None,
            })
            .collect())
    }
}
