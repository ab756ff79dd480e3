//! Inference Backend Integration
//!
//! Abstracted access to inference pools through a common trait.
//!
//! # Available Backends
//!
//! - **Ollama**: HTTP client for an Ollama server (the only production backend)
//! - **Mock**: scriptable in-process pool, compiled for tests only
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::backend::{InferenceBackend, LlmRequest, OllamaBackend};
//!
//! let pool = OllamaBackend::new("fast", "http://localhost:11434", DEFAULT_TIMEOUT);
//! let reply = pool.generate(&LlmRequest::new("Hello!", "llama3.2:3b")).await?;
//! ```

#[cfg(test)]
pub mod mock;
mod ollama;
mod traits;

pub use ollama::{OllamaBackend, DEFAULT_TIMEOUT};
pub use traits::{InferenceBackend, LlmRequest, LlmResponse, ModelInfo};
