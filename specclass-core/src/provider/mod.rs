//! LLM provider abstraction layer.
//!
//! This module defines a common interface for the model backends
//! (a locally served Ollama model, OpenAI, Anthropic). Each backend only
//! differs in its request/response envelope. [`RetryPolicy`] wraps calls to
//! any of them, and to the embedding backend; response parsing lives in
//! [`crate::classify`].

mod retry;
mod types;
pub mod anthropic;
pub mod ollama;
pub mod openai;

// Re-export common types
pub use retry::{RetryOutcome, RetryPolicy, Transient};
pub use types::{Provider, ProviderError, Result};

// Re-export provider implementations
pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::config::{LlmBackendKind, LlmConfig};
use std::sync::Arc;

/// Creates the provider selected by `config.backend`.
///
/// Hosted backends without an API key fail here, before any run starts.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config.backend {
        LlmBackendKind::Ollama => Arc::new(OllamaProvider::new(&config.ollama)?),
        LlmBackendKind::OpenAi => Arc::new(OpenAiProvider::new(&config.openai)?),
        LlmBackendKind::Anthropic => Arc::new(AnthropicProvider::new(&config.anthropic)?),
    };
    Ok(provider)
}
