//! Ollama provider implementation.
//!
//! This module provides an Ollama HTTP API client that implements both the
//! [`Provider`] trait (classification prompts) and the
//! [`EmbeddingBackend`] trait (corpus and query embeddings).

use super::types::*;
use crate::config::{BackendConfig, EmbeddingConfig};
use crate::rag::{EmbeddingBackend, EmbeddingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Ollama HTTP API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    temperature: f64,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Creates a provider that sends classification prompts to `config.model`.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            http_client: http_client(config.timeout_secs)?,
        })
    }

    /// Creates a provider that embeds text with `config.model`.
    pub fn for_embeddings(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: 0.0,
            http_client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        user_query: &str,
        response_schema: &serde_json::Value,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: user_query.to_string(),
            system: system_prompt.to_string(),
            stream: false,
            format: Some(response_schema.clone()),
            options: {
                let mut opts = HashMap::new();
                opts.insert("temperature".to_string(), serde_json::json!(self.temperature));
                Some(opts)
            },
        };

        let response = self.http_client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body = response.text().await?;
        let generated: OllamaGenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Envelope(format!("{e}: {body}")))?;

        debug!(model = %generated.model, done = generated.done, "Ollama generation finished");
        Ok(generated.response)
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaProvider {
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);

        let embed_request = EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&embed_request)
            .send()
            .await
            .map_err(ProviderError::from)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await.into());
        }

        let embed_response = response
            .json::<EmbedResponse>()
            .await
            .map_err(ProviderError::from)?;

        Ok(embed_response.embeddings)
    }
}

// Ollama-specific request/response types (internal)

#[derive(Debug, Clone, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    model: String,
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}
