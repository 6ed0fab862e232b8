//! Anthropic Messages API provider.

use super::types::*;
use crate::config::BackendConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";

/// Appended to the system prompt; the Messages API has no JSON mode.
const JSON_ONLY_INSTRUCTION: &str =
    "Your output must be JSON formatted. Return only the specified JSON format, without any additional text.";

/// Hosted provider speaking the Anthropic `/v1/messages` API.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    api_key: String,
    http_client: reqwest::Client,
}

impl AnthropicProvider {
    /// Creates the provider. Fails fast when no API key is configured.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::MissingCredentials("ANTHROPIC_API_KEY".to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key,
            http_client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        user_query: &str,
        _response_schema: &serde_json::Value,
    ) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: format!("{system_prompt}\n\n{JSON_ONLY_INSTRUCTION}"),
            messages: vec![UserMessage {
                role: "user".to_string(),
                content: user_query.to_string(),
            }],
            temperature: self.temperature,
        };

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body = response.text().await?;
        let message: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Envelope(format!("{e}: {body}")))?;

        message
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| ProviderError::Envelope("no text content in response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<UserMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct UserMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn config(base_url: String, api_key: Option<&str>) -> BackendConfig {
        BackendConfig {
            model: "claude-test".to_string(),
            base_url,
            temperature: 0.0,
            max_tokens: 512,
            timeout_secs: 5,
            max_retries: 0,
            retry_delay_ms: 0,
            api_key: api_key.map(str::to_string),
        }
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = AnthropicProvider::new(&config("http://localhost".into(), Some(""))).unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials(ref var) if var == "ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn test_invoke_returns_text_block() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-api-key")
            .match_header("anthropic-version", "2023-06-01")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "claude-test",
                "max_tokens": 512,
                "messages": [{"role": "user", "content": "widget"}]
            })))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "id": "msg_01",
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "text", "text": "{\"classification\":\"C\"}"}],
                    "model": "claude-test",
                    "stop_reason": "end_turn"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = AnthropicProvider::new(&config(server.url(), Some("test-api-key"))).unwrap();
        let raw = provider
            .invoke("classify", "widget", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(raw, r#"{"classification":"C"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_overloaded_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(529)
            .with_body(r#"{"type":"error","error":{"type":"overloaded_error"}}"#)
            .create_async()
            .await;

        let provider = AnthropicProvider::new(&config(server.url(), Some("test-api-key"))).unwrap();
        let err = provider
            .invoke("classify", "widget", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
