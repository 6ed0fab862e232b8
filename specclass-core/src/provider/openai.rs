//! OpenAI chat completions provider.

use super::types::*;
use crate::config::BackendConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Hosted provider speaking the OpenAI `/v1/chat/completions` API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: String,
    model: String,
    temperature: f64,
    api_key: String,
    http_client: reqwest::Client,
}

impl OpenAiProvider {
    /// Creates the provider. Fails fast when no API key is configured.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::MissingCredentials("OPENAI_API_KEY".to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            http_client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        user_query: &str,
        _response_schema: &serde_json::Value,
    ) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_query.to_string(),
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body = response.text().await?;
        let completion: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Envelope(format!("{e}: {body}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Envelope("no choices in completion".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn config(base_url: String, api_key: Option<&str>) -> BackendConfig {
        BackendConfig {
            model: "gpt-test".to_string(),
            base_url,
            temperature: 0.0,
            max_tokens: 256,
            timeout_secs: 5,
            max_retries: 0,
            retry_delay_ms: 0,
            api_key: api_key.map(str::to_string),
        }
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = OpenAiProvider::new(&config("http://localhost".into(), None)).unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials(ref var) if var == "OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_invoke_returns_first_choice_content() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-test",
                "response_format": {"type": "json_object"},
                "messages": [
                    {"role": "system", "content": "classify"},
                    {"role": "user", "content": "widget"}
                ]
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"classification\":\"B\"}"}}]}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::new(&config(server.url(), Some("sk-test"))).unwrap();
        let raw = provider
            .invoke("classify", "widget", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(raw, r#"{"classification":"B"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_is_envelope_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::new(&config(server.url(), Some("sk-test"))).unwrap();
        let err = provider
            .invoke("classify", "widget", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Envelope(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"slow down"}}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::new(&config(server.url(), Some("sk-test"))).unwrap();
        let err = provider
            .invoke("classify", "widget", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
