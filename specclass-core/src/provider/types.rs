//! Common types for LLM providers.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when interacting with a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The response arrived but did not have the provider's envelope shape.
    #[error("Unexpected response envelope: {0}")]
    Envelope(String),

    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether retrying the same request could succeed.
    ///
    /// Transport failures (connect, timeout, dropped body) and retryable HTTP
    /// statuses are transient. Malformed envelopes and configuration errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_builder() && !e.is_decode() && e.status().map_or(true, is_retryable_status),
            Self::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Builds the error for a non-2xx response.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::Status { status, body }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Provider trait for LLM backends.
///
/// A backend only knows its own request/response envelope. Retries and
/// response parsing live above this trait in [`crate::classify`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Sends one structured prompt and returns the raw model text.
    ///
    /// `response_schema` is a JSON schema the backend should enforce when it
    /// supports structured output.
    async fn invoke(
        &self,
        system_prompt: &str,
        user_query: &str,
        response_schema: &serde_json::Value,
    ) -> Result<String>;
}

/// Builds an HTTP client with the transport timeout used by every call.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(ProviderError::Request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ProviderError {
        ProviderError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_statuses_are_transient() {
        assert!(status(408).is_transient());
        assert!(status(429).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn test_envelope_and_config_errors_are_not_transient() {
        assert!(!ProviderError::Envelope("no content".into()).is_transient());
        assert!(!ProviderError::MissingCredentials("OPENAI_API_KEY".into()).is_transient());
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!ProviderError::Json(json_err).is_transient());
    }
}
