//! The model invocation layer.
//!
//! [`Classifier`] turns `(context, item)` into a [`ClassificationResult`]:
//! it renders the prompt, calls the configured [`Provider`] under a
//! [`RetryPolicy`], parses the reply and memoizes it in a
//! [`ClassificationCache`]. Classification is total; every failure comes back
//! as the sentinel result from [`ClassificationResult::error`].

mod cache;
mod prompt;
mod response;

pub use cache::ClassificationCache;
pub use prompt::{response_schema, PromptBuilder, CLASSIFICATION_PROMPT, NO_WEIGHTED_SPEC};
pub use response::{parse_response, ClassificationResult, ClassifiedItem, ParseError};
pub use crate::provider::{RetryOutcome, RetryPolicy};

use crate::config::Config;
use crate::provider::{self, create_provider, Provider};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// The model replied and the reply parsed.
    Parsed,
    /// The model replied with something unparseable. Never retried.
    ParseFailed,
    /// Every attempt failed with a transient error.
    ExhaustedRetries,
    /// The provider failed with a non-retryable error.
    Failed,
    /// Served from the classification cache without calling the model.
    Cached,
}

impl InvocationState {
    /// Whether the result is the sentinel rather than a model answer.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::ParseFailed | Self::ExhaustedRetries | Self::Failed)
    }
}

/// A classification plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub result: ClassificationResult,
    pub state: InvocationState,
    /// Re-sends after the first attempt.
    pub retries: u32,
}

pub struct Classifier {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    prompt: PromptBuilder,
    schema: Value,
    cache: Mutex<ClassificationCache>,
}

impl Classifier {
    pub fn new(provider: Arc<dyn Provider>, retry: RetryPolicy, prompt: PromptBuilder, cache_capacity: usize) -> Self {
        Self {
            provider,
            retry,
            prompt,
            schema: response_schema(),
            cache: Mutex::new(ClassificationCache::new(cache_capacity)),
        }
    }

    /// Builds the selected backend with its retry settings.
    ///
    /// Fails when a hosted backend has no API key.
    pub fn from_config(config: &Config) -> provider::Result<Self> {
        let provider = create_provider(&config.llm)?;
        Ok(Self::new(
            provider,
            RetryPolicy::from_backend(config.llm.selected()),
            PromptBuilder::new(&config.run),
            config.cache.classification_capacity,
        ))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Classifies `item` given the retrieved `context`.
    pub async fn classify(&self, context: &str, item: &str) -> ClassificationResult {
        self.classify_detailed(context, item).await.result
    }

    /// Like [`classify`](Self::classify), but also reports the final state and
    /// retry count.
    ///
    /// Only successfully parsed results are cached.
    pub async fn classify_detailed(&self, context: &str, item: &str) -> Invocation {
        let cached = self.lock_cache().get(context, item);
        if let Some(result) = cached {
            debug!(item, "Classification cache hit");
            return Invocation {
                result,
                state: InvocationState::Cached,
                retries: 0,
            };
        }

        let system_prompt = self.prompt.system_prompt(context, item);
        let outcome = self
            .retry
            .run(|| self.provider.invoke(&system_prompt, item, &self.schema))
            .await;
        let retries = outcome.retries;

        let raw = match outcome.result {
            Ok(raw) => raw,
            Err(e) => {
                let state = if e.is_transient() {
                    InvocationState::ExhaustedRetries
                } else {
                    InvocationState::Failed
                };
                error!(provider = self.provider.name(), retries, "Model invocation failed: {e}");
                return Invocation {
                    result: ClassificationResult::error(format!("Model invocation failed: {e}")),
                    state,
                    retries,
                };
            }
        };

        match parse_response(&raw) {
            Ok(result) => {
                self.lock_cache().put(context, item, result.clone());
                Invocation {
                    result,
                    state: InvocationState::Parsed,
                    retries,
                }
            }
            Err(e) => {
                warn!(provider = self.provider.name(), "Unparseable model response: {e}; raw: {raw}");
                Invocation {
                    result: ClassificationResult::error(format!("Failed to process the model response: {e}")),
                    state: InvocationState::ParseFailed,
                    retries,
                }
            }
        }
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> MutexGuard<'_, ClassificationCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
