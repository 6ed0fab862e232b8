//! Bounded retry with a fixed delay.

use super::ProviderError;
use crate::config::{BackendConfig, EmbeddingConfig};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether re-sending the same request could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }
}

/// How often and how long to wait before re-sending a failed request.
///
/// `max_retries` counts re-sends after the first attempt, so an operation is
/// sent at most `max_retries + 1` times. Only [`Transient`] errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

/// The last result of a retried operation and how many retries it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E = ProviderError> {
    pub result: Result<T, E>,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn from_backend(config: &BackendConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    pub fn from_embedding(config: &EmbeddingConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        retries,
                    }
                }
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    warn!(attempt = retries, max_retries = self.max_retries, "Transient failure, retrying: {e}");
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        retries,
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
