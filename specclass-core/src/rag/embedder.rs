//! Embedding generation with batching and content-hash memoization.
//!
//! [`EmbeddingService`] is the single entry point for turning text into
//! vectors. It splits requests into fixed-size batches for the configured
//! [`EmbeddingBackend`] and remembers every vector it has produced, keyed by
//! a SHA-256 hash of the text, in a bounded LRU cache. Transient backend
//! failures are re-sent under a [`RetryPolicy`].

use crate::config::{EmbeddingBackendKind, EmbeddingConfig};
use crate::provider::{OllamaProvider, ProviderError, RetryPolicy, Transient};
use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during embedding generation.
///
/// Any error fails the whole `encode` call, since vectors must stay aligned
/// with the caller's list of texts.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider API returned an error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The backend returned a different number of vectors than texts sent.
    #[error("Embedding backend returned {got} vectors for {expected} texts")]
    CountMismatch { expected: usize, got: usize },

    #[error("Embedding backend error: {0}")]
    Backend(String),
}

impl EmbeddingError {
    /// Only provider transport failures and retryable statuses are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl Transient for EmbeddingError {
    fn is_transient(&self) -> bool {
        EmbeddingError::is_transient(self)
    }
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// A model that embeds a batch of texts in one request.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector regardless of what else is in the batch.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embeds `texts`, returning one vector per text in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Creates the embedding backend selected by `config.backend`.
pub fn create_embedding_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    let backend: Arc<dyn EmbeddingBackend> = match config.backend {
        EmbeddingBackendKind::Ollama => Arc::new(OllamaProvider::for_embeddings(config)?),
        EmbeddingBackendKind::Hash => Arc::new(HashEmbedder::new(config.dimension)),
    };
    Ok(backend)
}

/// Content hash used as the memoization key.
pub(crate) fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Order-preserving, batch-size-invariant text encoder with an LRU cache.
///
/// Identical texts are sent to the backend once, even when they appear in
/// different calls or several times in the same call. Evictions only cost a
/// recomputation.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    retry: RetryPolicy,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingService {
    /// Creates a service with the default retry policy. Zero batch size or
    /// capacity are clamped to one.
    pub fn new(backend: Arc<dyn EmbeddingBackend>, batch_size: usize, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            batch_size: batch_size.max(1),
            retry: RetryPolicy::default(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let backend = create_embedding_backend(config)?;
        Ok(Self::new(backend, config.batch_size, config.cache_capacity)
            .with_retry(RetryPolicy::from_embedding(config)))
    }

    /// Encodes `texts`, returning one vector per text in input order.
    pub async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let hashes: Vec<String> = texts.iter().map(|t| hash_text(t)).collect();

        let mut resolved: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut pending: Vec<(&str, &String)> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            for (hash, text) in hashes.iter().zip(texts) {
                if !seen.insert(hash.as_str()) {
                    continue;
                }
                match cache.get(hash) {
                    Some(vector) => {
                        resolved.insert(hash.as_str(), vector.clone());
                    }
                    None => pending.push((hash.as_str(), text)),
                }
            }
        }

        debug!(
            total = texts.len(),
            cached = resolved.len(),
            to_encode = pending.len(),
            "Encoding texts"
        );

        for batch in pending.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|(_, text)| (*text).clone()).collect();
            let backend = &self.backend;
            let texts = &batch_texts;
            let outcome = self.retry.run(move || backend.embed_batch(texts)).await;
            if outcome.retries > 0 {
                warn!(retries = outcome.retries, size = texts.len(), "Embedding batch needed retries");
            }
            let vectors = outcome.result?;

            if vectors.len() != batch_texts.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch_texts.len(),
                    got: vectors.len(),
                });
            }

            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            for (&(hash, _), vector) in batch.iter().zip(vectors) {
                cache.put(hash.to_string(), vector.clone());
                resolved.insert(hash, vector);
            }
        }

        hashes
            .iter()
            .map(|hash| {
                resolved
                    .get(hash.as_str())
                    .cloned()
                    .ok_or_else(|| EmbeddingError::Backend(format!("no vector produced for {hash}")))
            })
            .collect()
    }

    /// Encodes a single text.
    pub async fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or(EmbeddingError::CountMismatch { expected: 1, got: 0 })
    }

    /// Drops every memoized embedding.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
        debug!("Embedding cache cleared");
    }

    /// Number of memoized embeddings.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase whitespace token is hashed into one of `dimension` buckets
/// with a hash-derived sign, then the vector is L2-normalized. Texts sharing
/// words land close together, which is enough for offline runs and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];

        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
