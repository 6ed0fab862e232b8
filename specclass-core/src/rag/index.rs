//! The vector index: named collections of embedded chunks with cached search.

use super::embedder::{EmbeddingError, EmbeddingService};
use super::retrieval_cache::{RetrievalCache, RetrievalKey};
use super::store::{create_vector_store, VectorStore};
use super::types::{Chunk, Document, SearchResult};
use crate::config::Config;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IndexError {
    /// No active collection, or the active one no longer exists.
    #[error("Vector index not ready: {0}")]
    NotReady(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Expected {expected} vectors for {expected} chunks, got {got}")]
    VectorCountMismatch { expected: usize, got: usize },

    #[error("Failed to reset collection: {0}")]
    Reset(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl IndexError {
    /// Fatal errors indicate a setup or lifecycle defect and must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotReady(_) | Self::DimensionMismatch { .. } | Self::VectorCountMismatch { .. } | Self::Reset(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

fn storage_err(e: anyhow::Error) -> IndexError {
    IndexError::Storage(format!("{e:#}"))
}

/// A vector index over a [`VectorStore`], with exactly one active collection.
///
/// # Thread Safety
///
/// The active collection sits behind an async `RwLock`. Searches take the read
/// lock; inserts, resets and collection switches take the write lock and hold
/// it across the store call, so writes never interleave with each other or with
/// an in-flight search.
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<EmbeddingService>,
    dimension: usize,
    default_k: usize,
    active: RwLock<Option<String>>,
    cache: Mutex<RetrievalCache>,
}

impl VectorIndex {
    /// Creates an index with no active collection.
    ///
    /// Call [`use_collection`](Self::use_collection) before any other operation.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbeddingService>,
        dimension: usize,
        default_k: usize,
        cache: RetrievalCache,
    ) -> Self {
        Self {
            store,
            embedder,
            dimension,
            default_k,
            active: RwLock::new(None),
            cache: Mutex::new(cache),
        }
    }

    /// Builds the store and embedding service from config and activates the
    /// configured collection.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = create_vector_store(&config.storage)
            .await
            .map_err(|e| IndexError::NotReady(format!("failed to open storage: {e:#}")))?;
        let embedder = Arc::new(EmbeddingService::from_config(&config.embedding)?);

        let index = Self::new(
            store,
            embedder,
            config.embedding.dimension,
            config.storage.top_k,
            RetrievalCache::new(config.cache.retrieval_capacity),
        );
        index.use_collection(&config.storage.collection_name).await?;
        Ok(index)
    }

    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Makes `collection` the active collection, creating it if missing.
    ///
    /// An existing collection built for another dimension is still activated,
    /// so it can be reset, but inserts and searches on it fail with
    /// [`IndexError::DimensionMismatch`] until then.
    pub async fn use_collection(&self, collection: &str) -> Result<()> {
        let mut active = self.active.write().await;
        self.store
            .create_collection(collection, self.dimension)
            .await
            .map_err(|e| IndexError::NotReady(format!("cannot open collection '{collection}': {e:#}")))?;

        if let Err(IndexError::DimensionMismatch { got, .. }) = self.check_stored_dimension(collection).await {
            warn!(
                collection,
                stored = got,
                configured = self.dimension,
                "Collection was built for another embedding dimension; reset it before ingesting"
            );
        }

        if active.as_deref() != Some(collection) {
            info!(collection, "Switched active collection");
        }
        *active = Some(collection.to_string());
        Ok(())
    }

    /// Name of the active collection.
    pub async fn active_collection(&self) -> Result<String> {
        self.active
            .read()
            .await
            .clone()
            .ok_or_else(|| IndexError::NotReady("no active collection".to_string()))
    }

    /// Discards everything in `collection` and recreates it empty.
    ///
    /// Cached retrievals for the collection are dropped as well.
    pub async fn reset(&self, collection: &str) -> Result<()> {
        let _active = self.active.write().await;

        self.store
            .drop_collection(collection)
            .await
            .map_err(|e| IndexError::Reset(format!("{collection}: {e:#}")))?;
        self.store
            .create_collection(collection, self.dimension)
            .await
            .map_err(|e| IndexError::Reset(format!("{collection}: {e:#}")))?;

        let invalidated = self.lock_cache().invalidate_collection(collection);
        info!(collection, invalidated, "Collection reset");
        Ok(())
    }

    /// Appends chunks to the active collection, returning their assigned IDs.
    ///
    /// When `vectors` is `None` the chunks are embedded here. IDs continue from
    /// the current document count, so re-inserting the same chunks without a
    /// reset stores duplicates under new IDs.
    pub async fn insert(&self, chunks: Vec<Chunk>, vectors: Option<Vec<Vec<f32>>>) -> Result<Vec<String>> {
        let active = self.active.write().await;
        let collection = self.ready_collection(active.as_deref()).await?;
        self.check_stored_dimension(collection).await?;

        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = match vectors {
            Some(vectors) => {
                if vectors.len() != chunks.len() {
                    return Err(IndexError::VectorCountMismatch {
                        expected: chunks.len(),
                        got: vectors.len(),
                    });
                }
                vectors
            }
            None => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                self.embedder.encode(&texts).await?
            }
        };

        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        let start = self.store.count(collection).await.map_err(storage_err)?;
        let ids: Vec<String> = (start..start + chunks.len()).map(|i| i.to_string()).collect();
        let documents: Vec<Document> = chunks
            .into_iter()
            .zip(vectors)
            .zip(&ids)
            .map(|((chunk, vector), id)| Document::new(id.clone(), chunk, vector))
            .collect();

        self.store.add(collection, documents).await.map_err(storage_err)?;
        self.lock_cache().invalidate_collection(collection);

        debug!(collection, inserted = ids.len(), first_id = start, "Inserted documents");
        Ok(ids)
    }

    /// Returns up to `k` nearest documents to `query`, best first.
    ///
    /// `k` defaults to the configured top-k. A `k` larger than the collection
    /// returns everything; `k == 0` returns nothing.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<Vec<SearchResult>> {
        let active = self.active.read().await;
        let collection = active
            .as_deref()
            .ok_or_else(|| IndexError::NotReady("no active collection".to_string()))?;

        let k = k.unwrap_or(self.default_k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let key = RetrievalKey::new(collection, query, k);
        let cached = self.lock_cache().get(&key);
        if let Some(results) = cached {
            debug!(collection, k, "Retrieval cache hit");
            return Ok(results);
        }

        let collection = self.ready_collection(Some(collection)).await?;
        self.check_stored_dimension(collection).await?;
        let query_embedding = self.embedder.encode_one(query).await?;
        self.check_dimension(&query_embedding)?;

        let results = self
            .store
            .search(collection, &query_embedding, k)
            .await
            .map_err(storage_err)?;

        self.lock_cache().put(key, results.clone());
        Ok(results)
    }

    /// Number of documents stored in `collection`.
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let _active = self.active.read().await;
        let collection = self.ready_collection(Some(collection)).await?;
        self.store.count(collection).await.map_err(storage_err)
    }

    /// Deletes the active collection. The index is not ready again until the
    /// next [`use_collection`](Self::use_collection).
    pub async fn drop_collection(&self) -> Result<()> {
        let mut active = self.active.write().await;
        let Some(collection) = active.take() else {
            warn!("drop_collection called with no active collection");
            return Ok(());
        };

        self.lock_cache().invalidate_collection(&collection);
        self.store
            .drop_collection(&collection)
            .await
            .map_err(|e| IndexError::Reset(format!("{collection}: {e:#}")))?;

        info!(collection = %collection, "Dropped collection");
        Ok(())
    }

    /// Empties the retrieval cache.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    /// Number of cached retrievals across all collections.
    pub fn cached_retrievals(&self) -> usize {
        self.lock_cache().len()
    }

    async fn ready_collection<'a>(&self, collection: Option<&'a str>) -> Result<&'a str> {
        let collection = collection.ok_or_else(|| IndexError::NotReady("no active collection".to_string()))?;
        let exists = self.store.has_collection(collection).await.map_err(storage_err)?;
        if !exists {
            return Err(IndexError::NotReady(format!("collection '{collection}' does not exist")));
        }
        Ok(collection)
    }

    /// Compares the dimension `collection` was created with to ours.
    async fn check_stored_dimension(&self, collection: &str) -> Result<()> {
        match self.store.dimension(collection).await.map_err(storage_err)? {
            Some(stored) if stored != self.dimension => Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: stored,
            }),
            _ => Ok(()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, RetrievalCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
