//! Vector store abstraction and factory.
//!
//! This module provides a unified interface for the storage backends behind
//! the vector index. A store holds any number of named collections; the
//! index decides which one is active.

use super::lancedb_store::LanceDbStore;
use super::memory_store::MemoryStore;
use super::types::{Document, SearchResult};
use crate::config::{StorageConfig, StorageMode};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Unified interface for vector database operations.
///
/// Implementations handle per-collection storage and nearest-neighbor search
/// by cosine distance. Callers serialize writes; implementations only need to
/// keep each call internally consistent.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether `collection` currently exists.
    async fn has_collection(&self, collection: &str) -> Result<bool>;

    /// Creates an empty collection for vectors of `dimension`. No-op if it exists.
    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<()>;

    /// Vector dimension `collection` was created with, or `None` if it does
    /// not exist.
    async fn dimension(&self, collection: &str) -> Result<Option<usize>>;

    /// Irreversibly removes `collection` and everything stored in it.
    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Appends documents to an existing collection.
    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// Searches for the `k` nearest documents.
    ///
    /// # Returns
    ///
    /// At most `k` results, sorted by non-decreasing cosine distance.
    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Returns the number of documents in `collection`.
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Creates a vector store instance based on the storage mode.
///
/// - `Embedded` mode uses LanceDB, persisted under the configured path
/// - `Memory` mode keeps everything in-process and is lost on exit
pub async fn create_vector_store(storage_config: &StorageConfig) -> Result<Arc<dyn VectorStore>> {
    match &storage_config.storage_mode {
        StorageMode::Embedded { path } => {
            let store = LanceDbStore::new(path).await?;
            Ok(Arc::new(store))
        }
        StorageMode::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Computes cosine distance (`1 - cosine similarity`) between two vectors.
///
/// Returns values from 0.0 (same direction) to 2.0 (opposite), with 1.0 for
/// orthogonal vectors. Zero-magnitude or mismatched vectors are treated as
/// orthogonal.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 1.0;
    }

    1.0 - dot_product / (magnitude_a * magnitude_b)
}
