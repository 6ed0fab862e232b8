//! In-memory vector storage and search.

use super::store::{cosine_distance, VectorStore};
use super::types::{Document, SearchResult};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// An in-memory vector store.
///
/// Documents are kept per collection behind a `RwLock` and searched with a
/// linear scan, O(n * d) per query.
///
/// # When to Use
///
/// - Tests and prototyping
/// - Small corpora that are re-ingested on every run
///
/// Data is lost when the process ends; use the embedded LanceDB store for
/// persistence.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

struct MemoryCollection {
    dimension: usize,
    documents: Vec<Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections.contains_key(collection))
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection {
                dimension,
                documents: Vec::new(),
            });
        Ok(())
    }

    async fn dimension(&self, collection: &str) -> Result<Option<usize>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections.get(collection).map(|c| c.dimension))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections.remove(collection);
        Ok(())
    }

    /// Note: No deduplication is performed, so adding the same document multiple
    /// times will create duplicates.
    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection '{collection}' does not exist"))?;
        if let Some(doc) = documents.iter().find(|d| d.embedding.len() != stored.dimension) {
            bail!(
                "document '{}' has {} dimensions, collection '{collection}' has {}",
                doc.id,
                doc.embedding.len(),
                stored.dimension
            );
        }
        stored.documents.extend(documents);
        Ok(())
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let stored = collections
            .get(collection)
            .ok_or_else(|| anyhow!("collection '{collection}' does not exist"))?;

        let mut results: Vec<SearchResult> = stored
            .documents
            .iter()
            .map(|doc| SearchResult {
                document: Document {
                    embedding: Vec::new(),
                    ..doc.clone()
                },
                distance: cosine_distance(query_embedding, &doc.embedding),
            })
            .collect();

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results.truncate(k);

        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)
            .map(|c| c.documents.len())
            .ok_or_else(|| anyhow!("collection '{collection}' does not exist"))
    }
}
