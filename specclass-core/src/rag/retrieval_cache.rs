//! Memoization of top-k search results.

use super::types::SearchResult;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Cache key: the same query against a different collection or `k` is a
/// different entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalKey {
    pub collection: String,
    pub query: String,
    pub k: usize,
}

impl RetrievalKey {
    pub fn new(collection: impl Into<String>, query: impl Into<String>, k: usize) -> Self {
        Self {
            collection: collection.into(),
            query: query.into(),
            k,
        }
    }
}

/// Bounded LRU cache of search results.
///
/// Entries are derived data only. The owner must invalidate a collection's
/// entries whenever that collection's contents change.
pub struct RetrievalCache {
    entries: LruCache<RetrievalKey, Vec<SearchResult>>,
}

impl RetrievalCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, key: &RetrievalKey) -> Option<Vec<SearchResult>> {
        self.entries.get(key).cloned()
    }

    pub fn put(&mut self, key: RetrievalKey, results: Vec<SearchResult>) {
        self.entries.put(key, results);
    }

    /// Drops every entry for `collection`, returning how many were removed.
    pub fn invalidate_collection(&mut self, collection: &str) -> usize {
        let stale: Vec<RetrievalKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.collection == collection)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            self.entries.pop(key);
        }
        stale.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
