//! Memoization of classification results.

use super::response::ClassificationResult;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Bounded LRU cache keyed by the exact `(context, item)` pair.
pub struct ClassificationCache {
    entries: LruCache<(String, String), ClassificationResult>,
}

impl ClassificationCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, context: &str, item: &str) -> Option<ClassificationResult> {
        self.entries
            .get(&(context.to_string(), item.to_string()))
            .cloned()
    }

    pub fn put(&mut self, context: &str, item: &str, result: ClassificationResult) {
        self.entries
            .put((context.to_string(), item.to_string()), result);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: &str) -> ClassificationResult {
        ClassificationResult {
            primary_classification: label.into(),
            classification: label.into(),
            reasoning: "r".into(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_key_is_context_and_item() {
        let mut cache = ClassificationCache::new(4);
        cache.put("ctx", "bolt", result("A"));

        assert_eq!(cache.get("ctx", "bolt"), Some(result("A")));
        assert_eq!(cache.get("other ctx", "bolt"), None);
        assert_eq!(cache.get("ctx", "nut"), None);
    }

    #[test]
    fn test_bounded_and_clearable() {
        let mut cache = ClassificationCache::new(2);
        cache.put("c", "1", result("A"));
        cache.put("c", "2", result("B"));
        cache.put("c", "3", result("C"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("c", "1"), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
