//! Market-context cache keyed by content-batch identity
//!
//! Eviction is least-recently-used with a fixed capacity. A long-lived
//! orchestrator reuses contexts across runs while memory stays bounded.
//! Concurrent misses for one key may both compute; the last insert wins,
//! which is harmless because generation is deterministic per batch.

use crate::model::{ContentItem, MarketContext};
use cached::{Cached, SizedCache};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_CONTEXT_CACHE_CAPACITY: usize = 8;

/// Deterministic identity of a batch of content items
///
/// SHA-256 over the sorted `url<TAB>date` pairs, so item order does not
/// change the key but moving a date between URLs does.
pub fn batch_key(items: &[ContentItem]) -> String {
    let mut entries: Vec<String> = items
        .iter()
        .map(|i| format!("{}\t{}", i.url, i.published_date.format("%Y-%m-%d")))
        .collect();
    entries.sort_unstable();

    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Thread-safe LRU cache of generated market contexts
pub struct MarketContextCache {
    cache: Arc<RwLock<SizedCache<String, MarketContext>>>,
}

impl MarketContextCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(SizedCache::with_size(capacity.max(1)))),
        }
    }

    pub async fn get(&self, key: &str) -> Option<MarketContext> {
        // LRU bookkeeping mutates on read
        let mut cache = self.cache.write().await;
        cache.cache_get(key).cloned()
    }

    pub async fn insert(&self, key: String, context: MarketContext) {
        let mut cache = self.cache.write().await;
        let _ = cache.cache_set(key, context);
    }

    pub async fn invalidate(&self, key: &str) {
        let mut cache = self.cache.write().await;
        let _ = cache.cache_remove(key);
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.cache_clear();
    }

    pub async fn len(&self) -> usize {
        let cache = self.cache.read().await;
        cache.cache_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MarketContextCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_CACHE_CAPACITY)
    }
}

impl Clone for MarketContextCache {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}
