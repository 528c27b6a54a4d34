//! TTL cache fronting read-heavy graph queries.
//!
//! [`Cache`] is a generic key/value store with one fixed TTL per instance and
//! a size bound enforced by evicting the oldest-inserted entry. Reads never
//! refresh an entry's position. [`GraphCaches`] bundles the three instances the
//! crate uses: issue graphs, rendered trees and the issue-list aggregate.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{CacheConfig, CacheSettings};
use crate::graph::{Issue, IssueGraph, IssueTree};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Monotonic insertion marker; the smallest one is evicted first.
    seq: u64,
}

#[derive(Debug)]
struct CacheStore<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    next_seq: u64,
}

/// A TTL-based in-memory cache with insertion-order eviction.
#[derive(Debug, Clone)]
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    store: Arc<RwLock<CacheStore<K, V>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    ttl: Duration,
    max_size: usize,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new cache with specified TTL and max size
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(CacheStore {
                entries: HashMap::new(),
                next_seq: 0,
            })),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            ttl,
            max_size: max_size.max(1),
        }
    }

    /// Create a cache from configured settings
    pub fn from_settings(settings: CacheSettings) -> Self {
        Self::new(Duration::from_secs(settings.ttl_secs), settings.capacity)
    }

    /// Get a value unless it is absent or expired
    pub async fn get(&self, key: &K) -> Option<V> {
        let store = self.store.read().await;
        match store.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value with a fresh expiry and insertion marker
    pub async fn set(&self, key: K, value: V) {
        let mut store = self.store.write().await;
        let now = Instant::now();

        if !store.entries.contains_key(&key) && store.entries.len() >= self.max_size {
            store.entries.retain(|_, entry| now < entry.expires_at);

            if store.entries.len() >= self.max_size {
                let oldest = store
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    store.entries.remove(&oldest);
                }
            }
        }

        let seq = store.next_seq;
        store.next_seq += 1;
        store.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                seq,
            },
        );
    }

    /// Invalidate (remove) a specific key
    pub async fn invalidate(&self, key: &K) {
        let mut store = self.store.write().await;
        store.entries.remove(key);
    }

    /// Clear all entries from the cache
    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        store.entries.clear();
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn cleanup(&self) -> usize {
        let mut store = self.store.write().await;
        let now = Instant::now();
        let before = store.entries.len();
        store.entries.retain(|_, entry| now < entry.expires_at);
        before - store.entries.len()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        let now = Instant::now();
        let live_entries = store
            .entries
            .values()
            .filter(|e| now < e.expires_at)
            .count();

        CacheStats {
            total_entries: store.entries.len(),
            live_entries,
            expired_entries: store.entries.len() - live_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

/// Point-in-time statistics for one cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub live_entries: usize,
    pub expired_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub max_size: usize,
    pub ttl_seconds: u64,
}

/// Key of the single issue-list aggregate entry.
pub const ISSUE_LIST_KEY: &str = "issues";

/// The three cache instances fronting graph reads.
#[derive(Debug, Clone)]
pub struct GraphCaches {
    /// Issue graphs by category.
    pub graphs: Cache<String, Arc<IssueGraph>>,
    /// Rendered issue trees by category.
    pub trees: Cache<String, Arc<IssueTree>>,
    /// Issue-list aggregate.
    pub issues: Cache<String, Arc<Vec<Issue>>>,
}

impl GraphCaches {
    /// Build the three instances from configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            graphs: Cache::from_settings(config.graph),
            trees: Cache::from_settings(config.tree),
            issues: Cache::from_settings(config.aggregate),
        }
    }

    /// Drop the graph and tree entries of a category and the issue list.
    pub async fn invalidate_category(&self, category: &str) {
        let key = category.to_string();
        self.graphs.invalidate(&key).await;
        self.trees.invalidate(&key).await;
        self.issues.invalidate(&ISSUE_LIST_KEY.to_string()).await;
        debug!(category = %category, "Cache entries invalidated");
    }

    /// Empty every instance.
    pub async fn clear_all(&self) {
        self.graphs.clear().await;
        self.trees.clear().await;
        self.issues.clear().await;
        debug!("All graph caches cleared");
    }

    /// Drop expired entries from every instance.
    pub async fn cleanup(&self) -> usize {
        self.graphs.cleanup().await + self.trees.cleanup().await + self.issues.cleanup().await
    }

    /// Statistics for every instance.
    pub async fn stats(&self) -> GraphCacheStats {
        GraphCacheStats {
            graphs: self.graphs.stats().await,
            trees: self.trees.stats().await,
            issues: self.issues.stats().await,
        }
    }
}

impl Default for GraphCaches {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Statistics for all three instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphCacheStats {
    pub graphs: CacheStats,
    pub trees: CacheStats,
    pub issues: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64, max_size: usize) -> Cache<String, String> {
        Cache::new(Duration::from_secs(ttl_secs), max_size)
    }

    #[tokio::test]
    async fn test_cache_basic() {
        let cache = cache(60, 100);

        cache.set("key1".to_string(), "value1".to_string()).await;
        assert_eq!(cache.get(&"key1".to_string()).await, Some("value1".to_string()));
        assert_eq!(cache.get(&"key2".to_string()).await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry() {
        let cache = cache(1, 100);

        cache.set("key".to_string(), "value".to_string()).await;
        assert_eq!(cache.get(&"key".to_string()).await, Some("value".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"key".to_string()).await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(cache.cleanup().await, 1);
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_cache_invalidate() {
        let cache = cache(60, 100);

        cache.set("key".to_string(), "value".to_string()).await;
        assert!(cache.get(&"key".to_string()).await.is_some());

        cache.invalidate(&"key".to_string()).await;
        assert!(cache.get(&"key".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest_inserted() {
        let cache: Cache<u32, &str> = Cache::new(Duration::from_secs(60), 2);

        cache.set(1, "a").await;
        cache.set(2, "b").await;
        // Reads do not refresh insertion order.
        assert_eq!(cache.get(&1).await, Some("a"));
        cache.set(3, "c").await;

        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.get(&2).await, Some("b"));
        assert_eq!(cache.get(&3).await, Some("c"));
        assert_eq!(cache.stats().await.total_entries, 2);
    }

    #[tokio::test]
    async fn test_cache_reset_refreshes_insertion_marker() {
        let cache: Cache<u32, &str> = Cache::new(Duration::from_secs(60), 2);

        cache.set(1, "a").await;
        cache.set(2, "b").await;
        cache.set(1, "a2").await;
        cache.set(3, "c").await;

        assert_eq!(cache.get(&1).await, Some("a2"));
        assert_eq!(cache.get(&2).await, None);
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache: Cache<u32, &str> = Cache::new(Duration::from_secs(60), 2);

        cache.set(1, "a").await;
        cache.set(2, "b").await;
        cache.set(2, "b2").await;

        assert_eq!(cache.get(&1).await, Some("a"));
        assert_eq!(cache.get(&2).await, Some("b2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_purged_before_eviction() {
        let cache: Cache<u32, &str> = Cache::new(Duration::from_secs(10), 2);

        cache.set(1, "a").await;
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set(2, "b").await;
        tokio::time::advance(Duration::from_secs(5)).await;
        // Entry 1 has expired, so inserting 3 removes it instead of entry 2.
        cache.set(3, "c").await;

        assert_eq!(cache.get(&2).await, Some("b"));
        assert_eq!(cache.get(&3).await, Some("c"));
        assert_eq!(cache.stats().await.total_entries, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = cache(60, 10);
        cache.set("a".to_string(), "1".to_string()).await;
        cache.set("b".to_string(), "2".to_string()).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_from_settings() {
        let cache: Cache<String, String> = Cache::from_settings(CacheSettings {
            ttl_secs: 300,
            capacity: 10,
        });
        let stats = cache.stats().await;
        assert_eq!(stats.ttl_seconds, 300);
        assert_eq!(stats.max_size, 10);
    }

    #[tokio::test]
    async fn test_graph_caches_invalidate_category() {
        let caches = GraphCaches::default();
        let graph = Arc::new(IssueGraph {
            category: "printer".to_string(),
            nodes: vec![],
            connections: vec![],
        });
        caches.graphs.set("printer".to_string(), graph.clone()).await;
        caches.graphs.set("network".to_string(), graph).await;
        caches
            .issues
            .set(ISSUE_LIST_KEY.to_string(), Arc::new(vec![]))
            .await;

        caches.invalidate_category("printer").await;

        assert!(caches.graphs.get(&"printer".to_string()).await.is_none());
        assert!(caches.graphs.get(&"network".to_string()).await.is_some());
        assert!(caches.issues.get(&ISSUE_LIST_KEY.to_string()).await.is_none());
    }
}
