//! Query result cache sitting in front of [`HierarchicalSearch`].
//!
//! Entries are keyed by the normalized query and the limit, expire after a
//! fixed TTL and are evicted least-recently-used once the cache is full.
//! Documents changing does not invalidate anything; an entry can be stale for
//! up to one TTL.
//!
//! [`HierarchicalSearch`]: super::search::HierarchicalSearch

use super::search::SearchResult;
use itertools::Itertools;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 1024,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped for outliving their TTL, whether found by a lookup
    /// (which also counts a miss) or by [`SearchCache::purge_expired`]
    pub expired: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Collapses runs of whitespace and trims, so trivially different spellings
/// of a query share an entry. Case is kept: embeddings are case-sensitive.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().join(" ")
}

type CacheKey = (String, usize);

struct Entry {
    results: Vec<SearchResult>,
    inserted: Instant,
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    stats: CacheStats,
}

pub struct SearchCache {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for SearchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCache").field("ttl", &self.ttl).finish()
    }
}

impl SearchCache {
    /// Builds a cache from `config`, or `None` if caching is off or has no room.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    pub fn new(ttl: Duration, max_entries: usize) -> Option<Self> {
        NonZeroUsize::new(max_entries).map(|capacity| Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, query: &str, limit: usize) -> Option<Vec<SearchResult>> {
        let key = (normalize_query(query), limit);
        let mut inner = self.inner.lock().await;

        let lookup = inner.entries.get(&key).map(|entry| {
            (entry.inserted.elapsed() <= self.ttl).then(|| entry.results.clone())
        });

        match lookup {
            None => {
                inner.stats.misses += 1;
                debug!("Cache miss for '{}' (limit {})", key.0, limit);
                None
            }
            Some(Some(results)) => {
                inner.stats.hits += 1;
                debug!("Cache hit for '{}' (limit {})", key.0, limit);
                Some(results)
            }
            Some(None) => {
                inner.entries.pop(&key);
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                debug!("Cache entry for '{}' (limit {}) expired", key.0, limit);
                None
            }
        }
    }

    pub async fn insert(&self, query: &str, limit: usize, results: Vec<SearchResult>) {
        let key = (normalize_query(query), limit);
        let mut inner = self.inner.lock().await;
        let entry = Entry {
            results,
            inserted: Instant::now(),
        };
        if let Some((old_key, _)) = inner.entries.push(key.clone(), entry) {
            if old_key != key {
                inner.stats.evictions += 1;
            }
        }
    }

    /// Drops every entry past its TTL. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.inserted.elapsed() > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        inner.stats.expired += expired.len() as u64;
        expired.len()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::search::{MatchType, UNKNOWN_DOCUMENT_PATH, UNKNOWN_DOCUMENT_TITLE};

    fn results(node_id: i64) -> Vec<SearchResult> {
        vec![SearchResult {
            node_id,
            title: format!("node {node_id}"),
            content: String::new(),
            document_id: 1,
            relevance: 0.5,
            match_type: MatchType::Semantic,
            matched_keyword: None,
            origin_node_id: None,
            level: 1,
            parent_id: None,
            document_title: UNKNOWN_DOCUMENT_TITLE.to_string(),
            document_path: UNKNOWN_DOCUMENT_PATH.to_string(),
        }]
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  cache \t eviction\n"), "cache eviction");
        assert_eq!(normalize_query("Cache"), "Cache");
        assert_eq!(normalize_query("   "), "");
    }

    #[tokio::test]
    async fn test_hit_and_miss() {
        let cache = SearchCache::new(Duration::from_secs(60), 8).unwrap();
        assert!(cache.get("cache", 5).await.is_none());

        cache.insert("cache", 5, results(1)).await;
        assert_eq!(cache.get(" cache ", 5).await, Some(results(1)));
        // The limit is part of the key.
        assert!(cache.get("cache", 3).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = SearchCache::new(Duration::from_millis(20), 8).unwrap();
        cache.insert("a", 5, results(1)).await;
        cache.insert("b", 5, results(2)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get("a", 5).await.is_none());
        assert_eq!(cache.stats().await.expired, 1);
        assert_eq!(cache.purge_expired().await, 1);
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.misses, 1);

        // Nothing left to purge, nothing more counted.
        assert_eq!(cache.purge_expired().await, 0);
        assert_eq!(cache.stats().await.expired, 2);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = SearchCache::new(Duration::from_secs(60), 2).unwrap();
        cache.insert("a", 5, results(1)).await;
        cache.insert("b", 5, results(2)).await;
        assert!(cache.get("a", 5).await.is_some());
        cache.insert("c", 5, results(3)).await;

        // "b" was least recently used.
        assert!(cache.get("b", 5).await.is_none());
        assert!(cache.get("a", 5).await.is_some());
        assert!(cache.get("c", 5).await.is_some());

        // Overwriting a key is not an eviction.
        cache.insert("c", 5, results(4)).await;
        assert_eq!(cache.stats().await.evictions, 1);
        assert_eq!(cache.get("c", 5).await, Some(results(4)));
    }

    #[tokio::test]
    async fn test_clear_and_config() {
        assert!(SearchCache::from_config(&CacheConfig::disabled()).is_none());
        assert!(SearchCache::from_config(&CacheConfig::default().with_max_entries(0)).is_none());

        let cache = SearchCache::from_config(&CacheConfig::default()).unwrap();
        assert_eq!(cache.ttl(), Duration::from_secs(300));
        cache.insert("a", 5, results(1)).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.entries, 0);
    }
}
