use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Key derived from (document content hash, operation name, operation input hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(content_hash: &str, operation: &str, input_hash: &str) -> Self {
        Self(format!("lexgraph:{operation}:{content_hash}:{input_hash}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key-value store with TTL. A missing entry is a normal miss, never an error.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<String>;
    async fn set(&self, key: &CacheKey, value: String, ttl: Duration);
    async fn delete(&self, key: &CacheKey);

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process bounded cache.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn make_room(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }

        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        if self.entries.len() < self.max_entries {
            return;
        }

        // Still full: drop a quarter
        let to_remove: Vec<_> = self
            .entries
            .iter()
            .take((self.max_entries / 4).max(1))
            .map(|r| r.key().clone())
            .collect();
        debug!(evicted = to_remove.len(), "Cache full, evicting entries");
        for key in to_remove {
            self.entries.remove(&key);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        let hit = match self.entries.get(key.as_str()) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.entries.remove(key.as_str());
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: String, ttl: Duration) {
        if self.max_entries == 0 || ttl.is_zero() {
            return;
        }
        self.make_room();
        self.entries.insert(
            key.as_str().to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &CacheKey) {
        self.entries.remove(key.as_str());
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Used when caching is disabled.
pub struct NoCache;

#[async_trait]
impl CacheStore for NoCache {
    async fn get(&self, _key: &CacheKey) -> Option<String> {
        None
    }

    async fn set(&self, _key: &CacheKey, _value: String, _ttl: Duration) {}

    async fn delete(&self, _key: &CacheKey) {}
}

/// Undecodable entries count as misses and are dropped.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &CacheKey) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "Discarding corrupt cache entry");
            cache.delete(key).await;
            None
        }
    }
}

pub async fn set_json<T: Serialize>(cache: &dyn CacheStore, key: &CacheKey, value: &T, ttl: Duration) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => warn!(key = %key, error = %e, "Failed to serialize cache entry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_key_layout() {
        let key = CacheKey::new("abc", "graph", "123");
        assert_eq!(key.as_str(), "lexgraph:graph:abc:123");
        assert_eq!(hash_input("x").len(), 64);
        assert_eq!(hash_input("x"), hash_input("x"));
    }

    #[tokio::test]
    async fn test_hit_and_miss_counting() {
        let cache = MemoryCache::new(10);
        let key = CacheKey::new("doc", "retrieve", "q");

        assert!(cache.get(&key).await.is_none());
        cache.set(&key, "value".to_string(), HOUR).await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("value"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);

        cache.delete(&key).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new(10);
        let key = CacheKey::new("doc", "graph", "fp");
        cache.set(&key, "v".to_string(), Duration::from_millis(5)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_eviction_keeps_cache_bounded() {
        let cache = MemoryCache::new(8);
        for i in 0..20 {
            let key = CacheKey::new("doc", "op", &i.to_string());
            cache.set(&key, i.to_string(), HOUR).await;
        }
        assert!(cache.stats().entries <= 8);

        let last = CacheKey::new("doc", "op", "19");
        assert_eq!(cache.get(&last).await.as_deref(), Some("19"));
    }

    #[tokio::test]
    async fn test_corrupt_json_entry_is_dropped() {
        let cache = MemoryCache::new(10);
        let key = CacheKey::new("doc", "compliance", "rules");
        cache.set(&key, "{not json".to_string(), HOUR).await;

        let value: Option<Vec<u32>> = get_json(&cache, &key).await;
        assert!(value.is_none());
        assert_eq!(cache.stats().entries, 0);

        set_json(&cache, &key, &vec![1u32, 2], HOUR).await;
        let value: Option<Vec<u32>> = get_json(&cache, &key).await;
        assert_eq!(value, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_no_cache_never_stores() {
        let key = CacheKey::new("doc", "op", "in");
        NoCache.set(&key, "v".to_string(), HOUR).await;
        assert!(NoCache.get(&key).await.is_none());
    }
}
