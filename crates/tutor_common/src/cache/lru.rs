//! Single-tier LRU cache.

use super::{Cache, CacheStats, CacheTier};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct Entry<V> {
    value: V,
    last_access: u64,
}

struct Inner<V> {
    map: HashMap<String, Entry<V>>,
    evictions: u64,
}

/// Bounded LRU map. Recency is tracked with a logical clock rather than
/// wall time so behavior is deterministic under test.
pub struct LruCache<V> {
    max_size: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone + Send + Sync> LruCache<V> {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                evictions: 0,
            }),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

impl<V: Clone + Send + Sync> Cache<V> for LruCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let tick = self.tick();
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get_mut(key) {
            Some(entry) => {
                entry.last_access = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: &str, value: V) {
        if self.max_size == 0 {
            return;
        }
        let tick = self.tick();
        let mut inner = self.inner.lock().unwrap();
        if !inner.map.contains_key(key) && inner.map.len() >= self.max_size {
            // Drop the least recently used entry.
            if let Some(lru_key) = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&lru_key);
                inner.evictions += 1;
            }
        }
        inner.map.insert(
            key.to_string(),
            Entry {
                value,
                last_access: tick,
            },
        );
    }

    fn put_in_tier(&self, key: &str, value: V, _tier: CacheTier) {
        self.put(key, value);
    }

    fn evict(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.remove(key).is_some() {
            inner.evictions += 1;
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.evictions = 0;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: inner.evictions,
            size: inner.map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache: LruCache<String> = LruCache::new(10);
        cache.put("a", "alpha".to_string());
        assert_eq!(cache.get("a"), Some("alpha".to_string()));
        assert_eq!(cache.get("b"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache: LruCache<u32> = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        // Touch "a" so "b" becomes the LRU.
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_evict_then_miss() {
        let cache: LruCache<u32> = LruCache::new(4);
        cache.put("a", 1);
        cache.evict("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let cache: LruCache<u32> = LruCache::new(0);
        cache.put("a", 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache: LruCache<u32> = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_reads_accounted() {
        let cache: LruCache<u32> = LruCache::new(4);
        cache.put("a", 1);
        for _ in 0..3 {
            cache.get("a");
        }
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 4);
    }
}
