//! Three-tier promotion cache.
//!
//! L1 (hot) and L2 (warm) are small; L3 (cold) is large. Reads check the
//! tiers hot to cold. A hit in L2 or L3 bumps a per-key access counter;
//! once it passes the promotion threshold the entry moves one tier
//! hotter, pushing that tier's LRU entry one tier colder. Entries only
//! leave the cache entirely when they fall off L3 or are evicted by key.

use super::{Cache, CacheStats, CacheTier};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Tier sizes and promotion threshold.
#[derive(Debug, Clone, Copy)]
pub struct TieredCacheConfig {
    pub l1_max_size: usize,
    pub l2_max_size: usize,
    pub l3_max_size: usize,
    /// Accesses beyond this count trigger promotion to the next tier.
    pub promotion_threshold: u32,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            l1_max_size: 200,
            l2_max_size: 1000,
            l3_max_size: 10000,
            promotion_threshold: 5,
        }
    }
}

struct Entry<V> {
    value: V,
    access_count: u32,
    last_access: u64,
}

struct Tiers<V> {
    l1: HashMap<String, Entry<V>>,
    l2: HashMap<String, Entry<V>>,
    l3: HashMap<String, Entry<V>>,
    evictions: u64,
}

impl<V> Tiers<V> {
    fn total(&self) -> usize {
        self.l1.len() + self.l2.len() + self.l3.len()
    }
}

fn pop_lru<V>(map: &mut HashMap<String, Entry<V>>) -> Option<(String, Entry<V>)> {
    let key = map
        .iter()
        .min_by_key(|(_, e)| e.last_access)
        .map(|(k, _)| k.clone())?;
    map.remove(&key).map(|e| (key, e))
}

/// Bounded three-tier cache with access-count promotion and cascading
/// demotion. Tier mutation is serialized under one lock; counters are
/// read without it.
pub struct TieredCache<V> {
    config: TieredCacheConfig,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    tiers: Mutex<Tiers<V>>,
}

impl<V: Clone + Send + Sync> TieredCache<V> {
    pub fn new(config: TieredCacheConfig) -> Self {
        Self {
            config,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            tiers: Mutex::new(Tiers {
                l1: HashMap::new(),
                l2: HashMap::new(),
                l3: HashMap::new(),
                evictions: 0,
            }),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Sizes of the individual tiers, hot to cold.
    pub fn tier_sizes(&self) -> (usize, usize, usize) {
        let tiers = self.tiers.lock().unwrap();
        (tiers.l1.len(), tiers.l2.len(), tiers.l3.len())
    }

    /// Insert into L1, demoting that tier's LRU down the chain. Anything
    /// pushed off the end of L3 is counted as an eviction.
    fn insert_l1(&self, tiers: &mut Tiers<V>, key: String, mut entry: Entry<V>) {
        if self.config.l1_max_size == 0 {
            self.insert_l2(tiers, key, entry);
            return;
        }
        entry.access_count = 0;
        if !tiers.l1.contains_key(&key) && tiers.l1.len() >= self.config.l1_max_size {
            if let Some((demoted_key, demoted)) = pop_lru(&mut tiers.l1) {
                self.insert_l2(tiers, demoted_key, demoted);
            }
        }
        tiers.l1.insert(key, entry);
    }

    fn insert_l2(&self, tiers: &mut Tiers<V>, key: String, mut entry: Entry<V>) {
        if self.config.l2_max_size == 0 {
            self.insert_l3(tiers, key, entry);
            return;
        }
        entry.access_count = 0;
        if !tiers.l2.contains_key(&key) && tiers.l2.len() >= self.config.l2_max_size {
            if let Some((demoted_key, demoted)) = pop_lru(&mut tiers.l2) {
                self.insert_l3(tiers, demoted_key, demoted);
            }
        }
        tiers.l2.insert(key, entry);
    }

    fn insert_l3(&self, tiers: &mut Tiers<V>, key: String, mut entry: Entry<V>) {
        if self.config.l3_max_size == 0 {
            tiers.evictions += 1;
            return;
        }
        entry.access_count = 0;
        if !tiers.l3.contains_key(&key) && tiers.l3.len() >= self.config.l3_max_size {
            if pop_lru(&mut tiers.l3).is_some() {
                tiers.evictions += 1;
            }
        }
        tiers.l3.insert(key, entry);
    }
}

impl<V: Clone + Send + Sync> Cache<V> for TieredCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let tick = self.tick();
        let mut tiers = self.tiers.lock().unwrap();

        if let Some(entry) = tiers.l1.get_mut(key) {
            entry.last_access = tick;
            entry.access_count += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }

        if let Some(entry) = tiers.l2.get_mut(key) {
            entry.last_access = tick;
            entry.access_count += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            let value = entry.value.clone();
            if entry.access_count > self.config.promotion_threshold {
                if let Some(entry) = tiers.l2.remove(key) {
                    self.insert_l1(&mut tiers, key.to_string(), entry);
                }
            }
            return Some(value);
        }

        if let Some(entry) = tiers.l3.get_mut(key) {
            entry.last_access = tick;
            entry.access_count += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            let value = entry.value.clone();
            if entry.access_count > self.config.promotion_threshold {
                if let Some(entry) = tiers.l3.remove(key) {
                    self.insert_l2(&mut tiers, key.to_string(), entry);
                }
            }
            return Some(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: &str, value: V) {
        self.put_in_tier(key, value, CacheTier::Warm);
    }

    fn put_in_tier(&self, key: &str, value: V, tier: CacheTier) {
        let tick = self.tick();
        let mut tiers = self.tiers.lock().unwrap();

        // A fresh put replaces any stale placement of the key.
        tiers.l1.remove(key);
        tiers.l2.remove(key);
        tiers.l3.remove(key);

        let entry = Entry {
            value,
            access_count: 0,
            last_access: tick,
        };
        match tier {
            CacheTier::Hot => self.insert_l1(&mut tiers, key.to_string(), entry),
            CacheTier::Warm => self.insert_l2(&mut tiers, key.to_string(), entry),
            CacheTier::Cold => self.insert_l3(&mut tiers, key.to_string(), entry),
        }
    }

    fn evict(&self, key: &str) {
        let mut tiers = self.tiers.lock().unwrap();
        let removed = tiers.l1.remove(key).is_some()
            | tiers.l2.remove(key).is_some()
            | tiers.l3.remove(key).is_some();
        if removed {
            tiers.evictions += 1;
        }
    }

    fn clear(&self) {
        let mut tiers = self.tiers.lock().unwrap();
        tiers.l1.clear();
        tiers.l2.clear();
        tiers.l3.clear();
        tiers.evictions = 0;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    fn stats(&self) -> CacheStats {
        let tiers = self.tiers.lock().unwrap();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: tiers.evictions,
            size: tiers.total(),
        }
    }
}

impl<V: Clone + Send + Sync> Default for TieredCache<V> {
    fn default() -> Self {
        Self::new(TieredCacheConfig::default())
    }
}
