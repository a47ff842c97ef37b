//! LRU TTL response cache (spec §4.3).
//!
//! No teacher file implements a cache; this follows the interior-mutability
//! idiom the rest of `reliability` uses (a single lock serialising mutation,
//! per §5 "a single internal lock protects get/set/delete/evict") with a
//! hand-rolled intrusive insertion-order list rather than pulling in an `lru`
//! crate nobody in the corpus depends on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

/// Observable counters for a cache instance (§4.3 "cache is... counted").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    /// MRU order, most-recently-used at the back. Reinserted on every hit and
    /// on `set`, so the front is always the true LRU victim.
    order: Vec<K>,
    max_size: usize,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// A namespaced LRU cache with per-entry TTL, O(1) amortised on the common
/// path (map lookup plus a linear scan of `order` only on eviction, which in
/// practice touches the single oldest entry).
pub struct LruTtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    enabled: bool,
}

impl<K, V> LruTtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                max_size: max_size.max(1),
                default_ttl,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            enabled: true,
        }
    }

    /// A cache that never stores anything; `get` always misses, `set` is a
    /// no-op. Matches §4.3 "cache is disabled entirely when a global flag is off".
    pub fn disabled() -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                max_size: 1,
                default_ttl: Duration::ZERO,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            enabled: false,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let expired = match inner.map.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.order.retain(|k| k != key);
        inner.order.push(key.clone());
        inner.map.get(key).map(|e| e.value.clone())
    }

    pub fn has(&self, key: &K) -> bool {
        if !self.enabled {
            return false;
        }
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        inner.map.get(key).is_some_and(|e| !e.is_expired(now))
    }

    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, None);
    }

    pub fn set_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let ttl = ttl.unwrap_or(inner.default_ttl);

        // Evict-then-insert: existing key loses its old order slot so the
        // reinsertion below always lands at the MRU end (§4.3).
        if inner.map.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else if inner.map.len() >= inner.max_size {
            if let Some(oldest) = inner.order.first().cloned() {
                inner.map.remove(&oldest);
                inner.order.remove(0);
                inner.evictions += 1;
            }
        }

        inner.map.insert(key.clone(), Entry { value, inserted_at: now, ttl });
        inner.order.push(key);
    }

    pub fn delete(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.map.remove(key).is_some();
        if removed {
            inner.order.retain(|k| k != key);
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.map.len(),
        }
    }
}

/// Namespaces a cache key by tool so unrelated tools never collide
/// (§4.3 "Cache-key contracts... keys are namespaced by tool").
pub fn namespaced_key(tool: &str, parts: &[(&str, &str)]) -> String {
    let mut sorted = parts.to_vec();
    sorted.sort_by_key(|(k, _)| *k);
    let body = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    format!("{tool}:{{{body}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_value_within_ttl() {
        let cache = LruTtlCache::new(10, Duration::from_secs(60));
        cache.set("k".to_string(), "v".to_string());
        assert_eq!(cache.get(&"k".to_string()), Some("v".to_string()));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_removed() {
        let cache = LruTtlCache::new(10, Duration::from_millis(1));
        cache.set("k".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"k".to_string()), None);
        assert_eq!(cache.stats().misses, 1);
        assert!(!cache.has(&"k".to_string()));
    }

    #[test]
    fn eviction_drops_oldest_inserted_surviving_key_first() {
        let cache = LruTtlCache::new(2, Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("c".to_string(), 3); // evicts "a"
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn hit_promotes_key_to_mru_and_protects_it_from_eviction() {
        let cache = LruTtlCache::new(2, Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        let _ = cache.get(&"a".to_string()); // "a" is now MRU, "b" is LRU
        cache.set("c".to_string(), 3); // evicts "b", not "a"
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn re_set_of_existing_key_refreshes_insertion_order() {
        let cache = LruTtlCache::new(2, Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("a".to_string(), 10); // refresh "a" to MRU
        cache.set("c".to_string(), 3); // evicts "b"
        assert_eq!(cache.get(&"a".to_string()), Some(10));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn delete_and_clear_remove_entries() {
        let cache = LruTtlCache::new(10, Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        assert!(cache.delete(&"a".to_string()));
        assert!(!cache.delete(&"a".to_string()));
        cache.set("b".to_string(), 2);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn disabled_cache_never_stores_anything() {
        let cache: LruTtlCache<String, i32> = LruTtlCache::disabled();
        cache.set("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(!cache.has(&"a".to_string()));
    }

    #[test]
    fn namespaced_key_is_stable_regardless_of_part_order() {
        let a = namespaced_key("search", &[("q", "rust"), ("engine", "bing")]);
        let b = namespaced_key("search", &[("engine", "bing"), ("q", "rust")]);
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
    }
}
