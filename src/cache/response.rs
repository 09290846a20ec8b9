//! Time-boxed response cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Responses keyed by request shape, each valid until its expiry.
pub struct ResponseCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached value if it has not expired. Expired entries are dropped.
    pub fn lookup(&self, key: &str) -> Option<V> {
        let mut entries = self.entries();
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn store(&self, key: &str, data: V, ttl: Duration) {
        let entry = CacheEntry {
            data,
            expires_at: Instant::now() + ttl,
        };
        self.entries().insert(key.to_string(), entry);
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_hit_within_ttl() {
        let cache = ResponseCache::new();
        cache.store("k", 7u32, Duration::from_secs(60));

        assert_eq!(cache.lookup("k"), Some(7));
        assert_eq!(cache.stats(), (1, 0));
    }

    #[test]
    fn test_lookup_miss_when_expired() {
        let cache = ResponseCache::new();
        cache.store("k", 7u32, Duration::ZERO);

        assert_eq!(cache.lookup("k"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), (0, 1));
    }

    #[test]
    fn test_lookup_unknown_key() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        assert_eq!(cache.lookup("missing"), None);
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::new();
        cache.store("a", 1u32, Duration::from_secs(60));
        cache.store("b", 2u32, Duration::from_secs(60));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.lookup("a"), None);
    }
}
