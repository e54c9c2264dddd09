
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::config::SearchConfig;

/// LRU + TTL cache over whole query responses.
pub struct SearchCache<T> {
    cache: Mutex<LruCache<String, (T, Instant)>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

impl<T> SearchCache<T> {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        let capacity =
            std::num::NonZeroUsize::new(capacity.max(1)).expect("capacity is clamped to >= 1");
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(ttl_secs),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<T>
    where
        T: Clone,
    {
        let mut cache = self.cache.lock();
        if let Some((value, timestamp)) = cache.get(key) {
            if timestamp.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn set(&self, key: &str, value: T) {
        let mut cache = self.cache.lock();
        cache.put(key.to_string(), (value, Instant::now()));
    }

    /// Digest over everything that affects the result: query text, focus
    /// set and the full per-query config.
    pub fn make_key(query: &str, focus: &[String], config: &SearchConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        for item in focus {
            hasher.update(item.as_bytes());
        }
        if let Ok(serialized) = serde_json::to_vec(config) {
            hasher.update(&serialized);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.cache.lock().len(),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}
