//! Mutex-guarded cache tier
//!
//! Wraps one [`LruCache`] behind a single `parking_lot::Mutex`. Reads take
//! the same lock as writes because a hit reorders the recency list. The
//! store is only built on the first `add`, so a tier that never receives a
//! value (typically the hot tier) never allocates bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::lru::LruCache;
use crate::byteview::ByteView;

/// Point-in-time statistics for one tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Bytes accounted to resident values
    pub bytes: u64,
    /// Resident entries
    pub items: u64,
    /// Lookups
    pub gets: u64,
    /// Lookups that found a value
    pub hits: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
}

/// Thread-safe, lazily initialised LRU tier
#[derive(Debug)]
pub struct ConcurrentCache {
    cache_bytes: u64,
    lru: Mutex<Option<LruCache<ByteView>>>,
    gets: AtomicU64,
    hits: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl ConcurrentCache {
    /// Create an empty tier with a byte budget; the store is built later.
    pub fn new(cache_bytes: u64) -> Self {
        Self {
            cache_bytes,
            lru: Mutex::new(None),
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Insert or replace a value
    pub fn add(&self, key: &str, value: ByteView) {
        let mut guard = self.lru.lock();
        let lru = guard.get_or_insert_with(|| {
            let evictions = Arc::clone(&self.evictions);
            LruCache::new(self.cache_bytes).with_on_evicted(Box::new(move |_, _| {
                evictions.fetch_add(1, Ordering::Relaxed);
            }))
        });
        lru.add(key, value);
    }

    /// Look up a value. A tier that was never written is a guaranteed miss.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.lru.lock();
        let value = guard.as_mut()?.get(key).cloned();
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Residency check that neither counts as a lookup nor moves recency
    pub fn contains(&self, key: &str) -> bool {
        self.lru
            .lock()
            .as_ref()
            .map(|lru| lru.contains(key))
            .unwrap_or(false)
    }

    /// True once the first value has been added
    pub fn is_initialized(&self) -> bool {
        self.lru.lock().is_some()
    }

    /// Configured byte budget
    pub fn cache_bytes(&self) -> u64 {
        self.cache_bytes
    }

    /// Snapshot of tier statistics
    pub fn stats(&self) -> CacheStats {
        let (bytes, items) = self
            .lru
            .lock()
            .as_ref()
            .map(|lru| (lru.bytes(), lru.len() as u64))
            .unwrap_or((0, 0));

        CacheStats {
            bytes,
            items,
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
