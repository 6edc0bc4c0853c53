//! Local cache tiers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ConcurrentCache (one Mutex per tier)         │
//! │   └── Option<LruCache<ByteView>> (lazy)      │
//! │         ├── HashMap<String, slot>            │
//! │         └── recency list  MRU ◄──► LRU       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A group owns two tiers: the main cache, filled from the local source of
//! truth, and the hot cache, filled only by hotspot promotion.

mod concurrent;
mod lru;

pub use concurrent::{CacheStats, ConcurrentCache};
pub use lru::{LruCache, OnEvicted};

/// A value whose byte size can be measured once at insertion
pub trait Value {
    /// Size in bytes charged against the store's budget
    fn len(&self) -> usize;

    /// True when the value has no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

