//! Groups: named cache namespaces
//!
//! A [`Group`] answers `get(key)` from, in order:
//!
//! ```text
//! main tier ──miss──▶ hot tier ──miss──▶ coalesced load
//!                                         ├── owning peer (if remote)
//!                                         │     └── hotspot accounting ──▶ hot tier
//!                                         └── local getter ──▶ main tier
//! ```
//!
//! Values fetched from a peer are never written to the main tier; the owner
//! keeps the authoritative copy. A key fetched from its owner often enough
//! (see [`GroupConfig::hot_promotion_qpm`]) is copied into the local hot tier
//! so later reads stop crossing the network.
//!
//! Groups live in a process-wide registry keyed by name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::byteview::ByteView;
use crate::cache::{CacheStats, ConcurrentCache};
use crate::clock::{Clock, SystemClock};
use crate::config::GroupConfig;
use crate::error::{Error, Result};
use crate::peers::{PeerGetter, PeerPicker};
use crate::protocol::Request;
use crate::singleflight::SingleFlight;

// =============================================================================
// Getter
// =============================================================================

/// Source of truth for a group's values
#[async_trait]
pub trait Getter: Send + Sync {
    /// Load the value for `key`. The returned buffer is handed over to the
    /// cache; the getter keeps no handle to it.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Adapts a plain function into a [`Getter`]
pub struct GetterFunc<F>(pub F);

#[async_trait]
impl<F> Getter for GetterFunc<F>
where
    F: Fn(&str) -> Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        (self.0)(key)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Remote fetch accounting for one key
#[derive(Debug)]
struct KeyStats {
    first_get_time: DateTime<Utc>,
    remote_cnt: AtomicI64,
}

impl KeyStats {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_get_time: now,
            remote_cnt: AtomicI64::new(1),
        }
    }

    /// Fetches per minute since the first fetch. Elapsed time is rounded to
    /// whole minutes and never taken below one.
    fn per_minute(&self, now: DateTime<Utc>, count: i64) -> i64 {
        let minutes = (now - self.first_get_time).num_seconds() as f64 / 60.0;
        let divisor = (minutes.round() as i64).max(1);
        count / divisor
    }
}

/// Lock-free counters for one group
#[derive(Debug, Default)]
struct GroupStats {
    gets: AtomicU64,
    main_hits: AtomicU64,
    hot_hits: AtomicU64,
    loads: AtomicU64,
    loads_deduped: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    local_loads: AtomicU64,
    local_load_errors: AtomicU64,
    promotions: AtomicU64,
    empty_keys: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of a group's counters and tier stats
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatsSnapshot {
    pub name: String,
    /// Every `get` with a non-empty key
    pub gets: u64,
    pub main_hits: u64,
    pub hot_hits: u64,
    /// Misses that went to the coalescer
    pub loads: u64,
    /// Loads that actually ran after coalescing
    pub loads_deduped: u64,
    pub peer_loads: u64,
    pub peer_errors: u64,
    pub local_loads: u64,
    pub local_load_errors: u64,
    pub promotions: u64,
    pub empty_keys: u64,
    pub main_cache: CacheStats,
    pub hot_cache: CacheStats,
}

// =============================================================================
// Group
// =============================================================================

/// A named cache namespace with its own getter, tiers and peers
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    config: GroupConfig,
    main_cache: ConcurrentCache,
    hot_cache: ConcurrentCache,
    peers: OnceCell<Arc<dyn PeerPicker>>,
    loader: SingleFlight<ByteView>,
    keys: Mutex<HashMap<String, Arc<KeyStats>>>,
    clock: Arc<dyn Clock>,
    stats: GroupStats,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("peers", &self.peers.get().is_some())
            .finish()
    }
}

impl Group {
    /// Start building a group
    pub fn builder(name: impl Into<String>, getter: Arc<dyn Getter>) -> GroupBuilder {
        GroupBuilder {
            name: name.into(),
            getter,
            config: GroupConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Tier filled from the local getter
    pub fn main_cache(&self) -> &ConcurrentCache {
        &self.main_cache
    }

    /// Tier filled by hotspot promotion
    pub fn hot_cache(&self) -> &ConcurrentCache {
        &self.hot_cache
    }

    /// Attach the peer picker. Panics if one is already attached.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.try_register_peers(peers).is_err() {
            panic!("register_peers called more than once for group {}", self.name);
        }
    }

    /// Attach the peer picker, failing if one is already attached
    pub fn try_register_peers(&self, peers: Arc<dyn PeerPicker>) -> Result<()> {
        self.peers
            .set(peers)
            .map_err(|_| Error::PeersAlreadyRegistered(self.name.clone()))
    }

    /// Look up `key`, loading it on a miss
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            bump(&self.stats.empty_keys);
            return Err(Error::EmptyKey);
        }
        bump(&self.stats.gets);

        if let Some(value) = self.main_cache.get(key) {
            bump(&self.stats.main_hits);
            debug!(group = %self.name, key, "main cache hit");
            return Ok(value);
        }

        if let Some(value) = self.hot_cache.get(key) {
            bump(&self.stats.hot_hits);
            debug!(group = %self.name, key, "hot cache hit");
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        bump(&self.stats.loads);
        self.loader
            .work(key, || async {
                bump(&self.stats.loads_deduped);

                if let Some(peer) = self.peers.get().and_then(|p| p.pick_peer(key)) {
                    match self.get_from_peer(peer.as_ref(), key).await {
                        Ok(value) => {
                            bump(&self.stats.peer_loads);
                            return Ok(value);
                        }
                        Err(e) => {
                            bump(&self.stats.peer_errors);
                            warn!(group = %self.name, key, error = %e, "failed to get from peer");
                        }
                    }
                }

                self.get_locally(key).await
            })
            .await
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        debug!(group = %self.name, key, "loading from getter");
        let bytes = match self.getter.get(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                bump(&self.stats.local_load_errors);
                return Err(e);
            }
        };
        bump(&self.stats.local_loads);

        let value = ByteView::from(bytes);
        self.main_cache.add(key, value.clone());
        Ok(value)
    }

    async fn get_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        let request = Request::new(self.name.as_str(), key);
        let response = peer.get(&request).await?;
        let value = ByteView::from(response.value);
        self.record_remote_fetch(key, &value);
        Ok(value)
    }

    /// Count a remote fetch of `key` and promote it to the hot tier once its
    /// rate reaches the threshold.
    fn record_remote_fetch(&self, key: &str, value: &ByteView) {
        let now = self.clock.now();

        let stats = {
            let mut keys = self.keys.lock();
            match keys.get(key) {
                Some(stats) => Arc::clone(stats),
                None => {
                    keys.insert(key.to_owned(), Arc::new(KeyStats::new(now)));
                    return;
                }
            }
        };

        let count = stats.remote_cnt.fetch_add(1, Ordering::Relaxed) + 1;
        let rate = stats.per_minute(now, count);
        if rate >= self.config.hot_promotion_qpm {
            self.hot_cache.add(key, value.clone());
            self.keys.lock().remove(key);
            bump(&self.stats.promotions);
            info!(group = %self.name, key, rate, "promoted to hot cache");
        }
    }

    /// Whether remote fetches of `key` are currently being counted
    pub fn is_tracking(&self, key: &str) -> bool {
        self.keys.lock().contains_key(key)
    }

    pub fn stats(&self) -> GroupStatsSnapshot {
        let s = &self.stats;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        GroupStatsSnapshot {
            name: self.name.clone(),
            gets: load(&s.gets),
            main_hits: load(&s.main_hits),
            hot_hits: load(&s.hot_hits),
            loads: load(&s.loads),
            loads_deduped: load(&s.loads_deduped),
            peer_loads: load(&s.peer_loads),
            peer_errors: load(&s.peer_errors),
            local_loads: load(&s.local_loads),
            local_load_errors: load(&s.local_load_errors),
            promotions: load(&s.promotions),
            empty_keys: load(&s.empty_keys),
            main_cache: self.main_cache.stats(),
            hot_cache: self.hot_cache.stats(),
        }
    }
}

/// Builder for [`Group`]
pub struct GroupBuilder {
    name: String,
    getter: Arc<dyn Getter>,
    config: GroupConfig,
    clock: Arc<dyn Clock>,
}

impl GroupBuilder {
    pub fn config(mut self, config: GroupConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_bytes(mut self, cache_bytes: u64) -> Self {
        self.config.cache_bytes = cache_bytes;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build a group without registering it
    pub fn build(self) -> Arc<Group> {
        Arc::new(Group {
            main_cache: ConcurrentCache::new(self.config.main_cache_bytes()),
            hot_cache: ConcurrentCache::new(self.config.hot_cache_bytes()),
            name: self.name,
            getter: self.getter,
            config: self.config,
            peers: OnceCell::new(),
            loader: SingleFlight::new(),
            keys: Mutex::new(HashMap::new()),
            clock: self.clock,
            stats: GroupStats::default(),
        })
    }

    /// Build the group and add it to the registry, replacing any group
    /// already registered under the same name.
    pub fn register(self) -> Arc<Group> {
        let group = self.build();
        let replaced = GROUPS
            .write()
            .insert(group.name.clone(), Arc::clone(&group));
        if replaced.is_some() {
            warn!(group = %group.name, "replacing registered group");
        }
        info!(
            group = %group.name,
            main_bytes = group.config.main_cache_bytes(),
            hot_bytes = group.config.hot_cache_bytes(),
            "group registered"
        );
        group
    }
}

// =============================================================================
// Registry
// =============================================================================

static GROUPS: Lazy<RwLock<HashMap<String, Arc<Group>>>> = Lazy::new(Default::default);

/// Create and register a group with the default policy
pub fn new_group(name: impl Into<String>, cache_bytes: u64, getter: Arc<dyn Getter>) -> Arc<Group> {
    Group::builder(name, getter)
        .config(GroupConfig::for_capacity(cache_bytes))
        .register()
}

/// Registered group called `name`
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    GROUPS.read().get(name).cloned()
}

/// Names of all registered groups, sorted
pub fn group_names() -> Vec<String> {
    let mut names: Vec<String> = GROUPS.read().keys().cloned().collect();
    names.sort();
    names
}

// =============================================================================
// Tests
// =============================================================================
