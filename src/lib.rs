//! carrotcache - distributed in-process key-value cache
//!
//! Every node runs the same library. A key is owned by exactly one node,
//! chosen by a consistent hash ring over the peer set; other nodes ask the
//! owner instead of hitting the source of truth themselves.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           Group                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────────┐   │
//! │  │ main tier  │──▶│  hot tier  │──▶│   SingleFlight load  │   │
//! │  │ (LRU 7/8)  │   │ (LRU 1/8)  │   │  peer ▸ local getter │   │
//! │  └────────────┘   └────────────┘   └──────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//!                 │ PeerPicker (HttpPool + HashRing)
//!                 ▼
//!           other nodes, /_carrotcache/<group>/<key>
//! ```
//!
//! # Modules
//!
//! - [`byteview`] - Immutable cached values
//! - [`cache`] - LRU store and the lock-guarded tier around it
//! - [`clock`] - Injectable time source for hotspot accounting
//! - [`config`] - Group and cluster configuration
//! - [`consistenthash`] - Consistent hash ring
//! - [`error`] - Error types
//! - [`group`] - Groups, getters and the group registry
//! - [`http`] - Peer pool, peer client and the front-end API
//! - [`metrics`] - Prometheus exporter
//! - [`peers`] - Peer selection traits
//! - [`protocol`] - Peer request/response codec
//! - [`singleflight`] - Request coalescing

pub mod byteview;
pub mod cache;
pub mod clock;
pub mod config;
pub mod consistenthash;
pub mod error;
pub mod group;
pub mod http;
pub mod metrics;
pub mod peers;
pub mod protocol;
pub mod singleflight;

// Re-export commonly used types
pub use byteview::ByteView;
pub use config::{ClusterConfig, GroupConfig};
pub use consistenthash::HashRing;
pub use error::{Error, Result};
pub use group::{get_group, group_names, new_group, Getter, GetterFunc, Group};
pub use http::{HttpGetter, HttpPool};
pub use peers::{PeerGetter, PeerPicker};
