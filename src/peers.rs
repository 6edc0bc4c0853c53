//! Peer selection and remote fetch capabilities.
//!
//! A [`Group`](crate::group::Group) only knows these two traits. The HTTP
//! transport in [`crate::http`] is one implementation; tests plug in
//! in-process fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Request, Response};

/// Locates the peer that owns a key
pub trait PeerPicker: Send + Sync {
    /// Owning peer for `key`, or `None` when the ring is empty or the key
    /// belongs to this node.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches a value from one remote peer
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Ask the peer for `request.key` in `request.group`
    async fn get(&self, request: &Request) -> Result<Response>;
}
