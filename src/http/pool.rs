//! Peer pool: ring-based peer selection plus the peer RPC server

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hyper::StatusCode;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::{reply, reply_with_type, serve, HttpGetter, HttpResponse};
use crate::config::DEFAULT_BASE_PATH;
use crate::consistenthash::{HashRing, DEFAULT_REPLICAS};
use crate::error::{Error, Result};
use crate::group;
use crate::peers::{PeerGetter, PeerPicker};
use crate::protocol::Response as PeerResponse;

/// Per-request timeout for peer fetches
const PEER_TIMEOUT: Duration = Duration::from_secs(10);

struct PoolState {
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// The set of peers this node knows about, including itself
pub struct HttpPool {
    self_addr: String,
    base_path: String,
    replicas: usize,
    client: Client,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_addr", &self.self_addr)
            .field("base_path", &self.base_path)
            .field("peers", &self.state.lock().getters.len())
            .finish()
    }
}

impl HttpPool {
    /// Pool for the node at `self_addr` with the default base path and ring size
    pub fn new(self_addr: impl Into<String>) -> Result<Self> {
        Self::with_options(self_addr, DEFAULT_BASE_PATH, DEFAULT_REPLICAS)
    }

    pub fn with_options(
        self_addr: impl Into<String>,
        base_path: impl Into<String>,
        replicas: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            self_addr: self_addr.into(),
            base_path: base_path.into(),
            replicas,
            client,
            state: Mutex::new(PoolState {
                ring: HashRing::new(replicas),
                getters: HashMap::new(),
            }),
        })
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replace the peer set. Peers are addresses such as
    /// `http://10.0.0.2:8008`; this node's own address should be included.
    pub fn set<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let peers: Vec<String> = peers.into_iter().map(|p| p.as_ref().to_string()).collect();

        let mut ring = HashRing::new(self.replicas);
        ring.add(&peers);
        let getters = peers
            .iter()
            .map(|peer| {
                let getter = HttpGetter::new(
                    format!("{}{}", peer, self.base_path),
                    self.client.clone(),
                );
                (peer.clone(), Arc::new(getter))
            })
            .collect();

        *self.state.lock() = PoolState { ring, getters };
        info!(self_addr = %self.self_addr, peers = peers.len(), "peer set updated");
    }

    /// Serve peer requests on `listener` until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        serve(listener, "Peer server", move |req| {
            let pool = Arc::clone(&self);
            async move { pool.respond(req.uri().path()).await }
        })
        .await
    }

    /// Answer one peer request for `path`, expected as
    /// `<base_path><group>/<key>`.
    pub async fn respond(&self, path: &str) -> HttpResponse {
        debug!(self_addr = %self.self_addr, "peer request {}", path);

        let Some((group_name, key)) = self.parse_path(path) else {
            return reply(StatusCode::BAD_REQUEST, "bad request");
        };

        let Some(group) = group::get_group(&group_name) else {
            return reply(
                StatusCode::NOT_FOUND,
                Error::GroupNotFound(group_name).to_string(),
            );
        };

        match group.get(&key).await {
            Ok(view) => reply_with_type(
                StatusCode::OK,
                "application/octet-stream",
                PeerResponse::new(view.byte_slice()).encode(),
            ),
            Err(e) => {
                warn!(group = %group_name, key = %key, error = %e, "peer request failed");
                reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    fn parse_path(&self, path: &str) -> Option<(String, String)> {
        let rest = path.strip_prefix(self.base_path.as_str())?;
        let (group, key) = rest.split_once('/')?;
        let group = urlencoding::decode(group).ok()?.into_owned();
        let key = urlencoding::decode(key).ok()?.into_owned();
        if group.is_empty() {
            return None;
        }
        Some((group, key))
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.lock();
        let peer = state.ring.get(key)?;
        if peer == self.self_addr {
            return None;
        }
        debug!(self_addr = %self.self_addr, key, peer, "picked peer");
        state
            .getters
            .get(peer)
            .map(|getter| Arc::clone(getter) as Arc<dyn PeerGetter>)
    }
}
