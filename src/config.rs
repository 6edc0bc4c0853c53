//! Configuration
//!
//! [`GroupConfig`] sizes one group's cache tiers and sets its hotspot
//! threshold. [`ClusterConfig`] describes a whole node: its own address,
//! the peer set and the groups it serves. Cluster files may be YAML or JSON,
//! picked by extension.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consistenthash::DEFAULT_REPLICAS;
use crate::error::{Error, Result};

/// URL prefix for peer-to-peer requests
pub const DEFAULT_BASE_PATH: &str = "/_carrotcache/";

/// Remote fetches per minute that make a key hot
pub const DEFAULT_HOT_PROMOTION_QPM: i64 = 10;

/// Share of the byte budget given to the main tier
pub const DEFAULT_MAIN_CACHE_RATIO: f64 = 0.875;

// =============================================================================
// Group Configuration
// =============================================================================

/// Sizing and promotion policy for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Combined byte budget of both tiers; 0 means unbounded
    pub cache_bytes: u64,

    /// Fraction of `cache_bytes` for the main tier, the rest goes to the hot tier
    pub main_cache_ratio: f64,

    /// Remote fetches per minute at or above which a key is promoted
    pub hot_promotion_qpm: i64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            cache_bytes: 64 << 20,
            main_cache_ratio: DEFAULT_MAIN_CACHE_RATIO,
            hot_promotion_qpm: DEFAULT_HOT_PROMOTION_QPM,
        }
    }
}

impl GroupConfig {
    /// Default policy with the given byte budget
    pub fn for_capacity(cache_bytes: u64) -> Self {
        Self {
            cache_bytes,
            ..Default::default()
        }
    }

    fn main_share(&self) -> u64 {
        ((self.cache_bytes as f64 * self.main_cache_ratio) as u64).min(self.cache_bytes)
    }

    /// Byte budget of the main tier. A bounded group never yields an
    /// unbounded tier, so the result is at least 1 when `cache_bytes` is set.
    pub fn main_cache_bytes(&self) -> u64 {
        if self.cache_bytes == 0 {
            return 0;
        }
        self.main_share().max(1)
    }

    /// Byte budget of the hot tier, at least 1 when `cache_bytes` is set
    pub fn hot_cache_bytes(&self) -> u64 {
        if self.cache_bytes == 0 {
            return 0;
        }
        (self.cache_bytes - self.main_share()).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.main_cache_ratio > 0.0 && self.main_cache_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "main_cache_ratio must be in (0, 1], got {}",
                self.main_cache_ratio
            )));
        }
        if self.hot_promotion_qpm <= 0 {
            return Err(Error::Config(format!(
                "hot_promotion_qpm must be positive, got {}",
                self.hot_promotion_qpm
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Cluster Configuration
// =============================================================================

/// A group served by this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,

    #[serde(flatten)]
    pub config: GroupConfig,
}

/// Node-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// This node's peer address, e.g. `http://localhost:8001`
    pub self_addr: String,

    /// Front-end API bind address, if the node serves one
    pub api_addr: Option<String>,

    /// Every peer address, this node included
    pub peers: Vec<String>,

    /// Virtual nodes per peer on the hash ring
    pub replicas: usize,

    /// URL prefix for peer requests
    pub base_path: String,

    pub groups: Vec<GroupSpec>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            self_addr: "http://localhost:8001".to_string(),
            api_addr: None,
            peers: Vec::new(),
            replicas: DEFAULT_REPLICAS,
            base_path: DEFAULT_BASE_PATH.to_string(),
            groups: Vec::new(),
        }
    }
}

impl ClusterConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config = match ext.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml(&raw)?,
            Some("json") => Self::from_json(&raw)?,
            _ => {
                return Err(Error::Config(format!(
                    "Unsupported config format: {}",
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("Invalid YAML: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("Invalid JSON: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.self_addr.is_empty() {
            return Err(Error::Config("self_addr is required".into()));
        }
        if self.replicas == 0 {
            return Err(Error::Config("replicas must be at least 1".into()));
        }
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(Error::Config(format!(
                "base_path must start and end with '/', got {}",
                self.base_path
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(Error::Config("group name is required".into()));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(Error::Config(format!("duplicate group: {}", group.name)));
            }
            group.config.validate()?;
        }
        Ok(())
    }
}
