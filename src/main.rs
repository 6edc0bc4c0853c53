//! carrotcache node
//!
//! Runs one cache node: the peer server, optionally the front-end API and a
//! Prometheus endpoint. Without `--config` it serves the demo `scores` group
//! from a slow in-memory table on a three-node local peer set:
//!
//! ```text
//! carrotcache --port 8051
//! carrotcache --port 8052
//! carrotcache --port 8053 --api
//! curl 'http://localhost:9994/api?key=Tom'
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use carrotcache::config::{ClusterConfig, GroupConfig, GroupSpec};
use carrotcache::error::{Error, Result};
use carrotcache::group::{Getter, Group};
use carrotcache::http::{self, api, HttpPool};
use carrotcache::metrics;

// =============================================================================
// CLI Arguments
// =============================================================================

/// carrotcache - distributed in-process key-value cache node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Peer server port, used when no config file is given
    #[arg(long, env = "CARROTCACHE_PORT", default_value = "8051")]
    port: u16,

    /// Also start the front-end API server
    #[arg(long, env = "CARROTCACHE_API")]
    api: bool,

    /// Front-end API bind address
    #[arg(long, env = "CARROTCACHE_API_ADDR", default_value = "127.0.0.1:9994")]
    api_addr: String,

    /// Comma-separated peer addresses, this node included
    #[arg(
        long,
        env = "CARROTCACHE_PEERS",
        value_delimiter = ',',
        default_value = "http://localhost:8051,http://localhost:8052,http://localhost:8053"
    )]
    peers: Vec<String>,

    /// Cluster config file (YAML or JSON); overrides port and peers
    #[arg(long, env = "CARROTCACHE_CONFIG")]
    config: Option<String>,

    /// Virtual nodes per peer on the hash ring
    #[arg(long, env = "CARROTCACHE_REPLICAS", default_value = "50")]
    replicas: usize,

    /// Byte budget of the demo group
    #[arg(long, env = "CARROTCACHE_CACHE_BYTES", default_value = "2048")]
    cache_bytes: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Demo Source of Truth
// =============================================================================

/// In-memory table standing in for a slow database
struct SlowDb;

#[async_trait]
impl Getter for SlowDb {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        info!(key, "[SlowDB] search key");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let value = match key {
            "Tom" => "630",
            "Jack" => "589",
            "Sam" => "567",
            "Lily" => "589",
            "Pity" => "567",
            _ => return Err(Error::NotFound(key.to_string())),
        };
        Ok(value.as_bytes().to_vec())
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let cluster = cluster_config(&args)?;

    info!("Starting carrotcache node");
    info!("  Self: {}", cluster.self_addr);
    info!("  Peers: {}", cluster.peers.join(", "));
    info!("  Replicas: {}", cluster.replicas);

    let pool = Arc::new(HttpPool::with_options(
        cluster.self_addr.clone(),
        cluster.base_path.clone(),
        cluster.replicas,
    )?);
    pool.set(&cluster.peers);

    let getter: Arc<dyn Getter> = Arc::new(SlowDb);
    let mut groups = Vec::with_capacity(cluster.groups.len());
    for spec in &cluster.groups {
        let group = Group::builder(spec.name.clone(), Arc::clone(&getter))
            .config(spec.config.clone())
            .register();
        group.register_peers(pool.clone());
        groups.push(group);
    }

    // Start API server
    if let (Some(api_addr), Some(group)) = (cluster.api_addr.clone(), groups.first().cloned()) {
        let listener = http::bind(&api_addr).await?;
        tokio::spawn(async move {
            if let Err(e) = api::serve_api(listener, group).await {
                error!("API server error: {}", e);
            }
        });
    }

    // Start metrics server
    if let Some(metrics_addr) = args.metrics_addr.clone() {
        let listener = http::bind(&metrics_addr).await?;
        tokio::spawn(async move {
            if let Err(e) = metrics::serve_metrics(listener).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    // Run the peer server
    let listener = http::bind(&listen_addr(&cluster.self_addr)?).await?;
    info!("carrotcache is running at {}", cluster.self_addr);
    pool.serve(listener).await?;

    info!("Node shutdown complete");
    Ok(())
}

/// Cluster settings from `--config`, or the demo layout built from flags
fn cluster_config(args: &Args) -> Result<ClusterConfig> {
    if let Some(path) = &args.config {
        info!("Loading config from {}", path);
        return ClusterConfig::from_file(path);
    }

    let config = ClusterConfig {
        self_addr: format!("http://localhost:{}", args.port),
        api_addr: args.api.then(|| args.api_addr.clone()),
        peers: args.peers.clone(),
        replicas: args.replicas,
        groups: vec![GroupSpec {
            name: "scores".to_string(),
            config: GroupConfig::for_capacity(args.cache_bytes),
        }],
        ..Default::default()
    };
    config.validate()?;
    Ok(config)
}

/// Bind address for a peer address such as `http://localhost:8051`
fn listen_addr(self_addr: &str) -> Result<String> {
    let port = self_addr
        .rsplit_once(':')
        .and_then(|(_, port)| port.trim_end_matches('/').parse::<u16>().ok())
        .ok_or_else(|| Error::Config(format!("self_addr has no port: {}", self_addr)))?;
    Ok(format!("0.0.0.0:{}", port))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
