//! Prometheus exporter
//!
//! Counters live on each [`Group`](crate::group::Group) as atomics. A scrape
//! copies them into a fresh registry, so nothing here holds state between
//! scrapes.

use hyper::StatusCode;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;

use crate::error::{Error, Result};
use crate::group::{self, GroupStatsSnapshot};
use crate::http as transport;

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
    Ok(vec)
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(name, help), labels)
        .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
    Ok(vec)
}

/// Render every registered group
pub fn render() -> Result<String> {
    let snapshots: Vec<GroupStatsSnapshot> = group::group_names()
        .iter()
        .filter_map(|name| group::get_group(name))
        .map(|g| g.stats())
        .collect();
    render_snapshots(&snapshots)
}

fn render_snapshots(snapshots: &[GroupStatsSnapshot]) -> Result<String> {
    let registry = Registry::new_custom(Some("carrotcache".to_string()), None)
        .map_err(|e| Error::Internal(format!("metrics registry: {}", e)))?;

    let group_counters = [
        ("gets_total", "Lookups with a non-empty key"),
        ("main_hits_total", "Lookups served by the main tier"),
        ("hot_hits_total", "Lookups served by the hot tier"),
        ("loads_total", "Lookups that missed both tiers"),
        ("loads_deduped_total", "Loads executed after coalescing"),
        ("peer_loads_total", "Values fetched from a peer"),
        ("peer_errors_total", "Failed peer fetches"),
        ("local_loads_total", "Values loaded from the local getter"),
        ("local_load_errors_total", "Failed local getter loads"),
        ("promotions_total", "Keys promoted to the hot tier"),
        ("empty_keys_total", "Lookups rejected for an empty key"),
    ];
    let mut counters = Vec::with_capacity(group_counters.len());
    for (name, help) in group_counters {
        counters.push(counter(&registry, name, help, &["group"])?);
    }

    let tier_bytes = gauge(&registry, "cache_bytes", "Bytes resident in a tier", &["group", "tier"])?;
    let tier_items = gauge(&registry, "cache_items", "Entries resident in a tier", &["group", "tier"])?;
    let tier_gets = counter(&registry, "cache_gets_total", "Tier lookups", &["group", "tier"])?;
    let tier_hits = counter(&registry, "cache_hits_total", "Tier hits", &["group", "tier"])?;
    let tier_evictions = counter(
        &registry,
        "cache_evictions_total",
        "Entries evicted for capacity",
        &["group", "tier"],
    )?;

    for s in snapshots {
        let values = [
            s.gets,
            s.main_hits,
            s.hot_hits,
            s.loads,
            s.loads_deduped,
            s.peer_loads,
            s.peer_errors,
            s.local_loads,
            s.local_load_errors,
            s.promotions,
            s.empty_keys,
        ];
        for (vec, value) in counters.iter().zip(values) {
            vec.with_label_values(&[s.name.as_str()]).inc_by(value);
        }

        for (tier, stats) in [("main", &s.main_cache), ("hot", &s.hot_cache)] {
            let labels = [s.name.as_str(), tier];
            tier_bytes.with_label_values(&labels).set(stats.bytes as i64);
            tier_items.with_label_values(&labels).set(stats.items as i64);
            tier_gets.with_label_values(&labels).inc_by(stats.gets);
            tier_hits.with_label_values(&labels).inc_by(stats.hits);
            tier_evictions.with_label_values(&labels).inc_by(stats.evictions);
        }
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("encoding metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("encoding metrics: {}", e)))
}

/// Serve `/metrics` on `listener`
pub async fn serve_metrics(listener: TcpListener) -> Result<()> {
    transport::serve(listener, "Metrics server", |req| async move {
        match req.uri().path() {
            "/metrics" => match render() {
                Ok(body) => transport::reply_with_type(
                    StatusCode::OK,
                    "text/plain; version=0.0.4",
                    body,
                ),
                Err(e) => transport::reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
            _ => transport::reply(StatusCode::NOT_FOUND, "not found"),
        }
    })
    .await
}
