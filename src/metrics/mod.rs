//! Metrics module
//!
//! Exposes group and tier statistics in Prometheus text format.

mod exporter;

pub use exporter::{render, serve_metrics};
