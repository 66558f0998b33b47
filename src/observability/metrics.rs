//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_rate_limited_total` (counter): denials by protected prefix
//! - `gateway_errors_total` (counter): translated failures by status and kind
//! - `gateway_rate_limit_keys` (gauge): window entries in the store, set on
//!   every admit and after every purge
//!
//! Recording is a no-op until a recorder is installed, so tests and
//! library users pay nothing unless they opt in.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::error::ErrorKind;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_rate_limited(endpoint: &str) {
    counter!("gateway_rate_limited_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_error(kind: ErrorKind) {
    counter!(
        "gateway_errors_total",
        "status" => kind.status().as_u16().to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_rate_limit_keys(count: usize) {
    gauge!("gateway_rate_limit_keys").set(count as f64);
}
