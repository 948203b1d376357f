//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_roundtrips_total` (counter): forwarded requests by service, status.
//!   Names the registry does not know are folded into [`UNKNOWN_SERVICE`].
//! - `proxy_roundtrip_duration_seconds` (histogram): upstream latency by service
//! - `registry_services` (gauge): services in the current snapshot
//! - `registry_refresh_failures_total` (counter): abandoned refresh cycles
//! - `election_is_leader` (gauge): 1 while this process holds the key

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Service label for requests naming a service the registry does not know.
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one proxied round trip.
pub fn record_roundtrip(service: &str, status: u16, start: Instant) {
    counter!(
        "proxy_roundtrips_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_roundtrip_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record a published registry snapshot.
pub fn record_registry_refresh(services: usize) {
    gauge!("registry_services").set(services as f64);
}

/// Record an abandoned registry refresh.
pub fn record_registry_refresh_failure() {
    counter!("registry_refresh_failures_total").increment(1);
}

/// Record the leadership flag for an election key.
pub fn record_leadership(key: &str, is_leader: bool) {
    gauge!("election_is_leader", "key" => key.to_string()).set(if is_leader { 1.0 } else { 0.0 });
}
