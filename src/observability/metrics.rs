//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_relay_resolve_total` (counter): resolves by outcome
//!   (`hit`, `fetched`, `stale`, `not_found`, `unavailable`)
//! - `config_relay_resolve_duration_seconds` (histogram)
//! - `config_relay_store_fetch_total` (counter): store fetches by store, outcome
//! - `config_relay_store_fetch_seconds` (histogram)
//! - `config_relay_cache_entries` (gauge)
//! - `config_relay_fetch_coalesced_total` (counter): callers that joined an in-flight fetch
//! - `config_relay_webhooks_total` (counter): by provider, outcome
//! - `config_relay_bus_published_total` (counter)
//! - `config_relay_bus_subscribers` (gauge)
//! - `config_relay_agent_refresh_total` (counter): by outcome
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::model::ConfigDocument;
use crate::store::StoreError;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_resolve(outcome: &'static str, start: Instant) {
    metrics::counter!("config_relay_resolve_total", "outcome" => outcome).increment(1);
    metrics::histogram!("config_relay_resolve_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_store_fetch(store: &str, result: &Result<ConfigDocument, StoreError>, start: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(StoreError::NotFound(_)) => "not_found",
        Err(StoreError::Unavailable(_)) => "unavailable",
        Err(StoreError::Invalid { .. }) => "invalid",
    };
    let store = store.to_string();
    metrics::counter!("config_relay_store_fetch_total", "store" => store.clone(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("config_relay_store_fetch_seconds", "store" => store)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("config_relay_cache_entries").set(entries as f64);
}

pub fn record_coalesced() {
    metrics::counter!("config_relay_fetch_coalesced_total").increment(1);
}

pub fn record_webhook(provider: &'static str, outcome: &'static str) {
    metrics::counter!("config_relay_webhooks_total", "provider" => provider, "outcome" => outcome)
        .increment(1);
}

pub fn record_bus_published() {
    metrics::counter!("config_relay_bus_published_total").increment(1);
}

pub fn record_bus_subscribers(count: usize) {
    metrics::gauge!("config_relay_bus_subscribers").set(count as f64);
}

pub fn record_agent_refresh(outcome: &'static str) {
    metrics::counter!("config_relay_agent_refresh_total", "outcome" => outcome).increment(1);
}
