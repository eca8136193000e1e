//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connectivity and head height
//! - Proof verification outcomes
//! - Swap and transfer transitions
//! - Oracle retries and rejected transitions

use crate::error::{SettlementError, SettlementResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "settlement_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_HEAD_HEIGHT: GaugeVec = register_gauge_vec!(
        "settlement_chain_head_height",
        "Last observed head height per chain",
        &["chain_id"]
    ).unwrap();

    pub static ref ORACLE_RETRIES: CounterVec = register_counter_vec!(
        "settlement_oracle_retries_total",
        "Chain reads retried after a transient failure",
        &["operation"]
    ).unwrap();

    // Proof metrics
    pub static ref PROOFS_VERIFIED: CounterVec = register_counter_vec!(
        "settlement_proofs_verified_total",
        "Proof verifications by result",
        &["result"]
    ).unwrap();

    // Entity metrics
    pub static ref TRANSITIONS: CounterVec = register_counter_vec!(
        "settlement_transitions_total",
        "Accepted transitions by entity kind and resulting status",
        &["kind", "status"]
    ).unwrap();

    pub static ref REJECTED_TRANSITIONS: CounterVec = register_counter_vec!(
        "settlement_rejected_transitions_total",
        "Rejected transitions by entity kind and error kind",
        &["kind", "error"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_PUBLISHED: CounterVec = register_counter_vec!(
        "settlement_events_published_total",
        "Domain events published by type",
        &["event_type"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECKS: CounterVec = register_counter_vec!(
        "settlement_health_checks_total",
        "Periodic health checks by outcome",
        &["outcome"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SettlementResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SettlementError::Config(format!("cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SettlementError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> SettlementResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| SettlementError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| SettlementError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_head_height(chain_id: u64, height: u64) {
    CHAIN_HEAD_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(height as f64);
}

pub fn record_oracle_retry(operation: &str) {
    ORACLE_RETRIES.with_label_values(&[operation]).inc();
}

pub fn record_proof_verified(result: &str) {
    PROOFS_VERIFIED.with_label_values(&[result]).inc();
}

pub fn record_transition(kind: &str, status: &str) {
    TRANSITIONS.with_label_values(&[kind, status]).inc();
}

pub fn record_rejected_transition(kind: &str, error: &str) {
    REJECTED_TRANSITIONS.with_label_values(&[kind, error]).inc();
}

pub fn record_event_published(event_type: &str) {
    EVENTS_PUBLISHED.with_label_values(&[event_type]).inc();
}

pub fn record_health_check(healthy: bool) {
    let outcome = if healthy { "success" } else { "failure" };
    HEALTH_CHECKS.with_label_values(&[outcome]).inc();
}
