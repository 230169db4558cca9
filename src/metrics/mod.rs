//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Session lifecycle
//! - Attestation intake and verification
//! - Intent compilation
//! - Ledger execution

use crate::error::{VesError, VesResult};
use crate::state::StateType;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Session metrics
    pub static ref SESSIONS_OPENED: CounterVec = register_counter_vec!(
        "ves_sessions_opened_total",
        "Total sessions opened",
        &[]
    ).unwrap();

    pub static ref SESSIONS_EVICTED: CounterVec = register_counter_vec!(
        "ves_sessions_evicted_total",
        "Total sessions evicted before completion",
        &[]
    ).unwrap();

    // Attestation metrics
    pub static ref ATTESTATIONS_RECEIVED: CounterVec = register_counter_vec!(
        "ves_attestations_received_total",
        "Total verified attestations accepted by state",
        &["state"]
    ).unwrap();

    pub static ref VERIFICATION_FAILURES: CounterVec = register_counter_vec!(
        "ves_verification_failures_total",
        "Total attestations failing signature verification",
        &[]
    ).unwrap();

    // Compiler metrics
    pub static ref INTENTS_COMPILED: CounterVec = register_counter_vec!(
        "ves_transaction_intents_compiled_total",
        "Total transaction intents produced by the compiler",
        &[]
    ).unwrap();

    // Ledger metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "ves_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_EXECUTED: CounterVec = register_counter_vec!(
        "ves_transactions_executed_total",
        "Total transaction intents executed by kind",
        &["chain_id", "trans_type"]
    ).unwrap();

    pub static ref RECEIPT_LATENCY: HistogramVec = register_histogram_vec!(
        "ves_receipt_latency_seconds",
        "Time from submission to receipt",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
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

    pub async fn run(&self) -> VesResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| VesError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| VesError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_session_opened() {
    SESSIONS_OPENED.with_label_values(&[]).inc();
}

pub fn record_session_evicted() {
    SESSIONS_EVICTED.with_label_values(&[]).inc();
}

pub fn record_attestation_received(state: StateType) {
    ATTESTATIONS_RECEIVED
        .with_label_values(&[state.as_str()])
        .inc();
}

pub fn record_verification_failure() {
    VERIFICATION_FAILURES.with_label_values(&[]).inc();
}

pub fn record_intents_compiled(count: usize) {
    INTENTS_COMPILED
        .with_label_values(&[])
        .inc_by(count as f64);
}

pub fn record_chain_health(chain_id: &str, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[chain_id])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_tx_executed(chain_id: &str, trans_type: &str) {
    TX_EXECUTED
        .with_label_values(&[chain_id, trans_type])
        .inc();
}

pub fn record_receipt_latency(chain_id: &str, latency_secs: f64) {
    RECEIPT_LATENCY
        .with_label_values(&[chain_id])
        .observe(latency_secs);
}
