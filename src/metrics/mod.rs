//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Transfer state transitions and mint retries
//! - Fan-out failures per operation and chain
//! - Arbitrage outcomes and unrepaid flash loans

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::transfer::TransferState;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, Counter, CounterVec, Encoder,
    GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "orchestrator_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref FANOUT_FAILURES: CounterVec = register_counter_vec!(
        "orchestrator_fanout_failures_total",
        "Per-chain failures inside fan-out operations",
        &["operation", "chain_id"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "orchestrator_transactions_sent_total",
        "Total transactions broadcast",
        &["chain_id"]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFERS: CounterVec = register_counter_vec!(
        "orchestrator_transfers_total",
        "Transfer records reaching each state",
        &["state"]
    ).unwrap();

    pub static ref MINT_RETRIES: Counter = register_counter!(
        "orchestrator_mint_retries_total",
        "Total mint retries for stuck transfers"
    ).unwrap();

    pub static ref RECONCILE_EXHAUSTED: Counter = register_counter!(
        "orchestrator_reconcile_exhausted_total",
        "Stuck transfers that ran out of mint attempts"
    ).unwrap();

    // Strategy metrics
    pub static ref ARBITRAGE: CounterVec = register_counter_vec!(
        "orchestrator_arbitrage_total",
        "Arbitrage runs by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref FLASH_LOANS_UNREPAID: Counter = register_counter!(
        "orchestrator_flash_loans_unrepaid_total",
        "Flash loans left outstanding after a failed strategy or repay"
    ).unwrap();

    // Wallet metrics
    pub static ref WALLET_BALANCE: GaugeVec = register_gauge_vec!(
        "orchestrator_wallet_balance",
        "Wallet native balance in whole tokens",
        &["chain_id"]
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

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Text exposition of every registered metric
pub fn render() -> OrchestratorResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| OrchestratorError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_fanout_failure(operation: &str, chain_id: u64) {
    FANOUT_FAILURES
        .with_label_values(&[operation, &chain_id.to_string()])
        .inc();
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_transfer_state(state: TransferState) {
    TRANSFERS.with_label_values(&[state.as_str()]).inc();
}

pub fn record_mint_retry() {
    MINT_RETRIES.inc();
}

pub fn record_reconcile_exhausted() {
    RECONCILE_EXHAUSTED.inc();
}

pub fn record_arbitrage(outcome: &str) {
    ARBITRAGE.with_label_values(&[outcome]).inc();
}

pub fn record_flash_loan_unrepaid() {
    FLASH_LOANS_UNREPAID.inc();
}

pub fn record_wallet_balance(chain_id: u64, balance: f64) {
    WALLET_BALANCE
        .with_label_values(&[&chain_id.to_string()])
        .set(balance);
}
