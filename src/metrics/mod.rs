//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain sync progress
//! - Balance refreshes
//! - Trade lifecycle

use crate::error::EngineResult;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_gauge, Counter, Encoder, Gauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref BLOCK_HEIGHT: Gauge = register_gauge!(
        "swapflow_block_height",
        "Last observed block number"
    ).unwrap();

    pub static ref BALANCE_REFRESHES: Counter = register_counter!(
        "swapflow_balance_refreshes_total",
        "Total completed balance refreshes"
    ).unwrap();

    pub static ref BALANCE_REFRESH_FAILURES: Counter = register_counter!(
        "swapflow_balance_refresh_failures_total",
        "Total failed balance refreshes"
    ).unwrap();

    // Wallet metrics
    pub static ref WALLET_CONNECTIONS: Counter = register_counter!(
        "swapflow_wallet_connections_total",
        "Total wallet connections established"
    ).unwrap();

    // Trade metrics
    pub static ref TRADES_CONSTRUCTED: Counter = register_counter!(
        "swapflow_trades_constructed_total",
        "Total trades constructed"
    ).unwrap();

    pub static ref TRADES_SUBMITTED: Counter = register_counter!(
        "swapflow_trades_submitted_total",
        "Total trades accepted by the network"
    ).unwrap();

    pub static ref TRADES_FAILED: Counter = register_counter!(
        "swapflow_trades_failed_total",
        "Total trades rejected or undeliverable"
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

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::EngineError::Config(format!("metrics bind: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::EngineError::Config(format!("metrics serve: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_block_height(block_number: u64) {
    BLOCK_HEIGHT.set(block_number as f64);
}

pub fn record_balance_refresh() {
    BALANCE_REFRESHES.inc();
}

pub fn record_balance_refresh_failure() {
    BALANCE_REFRESH_FAILURES.inc();
}

pub fn record_wallet_connected() {
    WALLET_CONNECTIONS.inc();
}

pub fn record_trade_constructed() {
    TRADES_CONSTRUCTED.inc();
}

pub fn record_trade_submitted() {
    TRADES_SUBMITTED.inc();
}

pub fn record_trade_failed() {
    TRADES_FAILED.inc();
}
