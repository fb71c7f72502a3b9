//! Swapflow - single-pair DEX trade engine
//!
//! Keeps a session synchronized with chain state (block cursor, wallet
//! balances) and drives the trade lifecycle: construct a priced trade for
//! the configured pair, then sign and submit it through the router.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod config;
mod engine;
mod error;
mod executor;
mod metrics;
mod provider;
mod sync;
mod trade;
mod wallet;

use config::{Environment, Settings};
use engine::TradeEngine;
use metrics::MetricsServer;
use provider::{ChainProvider, RpcChainProvider};
use sync::ChainSync;
use wallet::WalletConnection;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Swapflow v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Trading {} -> {} on network '{}'",
        settings.tokens.token_in.symbol, settings.tokens.token_out.symbol, settings.network.active
    );

    // Chain provider and wallet
    let provider: Arc<dyn ChainProvider> = Arc::new(RpcChainProvider::new(&settings).await?);
    let wallet = Arc::new(WalletConnection::new(
        provider.clone(),
        settings.network.environment,
    ));

    // Chain-state synchronizer
    let sync = Arc::new(ChainSync::new(
        provider.clone(),
        wallet.clone(),
        settings.tokens.clone(),
    ));
    sync.start().await?;

    let engine = Arc::new(TradeEngine::new(
        provider,
        wallet,
        sync.clone(),
        settings.tokens.clone(),
        &settings.engine,
    ));

    // Local mode carries its address from construction; connect brings
    // balances current for it
    if settings.network.environment == Environment::Local {
        match engine.connect_wallet().await {
            Ok(address) => info!("Wallet ready: {:?}", address),
            Err(e) => warn!("Wallet connection failed: {}", e),
        }
    }

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Periodic status log
    let status_handle = tokio::spawn({
        let engine = engine.clone();
        let interval = settings.engine.status_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let snapshot = engine.snapshot().await;
                let balances = snapshot
                    .balances
                    .map(|b| format!("{} / {} (block {})", b.token_in, b.token_out, b.block_number))
                    .unwrap_or_else(|| "-".to_string());
                info!(
                    "block={} balances={} trade={} state={}",
                    snapshot.block_number,
                    balances,
                    snapshot.trade.as_deref().unwrap_or("-"),
                    snapshot.tx_state
                );
            }
        }
    });

    info!("Swapflow is running");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown: the synchronizer joins its listener before returning
    sync.teardown().await;

    status_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swapflow stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swapflow=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
