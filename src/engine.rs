//! Trade engine
//!
//! The facade tying wallet, chain sync, trade construction, and execution
//! together. Holds the session's mutable slots (requested amount, current
//! trade) and exposes the operations the binary drives.

use crate::config::{EngineConfig, TokensConfig};
use crate::error::{EngineError, EngineResult};
use crate::executor::{TradeExecutor, TransactionState};
use crate::provider::ChainProvider;
use crate::sync::{BalanceSnapshot, ChainSync};
use crate::trade::{self, Trade};
use crate::wallet::WalletConnection;

use ethers::types::{Address, H256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Point-in-time view of the session, for status reporting
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub address: Option<Address>,
    pub block_number: u64,
    pub balances: Option<BalanceSnapshot>,
    pub trade: Option<String>,
    pub tx_state: TransactionState,
}

pub struct TradeEngine {
    provider: Arc<dyn ChainProvider>,
    wallet: Arc<WalletConnection>,
    sync: Arc<ChainSync>,
    executor: TradeExecutor,
    tokens: TokensConfig,
    quote_ttl_blocks: u64,
    amount: RwLock<f64>,
    trade: RwLock<Option<Trade>>,
}

impl TradeEngine {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        wallet: Arc<WalletConnection>,
        sync: Arc<ChainSync>,
        tokens: TokensConfig,
        engine: &EngineConfig,
    ) -> Self {
        let executor = TradeExecutor::new(provider.clone(), wallet.clone());
        Self {
            provider,
            wallet,
            sync,
            executor,
            tokens,
            quote_ttl_blocks: engine.quote_ttl_blocks,
            amount: RwLock::new(1.0),
            trade: RwLock::new(None),
        }
    }

    /// Change the requested input amount. The current trade is untouched;
    /// the new amount takes effect on the next [`TradeEngine::create_trade`].
    pub async fn set_amount(&self, amount: f64) -> EngineResult<()> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        *self.amount.write().await = amount;
        Ok(())
    }

    pub async fn amount(&self) -> f64 {
        *self.amount.read().await
    }

    /// Connect the wallet and bring balances current for the new address
    pub async fn connect_wallet(&self) -> EngineResult<Address> {
        let address = self.wallet.connect().await?;
        self.sync.refresh().await;
        Ok(address)
    }

    /// Construct a fresh trade for the current amount against current chain
    /// state. Balances are refreshed first so the quote and the snapshot
    /// describe the same state. On failure the previous trade stays in place.
    pub async fn create_trade(&self) -> EngineResult<Trade> {
        self.sync.refresh().await;

        let amount = *self.amount.read().await;
        let block_number = self.sync.block_number().await;
        let built = trade::build_trade(&self.provider, &self.tokens, amount, block_number).await?;

        info!("Trade ready: {}", built.display());
        *self.trade.write().await = Some(built.clone());
        self.executor.reset().await;

        Ok(built)
    }

    /// Execute the current trade, if any. Absent trade is a no-op.
    pub async fn execute_trade(&self) -> TransactionState {
        let trade = self.trade.read().await.clone();

        if let Some(ref t) = trade {
            let current = self.sync.block_number().await;
            if t.is_stale(current, self.quote_ttl_blocks) {
                warn!(
                    "Executing trade quoted at block {} at block {}",
                    t.block_number(),
                    current
                );
            }
        }

        self.executor.execute(trade.as_ref()).await
    }

    /// Wrap native currency into its ERC-20 form (local-node convenience)
    pub async fn wrap_native(&self, amount: f64) -> EngineResult<H256> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        let tx_hash = self.provider.wrap_native(amount).await?;
        self.sync.refresh().await;
        Ok(tx_hash)
    }

    pub async fn current_trade(&self) -> Option<Trade> {
        self.trade.read().await.clone()
    }

    pub async fn transaction_state(&self) -> TransactionState {
        self.executor.state().await
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            address: self.wallet.current_address().await,
            block_number: self.sync.block_number().await,
            balances: self.sync.balances().await,
            trade: self.trade.read().await.as_ref().map(Trade::display),
            tx_state: self.executor.state().await,
        }
    }
}
