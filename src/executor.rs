//! Trade execution
//!
//! Drives the transaction-state machine for the most recently executed
//! trade. The state is a single session slot: callers are expected to keep
//! execution disabled while a submission is in flight, and the executor
//! defensively refuses overlapping executions on top of that.

use crate::provider::{ChainProvider, SubmitOutcome};
use crate::trade::Trade;
use crate::wallet::WalletConnection;

use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Lifecycle state of the most recently executed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Initial state for every freshly constructed trade
    New,
    /// Submitted for signing and broadcast, outcome pending
    Sending,
    /// Accepted by the network (terminal)
    Sent,
    /// Caller-side precondition violation (terminal)
    IllegalOperation,
    /// Rejected or undeliverable (terminal); reconstruct and resubmit
    Failed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::New => "New",
            TransactionState::Sending => "Sending",
            TransactionState::Sent => "Sent",
            TransactionState::IllegalOperation => "IllegalOperation",
            TransactionState::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

pub struct TradeExecutor {
    provider: Arc<dyn ChainProvider>,
    wallet: Arc<WalletConnection>,
    state: RwLock<TransactionState>,
}

impl TradeExecutor {
    pub fn new(provider: Arc<dyn ChainProvider>, wallet: Arc<WalletConnection>) -> Self {
        Self {
            provider,
            wallet,
            state: RwLock::new(TransactionState::New),
        }
    }

    pub async fn state(&self) -> TransactionState {
        *self.state.read().await
    }

    /// Rearm the slot for a freshly constructed trade
    pub async fn reset(&self) {
        *self.state.write().await = TransactionState::New;
    }

    /// Submit the trade's quote for signing and broadcast, advancing the
    /// state machine to a terminal state. With no trade this is a no-op and
    /// the state is unchanged. No automatic retry on failure.
    pub async fn execute(&self, trade: Option<&Trade>) -> TransactionState {
        let Some(trade) = trade else {
            return self.state().await;
        };

        if self.wallet.current_address().await.is_none() {
            warn!("Trade execution without a connected wallet");
            return self.transition(TransactionState::IllegalOperation).await;
        }

        {
            let mut state = self.state.write().await;
            if *state == TransactionState::Sending {
                warn!("Trade execution already in flight, refusing");
                return *state;
            }
            debug!("Transaction state: {} -> {}", state, TransactionState::Sending);
            *state = TransactionState::Sending;
        }

        match self.provider.submit(trade.quote()).await {
            Ok(SubmitOutcome::Accepted { tx_hash }) => {
                info!("Trade accepted by the network: {:?}", tx_hash);
                crate::metrics::record_trade_submitted();
                self.transition(TransactionState::Sent).await
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                warn!("Trade rejected: {}", reason);
                crate::metrics::record_trade_failed();
                self.transition(TransactionState::Failed).await
            }
            Err(e) if e.is_precondition() => {
                warn!("Trade execution precondition violated: {}", e);
                self.transition(TransactionState::IllegalOperation).await
            }
            Err(e) => {
                warn!("Trade submission failed: {}", e);
                crate::metrics::record_trade_failed();
                self.transition(TransactionState::Failed).await
            }
        }
    }

    async fn transition(&self, to: TransactionState) -> TransactionState {
        let mut state = self.state.write().await;
        debug!("Transaction state: {} -> {}", state, to);
        *state = to;
        to
    }
}
