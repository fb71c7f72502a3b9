//! Chain provider capability
//!
//! The abstract capability giving access to balances, quotes, submission,
//! and block notifications on the target network. Every engine component
//! receives it as an explicit `Arc<dyn ChainProvider>` at construction,
//! which is also the seam for test doubles.

pub mod rpc;

pub use rpc::RpcChainProvider;

use crate::config::TokenConfig;
use crate::error::EngineResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A priced route converting one token amount into another, computed against
/// current chain liquidity state. Carries the executable swap calldata so
/// submission is sign-and-broadcast only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub token_in: TokenConfig,
    pub token_out: TokenConfig,
    /// Requested input amount in raw token units
    pub amount_in: U256,
    /// Quoted output amount in raw token units
    pub amount_out: U256,
    /// Router calldata with slippage bound and deadline applied
    pub calldata: Bytes,
    pub router: Address,
}

impl Quote {
    pub fn amount_in_display(&self) -> String {
        format_token_amount(self.amount_in, self.token_in.decimals)
    }

    pub fn amount_out_display(&self) -> String {
        format_token_amount(self.amount_out, self.token_out.decimals)
    }
}

/// Outcome of signing and broadcasting a trade
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the network
    Accepted { tx_hash: H256 },
    /// Rejected or undeliverable (revert, insufficient funds, dropped)
    Rejected { reason: String },
}

/// Owned handle to a new-block notification stream.
///
/// The feeder task pushes block numbers into the channel; dropping the
/// handle (or calling [`BlockSubscription::unsubscribe`]) stops the feeder,
/// so the stream delivers nothing after the handle is gone.
pub struct BlockSubscription {
    rx: mpsc::Receiver<u64>,
    feeder: Option<JoinHandle<()>>,
}

impl BlockSubscription {
    pub fn new(rx: mpsc::Receiver<u64>, feeder: Option<JoinHandle<()>>) -> Self {
        Self { rx, feeder }
    }

    /// Next block number, or None once the stream has ended
    pub async fn recv(&mut self) -> Option<u64> {
        self.rx.recv().await
    }

    /// Tear the subscription down explicitly
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.feeder.take() {
            handle.abort();
        }
        self.rx.close();
    }
}

impl Drop for BlockSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Chain provider capability consumed by all engine components
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Balance of `token` held by `address`, as a decimal string
    async fn get_balance(&self, address: Address, token: &TokenConfig) -> EngineResult<String>;

    /// Controlling address if the provider has one without interaction
    /// (local-node mode); None in wallet-extension mode before access is
    /// granted
    fn address(&self) -> Option<Address>;

    /// Request account access from the signer. Fails with
    /// `NoWalletInstalled` when no signing capability is present, or
    /// `UserRejected` when the user declines.
    async fn request_account_access(&self) -> EngineResult<Address>;

    /// Best available quote converting `amount` of `token_in` into
    /// `token_out` at current chain state. Fails with `NoLiquidity` when no
    /// viable route exists.
    async fn quote(
        &self,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
        amount: f64,
    ) -> EngineResult<Quote>;

    /// Sign and broadcast the swap described by `quote`
    async fn submit(&self, quote: &Quote) -> EngineResult<SubmitOutcome>;

    /// Wrap `amount` of the native token into its ERC-20 form
    async fn wrap_native(&self, amount: f64) -> EngineResult<H256>;

    /// Subscribe to new-block notifications
    async fn subscribe_new_blocks(&self) -> EngineResult<BlockSubscription>;
}

/// Format a raw token amount as a decimal string, trailing zeros trimmed
pub fn format_token_amount(amount: U256, decimals: u32) -> String {
    let formatted = ethers::utils::format_units(amount, decimals)
        .unwrap_or_else(|_| amount.to_string());
    if formatted.contains('.') {
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_token_amount_trims_zeros() {
        let one_eth = U256::from(10).pow(U256::from(18));
        assert_eq!(format_token_amount(one_eth, 18), "1");

        let half = one_eth / 2;
        assert_eq!(format_token_amount(half, 18), "0.5");

        assert_eq!(format_token_amount(U256::zero(), 6), "0");
        assert_eq!(format_token_amount(U256::from(3_000_000_000u64), 6), "3000");
    }

    #[tokio::test]
    async fn test_block_subscription_recv_and_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = BlockSubscription::new(rx, None);

        tx.send(7).await.unwrap();
        assert_eq!(sub.recv().await, Some(7));

        drop(tx);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_block_subscription_unsubscribe_stops_feeder() {
        let (tx, rx) = mpsc::channel(4);
        let feeder = tokio::spawn(async move {
            let mut n = 0u64;
            loop {
                n += 1;
                if tx.send(n).await.is_err() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });

        let sub = BlockSubscription::new(rx, Some(feeder));
        sub.unsubscribe();
        // Feeder is aborted; nothing left running to panic or leak
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
