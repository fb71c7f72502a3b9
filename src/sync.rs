//! Chain-state synchronizer
//!
//! Keeps the block cursor and balance snapshot current with chain progress.
//! One block subscription is active at a time; starting a new one first
//! tears down the previous. Teardown joins the listener task, so no state
//! writes can occur after it returns.

use crate::config::TokensConfig;
use crate::error::EngineResult;
use crate::provider::ChainProvider;
use crate::wallet::WalletConnection;

use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wallet holdings as of the most recent completed refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub token_in: String,
    pub token_out: String,
    /// Block the snapshot was taken at
    pub block_number: u64,
}

#[derive(Debug, Default)]
struct ChainState {
    block_number: u64,
    balances: Option<BalanceSnapshot>,
}

pub struct ChainSync {
    provider: Arc<dyn ChainProvider>,
    wallet: Arc<WalletConnection>,
    tokens: TokensConfig,
    state: Arc<RwLock<ChainState>>,
    listener: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl ChainSync {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        wallet: Arc<WalletConnection>,
        tokens: TokensConfig,
    ) -> Self {
        Self {
            provider,
            wallet,
            tokens,
            state: Arc::new(RwLock::new(ChainState::default())),
            listener: Mutex::new(None),
        }
    }

    /// Subscribe to new-block notifications and process them until teardown
    pub async fn start(&self) -> EngineResult<()> {
        self.teardown().await;

        let mut subscription = self.provider.subscribe_new_blocks().await?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let provider = self.provider.clone();
        let wallet = self.wallet.clone();
        let tokens = self.tokens.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    next = subscription.recv() => {
                        let Some(block_number) = next else { break };
                        state.write().await.block_number = block_number;
                        crate::metrics::record_block_height(block_number);
                        debug!("New block: {}", block_number);
                        Self::refresh_via(&provider, &wallet, &tokens, &state, block_number).await;
                    }
                }
            }
            subscription.unsubscribe();
            debug!("Block listener stopped");
        });

        *self.listener.lock().await = Some((shutdown_tx, handle));
        info!("Chain-state synchronizer started");
        Ok(())
    }

    /// Stop the block subscription. Joins the listener task, so no further
    /// state writes happen once this returns.
    pub async fn teardown(&self) {
        if let Some((shutdown_tx, handle)) = self.listener.lock().await.take() {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
            info!("Chain-state synchronizer stopped");
        }
    }

    /// Re-read both token balances at the current cursor and overwrite the
    /// snapshot wholesale
    pub async fn refresh(&self) {
        let block_number = self.state.read().await.block_number;
        Self::refresh_via(
            &self.provider,
            &self.wallet,
            &self.tokens,
            &self.state,
            block_number,
        )
        .await;
    }

    async fn refresh_via(
        provider: &Arc<dyn ChainProvider>,
        wallet: &Arc<WalletConnection>,
        tokens: &TokensConfig,
        state: &Arc<RwLock<ChainState>>,
        block_number: u64,
    ) {
        // Expected steady-state before a wallet is connected
        let Some(address) = wallet.current_address().await else {
            return;
        };

        let result = tokio::try_join!(
            provider.get_balance(address, &tokens.token_in),
            provider.get_balance(address, &tokens.token_out),
        );

        match result {
            Ok((token_in, token_out)) => {
                let mut state = state.write().await;
                state.balances = Some(BalanceSnapshot {
                    token_in,
                    token_out,
                    block_number,
                });
                crate::metrics::record_balance_refresh();
            }
            Err(e) => {
                // Prior snapshot stays in place, stale but valid
                warn!("Balance refresh failed: {}", e);
                crate::metrics::record_balance_refresh_failure();
            }
        }
    }

    /// Last-observed block number (0 before the first notification)
    pub async fn block_number(&self) -> u64 {
        self.state.read().await.block_number
    }

    pub async fn balances(&self) -> Option<BalanceSnapshot> {
        self.state.read().await.balances.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, TokenConfig};
    use crate::error::EngineError;
    use crate::provider::{BlockSubscription, MockChainProvider};
    use ethers::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn tokens() -> TokensConfig {
        TokensConfig {
            token_in: TokenConfig {
                address: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string(),
                symbol: "WETH".to_string(),
                decimals: 18,
            },
            token_out: TokenConfig {
                address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
            },
        }
    }

    fn dev_address() -> Address {
        "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
            .parse()
            .unwrap()
    }

    async fn wait_for_block(sync: &ChainSync, block: u64) {
        for _ in 0..100 {
            if sync.block_number().await == block {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for block {}", block);
    }

    #[tokio::test]
    async fn test_cursor_tracks_last_notification_without_refresh() {
        let (tx, rx) = mpsc::channel(8);
        let mut provider = MockChainProvider::new();
        provider
            .expect_subscribe_new_blocks()
            .return_once(move || Ok(BlockSubscription::new(rx, None)));
        // No address connected: refresh must be a no-op, never an error
        provider.expect_get_balance().never();

        let provider: Arc<dyn ChainProvider> = Arc::new(provider);
        let wallet = Arc::new(WalletConnection::new(
            provider.clone(),
            Environment::WalletExtension,
        ));
        let sync = ChainSync::new(provider, wallet, tokens());
        sync.start().await.unwrap();

        for block in [3u64, 4, 7] {
            tx.send(block).await.unwrap();
        }
        wait_for_block(&sync, 7).await;

        assert_eq!(sync.block_number().await, 7);
        assert_eq!(sync.balances().await, None);

        sync.teardown().await;
    }

    #[tokio::test]
    async fn test_refresh_once_per_notification_with_address() {
        let (tx, rx) = mpsc::channel(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let mut provider = MockChainProvider::new();
        provider.expect_address().return_const(Some(dev_address()));
        provider
            .expect_subscribe_new_blocks()
            .return_once(move || Ok(BlockSubscription::new(rx, None)));
        provider.expect_get_balance().returning(move |_, token| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(if token.symbol == "WETH" {
                "1.5".to_string()
            } else {
                "3000".to_string()
            })
        });

        let provider: Arc<dyn ChainProvider> = Arc::new(provider);
        let wallet = Arc::new(WalletConnection::new(provider.clone(), Environment::Local));
        let sync = ChainSync::new(provider, wallet, tokens());
        sync.start().await.unwrap();

        for block in [10u64, 11, 12] {
            tx.send(block).await.unwrap();
        }
        wait_for_block(&sync, 12).await;
        sync.teardown().await;

        // Two token reads per notification, nothing more
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let snapshot = sync.balances().await.unwrap();
        assert_eq!(snapshot.token_in, "1.5");
        assert_eq!(snapshot.token_out, "3000");
        assert_eq!(snapshot.block_number, 12);
    }

    #[tokio::test]
    async fn test_no_writes_after_teardown() {
        let (tx, rx) = mpsc::channel(8);
        let mut provider = MockChainProvider::new();
        provider.expect_address().return_const(Some(dev_address()));
        provider
            .expect_subscribe_new_blocks()
            .return_once(move || Ok(BlockSubscription::new(rx, None)));
        provider
            .expect_get_balance()
            .returning(|_, _| Ok("1".to_string()));

        let provider: Arc<dyn ChainProvider> = Arc::new(provider);
        let wallet = Arc::new(WalletConnection::new(provider.clone(), Environment::Local));
        let sync = ChainSync::new(provider, wallet, tokens());
        sync.start().await.unwrap();

        tx.send(5).await.unwrap();
        wait_for_block(&sync, 5).await;
        let before = sync.balances().await;

        sync.teardown().await;

        // Simulated notifications after teardown must not land anywhere
        let _ = tx.send(6).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(sync.block_number().await, 5);
        assert_eq!(sync.balances().await, before);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_prior_snapshot() {
        let (tx, rx) = mpsc::channel(8);
        let mut provider = MockChainProvider::new();
        provider.expect_address().return_const(Some(dev_address()));
        provider
            .expect_subscribe_new_blocks()
            .return_once(move || Ok(BlockSubscription::new(rx, None)));

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        provider.expect_get_balance().returning(move |_, _| {
            // First notification succeeds, later ones fail
            if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok("42".to_string())
            } else {
                Err(EngineError::ProviderUnavailable("timeout".to_string()))
            }
        });

        let provider: Arc<dyn ChainProvider> = Arc::new(provider);
        let wallet = Arc::new(WalletConnection::new(provider.clone(), Environment::Local));
        let sync = ChainSync::new(provider, wallet, tokens());
        sync.start().await.unwrap();

        tx.send(20).await.unwrap();
        wait_for_block(&sync, 20).await;
        tx.send(21).await.unwrap();
        wait_for_block(&sync, 21).await;
        sync.teardown().await;

        // Cursor advanced, snapshot is the stale-but-valid one from block 20
        let snapshot = sync.balances().await.unwrap();
        assert_eq!(snapshot.block_number, 20);
        assert_eq!(snapshot.token_in, "42");
    }

    #[tokio::test]
    async fn test_restart_replaces_previous_subscription() {
        let (tx_first, rx_first) = mpsc::channel::<u64>(8);
        let (tx_second, rx_second) = mpsc::channel(8);

        let mut provider = MockChainProvider::new();
        provider.expect_get_balance().never();
        let mut subs = vec![rx_second, rx_first];
        provider
            .expect_subscribe_new_blocks()
            .times(2)
            .returning(move || Ok(BlockSubscription::new(subs.pop().unwrap(), None)));

        let provider: Arc<dyn ChainProvider> = Arc::new(provider);
        let wallet = Arc::new(WalletConnection::new(
            provider.clone(),
            Environment::WalletExtension,
        ));
        let sync = ChainSync::new(provider, wallet, tokens());

        sync.start().await.unwrap();
        sync.start().await.unwrap();

        // The first subscription was torn down with its listener
        assert!(tx_first.send(99).await.is_err());

        tx_second.send(30).await.unwrap();
        wait_for_block(&sync, 30).await;
        assert_eq!(sync.block_number().await, 30);

        sync.teardown().await;
    }
}
