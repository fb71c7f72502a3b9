//! Trade construction
//!
//! Turns a requested amount into a priced, executable trade against the
//! current chain state. Trades are immutable; a new amount produces a new
//! trade rather than mutating the old one.

use crate::config::TokensConfig;
use crate::error::{EngineError, EngineResult};
use crate::provider::{ChainProvider, Quote};

use std::sync::Arc;
use tracing::debug;

/// An immutable, priced, executable trade
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    amount: f64,
    quote: Quote,
    block_number: u64,
}

impl Trade {
    pub(crate) fn new(amount: f64, quote: Quote, block_number: u64) -> Self {
        Self {
            amount,
            quote,
            block_number,
        }
    }

    /// The requested input amount, exactly as constructed
    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn quote(&self) -> &Quote {
        &self.quote
    }

    /// Block cursor at construction time
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Whether the quote has outlived its freshness window. A stale trade
    /// must be reconstructed, not reused.
    pub fn is_stale(&self, current_block: u64, ttl_blocks: u64) -> bool {
        current_block > self.block_number.saturating_add(ttl_blocks)
    }

    /// Human-readable summary, e.g. "1 WETH -> 3000 USDC"
    pub fn display(&self) -> String {
        format!(
            "{} {} -> {} {}",
            self.quote.amount_in_display(),
            self.quote.token_in.symbol,
            self.quote.amount_out_display(),
            self.quote.token_out.symbol
        )
    }
}

/// Validate the requested amount and price it against current chain state.
/// Always fetches a fresh quote; a previous quote is never reused.
pub async fn build_trade(
    provider: &Arc<dyn ChainProvider>,
    tokens: &TokensConfig,
    amount: f64,
    block_number: u64,
) -> EngineResult<Trade> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(EngineError::InvalidAmount(amount));
    }

    let quote = provider
        .quote(&tokens.token_in, &tokens.token_out, amount)
        .await?;

    let trade = Trade::new(amount, quote, block_number);
    debug!("Constructed trade at block {}: {}", block_number, trade.display());
    crate::metrics::record_trade_constructed();

    Ok(trade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use crate::provider::MockChainProvider;
    use ethers::types::{Address, Bytes, U256};

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

    fn quote_for(amount: f64) -> Quote {
        let t = tokens();
        let amount_in = U256::from((amount * 1e18) as u128);
        Quote {
            token_in: t.token_in,
            token_out: t.token_out,
            amount_in,
            // Fixed price of 3000 out per 1 in
            amount_out: U256::from((amount * 3000.0 * 1e6) as u128),
            calldata: Bytes::from_static(&[0x41, 0x4b, 0xf3, 0x89]),
            router: Address::zero(),
        }
    }

    #[tokio::test]
    async fn test_invalid_amounts_never_reach_provider() {
        let mut provider = MockChainProvider::new();
        provider.expect_quote().never();
        let provider: Arc<dyn ChainProvider> = Arc::new(provider);

        for amount in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = build_trade(&provider, &tokens(), amount, 1).await;
            assert!(matches!(result, Err(EngineError::InvalidAmount(_))));
        }
    }

    #[tokio::test]
    async fn test_quoted_input_matches_requested_amount() {
        let mut provider = MockChainProvider::new();
        provider
            .expect_quote()
            .withf(|token_in, token_out, amount| {
                token_in.symbol == "WETH" && token_out.symbol == "USDC" && *amount == 1.0
            })
            .returning(|_, _, amount| Ok(quote_for(amount)));
        let provider: Arc<dyn ChainProvider> = Arc::new(provider);

        let trade = build_trade(&provider, &tokens(), 1.0, 12).await.unwrap();
        assert_eq!(trade.amount(), 1.0);
        assert_eq!(trade.block_number(), 12);
        assert_eq!(trade.quote().amount_in, U256::from(10).pow(U256::from(18)));
        assert_eq!(trade.quote().amount_out_display(), "3000");
        assert_eq!(trade.display(), "1 WETH -> 3000 USDC");
    }

    #[tokio::test]
    async fn test_same_amount_same_chain_state_yields_equal_quotes() {
        let mut provider = MockChainProvider::new();
        provider
            .expect_quote()
            .times(2)
            .returning(|_, _, amount| Ok(quote_for(amount)));
        let provider: Arc<dyn ChainProvider> = Arc::new(provider);

        let first = build_trade(&provider, &tokens(), 2.0, 5).await.unwrap();
        let second = build_trade(&provider, &tokens(), 2.0, 5).await.unwrap();
        assert_eq!(first.quote(), second.quote());
    }

    #[tokio::test]
    async fn test_no_liquidity_propagates() {
        let mut provider = MockChainProvider::new();
        provider
            .expect_quote()
            .returning(|_, _, _| Err(EngineError::NoLiquidity));
        let provider: Arc<dyn ChainProvider> = Arc::new(provider);

        let result = build_trade(&provider, &tokens(), 1.0, 1).await;
        assert!(matches!(result, Err(EngineError::NoLiquidity)));
    }

    #[test]
    fn test_staleness_window() {
        let trade = Trade::new(1.0, quote_for(1.0), 100);
        assert!(!trade.is_stale(100, 5));
        assert!(!trade.is_stale(105, 5));
        assert!(trade.is_stale(106, 5));
    }
}
