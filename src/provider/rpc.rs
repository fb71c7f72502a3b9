//! JSON-RPC chain provider
//!
//! Implements the `ChainProvider` capability over ethers: HTTP JSON-RPC for
//! reads, a local signer for submission in local-node mode, and WebSocket
//! block subscriptions with an HTTP-polling fallback.

use crate::config::{Environment, Settings, TokenConfig};
use crate::error::{EngineError, EngineResult};

use super::{format_token_amount, BlockSubscription, ChainProvider, Quote, SubmitOutcome};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, Ws};
use ethers::types::transaction::eip2718::TypedTransaction;
use futures::StreamExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// Function selectors for the handful of contract calls the engine makes
const SELECTOR_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
// quoteExactInputSingle(address,address,uint24,uint256,uint160)
const SELECTOR_QUOTE_EXACT_INPUT_SINGLE: [u8; 4] = [0xf7, 0x72, 0x9d, 0x43];
// exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))
const SELECTOR_EXACT_INPUT_SINGLE: [u8; 4] = [0x41, 0x4b, 0xf3, 0x89];
// deposit()
const SELECTOR_DEPOSIT: [u8; 4] = [0xd0, 0xe3, 0x0d, 0xb0];

/// Seconds a built swap stays executable before the router refuses it
const SWAP_DEADLINE_SECS: u64 = 1800;

/// Chain provider backed by a JSON-RPC endpoint
pub struct RpcChainProvider {
    http: Provider<Http>,
    ws: Option<Provider<Ws>>,
    signer: Option<SignerMiddleware<Provider<Http>, LocalWallet>>,
    wallet_address: Option<Address>,
    router: Address,
    quoter: Address,
    wrapped_native: Address,
    pool_fee: u32,
    slippage_bps: u32,
    poll_interval: Duration,
}

impl RpcChainProvider {
    /// Create a provider from the loaded configuration
    pub async fn new(settings: &Settings) -> EngineResult<Self> {
        let url = settings.network.rpc_url();
        let http = Provider::<Http>::try_from(url)
            .map_err(|e| EngineError::Config(format!("Invalid RPC endpoint {}: {}", url, e)))?
            .interval(Duration::from_millis(100));

        let ws = if let Some(ref ws_url) = settings.network.ws_url {
            match Provider::<Ws>::connect(ws_url).await {
                Ok(provider) => {
                    info!("WebSocket connected: {}", ws_url);
                    Some(provider)
                }
                Err(e) => {
                    warn!("WebSocket connection failed ({}), will poll: {}", ws_url, e);
                    None
                }
            }
        } else {
            None
        };

        let signer = match settings.network.environment {
            Environment::Local => {
                let wallet = Self::load_wallet(settings)?;
                let chain_id = http
                    .get_chainid()
                    .await
                    .map_err(|e| EngineError::ProviderUnavailable(e.to_string()))?;
                let wallet = wallet.with_chain_id(chain_id.as_u64());
                info!("Local signer initialized: {:?}", wallet.address());
                Some(SignerMiddleware::new(http.clone(), wallet))
            }
            Environment::WalletExtension => None,
        };
        let wallet_address = signer.as_ref().map(|s| s.signer().address());

        Ok(Self {
            http,
            ws,
            signer,
            wallet_address,
            router: parse_address(&settings.network.router_address, "router")?,
            quoter: parse_address(&settings.network.quoter_address, "quoter")?,
            wrapped_native: parse_address(&settings.network.wrapped_native_address, "wrapped native")?,
            pool_fee: settings.network.pool_fee,
            slippage_bps: settings.engine.slippage_bps,
            poll_interval: Duration::from_millis(settings.engine.poll_interval_ms),
        })
    }

    /// Load the dev wallet from the configured environment variable
    fn load_wallet(settings: &Settings) -> EngineResult<LocalWallet> {
        let var = settings
            .wallet
            .private_key_env
            .as_deref()
            .unwrap_or("SWAPFLOW_PRIVATE_KEY");

        let key = std::env::var(var).map_err(|_| {
            EngineError::Wallet(format!("No dev key configured. Set {}", var))
        })?;

        key.parse::<LocalWallet>()
            .map_err(|e| EngineError::Wallet(format!("Invalid private key: {}", e)))
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> EngineResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.http
            .call(&tx, None)
            .await
            .map_err(|e| classify_call_error(&e.to_string()))
    }

    /// Router calldata for exactInputSingle with the slippage bound and
    /// deadline already applied
    fn build_swap_calldata(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        amount_out: U256,
        recipient: Address,
    ) -> Bytes {
        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            + SWAP_DEADLINE_SECS;
        let min_out = amount_out * U256::from(10_000 - self.slippage_bps) / U256::from(10_000);

        let mut data = SELECTOR_EXACT_INPUT_SINGLE.to_vec();
        data.extend_from_slice(&word_from_address(token_in));
        data.extend_from_slice(&word_from_address(token_out));
        data.extend_from_slice(&word_from_u256(U256::from(self.pool_fee)));
        data.extend_from_slice(&word_from_address(recipient));
        data.extend_from_slice(&word_from_u256(U256::from(deadline)));
        data.extend_from_slice(&word_from_u256(amount_in));
        data.extend_from_slice(&word_from_u256(min_out));
        data.extend_from_slice(&word_from_u256(U256::zero()));
        data.into()
    }
}

#[async_trait]
impl ChainProvider for RpcChainProvider {
    async fn get_balance(&self, address: Address, token: &TokenConfig) -> EngineResult<String> {
        let token_addr = parse_address(&token.address, &token.symbol)?;

        let mut data = SELECTOR_BALANCE_OF.to_vec();
        data.extend_from_slice(&word_from_address(address));

        let out = self.eth_call(token_addr, data).await?;
        let raw = decode_u256(&out)?;

        Ok(format_token_amount(raw, token.decimals))
    }

    fn address(&self) -> Option<Address> {
        self.wallet_address
    }

    async fn request_account_access(&self) -> EngineResult<Address> {
        match self.wallet_address {
            Some(addr) => Ok(addr),
            // No browser-injected signer exists for a headless process
            None => Err(EngineError::NoWalletInstalled),
        }
    }

    async fn quote(
        &self,
        token_in: &TokenConfig,
        token_out: &TokenConfig,
        amount: f64,
    ) -> EngineResult<Quote> {
        let in_addr = parse_address(&token_in.address, &token_in.symbol)?;
        let out_addr = parse_address(&token_out.address, &token_out.symbol)?;
        let amount_in = parse_token_amount(amount, token_in.decimals)?;

        let mut data = SELECTOR_QUOTE_EXACT_INPUT_SINGLE.to_vec();
        data.extend_from_slice(&word_from_address(in_addr));
        data.extend_from_slice(&word_from_address(out_addr));
        data.extend_from_slice(&word_from_u256(U256::from(self.pool_fee)));
        data.extend_from_slice(&word_from_u256(amount_in));
        data.extend_from_slice(&word_from_u256(U256::zero()));

        let out = self.eth_call(self.quoter, data).await?;
        let amount_out = decode_u256(&out)?;
        if amount_out.is_zero() {
            return Err(EngineError::NoLiquidity);
        }

        debug!(
            "Quoted {} {} -> {} {}",
            format_token_amount(amount_in, token_in.decimals),
            token_in.symbol,
            format_token_amount(amount_out, token_out.decimals),
            token_out.symbol
        );

        let recipient = self.wallet_address.unwrap_or_default();
        let calldata =
            self.build_swap_calldata(in_addr, out_addr, amount_in, amount_out, recipient);

        Ok(Quote {
            token_in: token_in.clone(),
            token_out: token_out.clone(),
            amount_in,
            amount_out,
            calldata,
            router: self.router,
        })
    }

    async fn submit(&self, quote: &Quote) -> EngineResult<SubmitOutcome> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            EngineError::IllegalOperation("no signing capability".to_string())
        })?;

        let tx = TransactionRequest::new()
            .to(quote.router)
            .data(quote.calldata.clone());

        let pending = match signer.send_transaction(tx, None).await {
            Ok(pending) => pending,
            Err(e) => {
                let msg = e.to_string();
                if is_chain_rejection(&msg) {
                    return Ok(SubmitOutcome::Rejected { reason: msg });
                }
                return Err(EngineError::ProviderUnavailable(msg));
            }
        };

        let receipt = pending
            .await
            .map_err(|e| EngineError::ProviderUnavailable(e.to_string()))?;

        match receipt {
            Some(r) if r.status == Some(1.into()) => {
                info!("Trade mined: {:?}", r.transaction_hash);
                Ok(SubmitOutcome::Accepted {
                    tx_hash: r.transaction_hash,
                })
            }
            Some(r) => Ok(SubmitOutcome::Rejected {
                reason: format!("transaction reverted: {:?}", r.transaction_hash),
            }),
            None => Ok(SubmitOutcome::Rejected {
                reason: "transaction dropped from mempool".to_string(),
            }),
        }
    }

    async fn wrap_native(&self, amount: f64) -> EngineResult<H256> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            EngineError::IllegalOperation("no signing capability".to_string())
        })?;

        let value = parse_token_amount(amount, 18)?;
        let tx = TransactionRequest::new()
            .to(self.wrapped_native)
            .data(SELECTOR_DEPOSIT.to_vec())
            .value(value);

        let pending = signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| EngineError::ProviderUnavailable(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| EngineError::ProviderUnavailable(e.to_string()))?;

        match receipt {
            Some(r) if r.status == Some(1.into()) => Ok(r.transaction_hash),
            _ => Err(EngineError::ProviderUnavailable(
                "wrap transaction failed".to_string(),
            )),
        }
    }

    async fn subscribe_new_blocks(&self) -> EngineResult<BlockSubscription> {
        let (tx, rx) = mpsc::channel(64);

        let feeder = if let Some(ws) = self.ws.clone() {
            tokio::spawn(async move {
                match ws.subscribe_blocks().await {
                    Ok(mut stream) => {
                        while let Some(block) = stream.next().await {
                            let Some(number) = block.number else { continue };
                            if tx.send(number.as_u64()).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => warn!("Block subscription failed: {}", e),
                }
            })
        } else {
            let http = self.http.clone();
            let interval = self.poll_interval;
            tokio::spawn(async move {
                let mut last = 0u64;
                loop {
                    match http.get_block_number().await {
                        Ok(number) => {
                            let number = number.as_u64();
                            if number > last {
                                last = number;
                                if tx.send(number).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => debug!("Block poll failed: {}", e),
                    }
                    tokio::time::sleep(interval).await;
                }
            })
        };

        Ok(BlockSubscription::new(rx, Some(feeder)))
    }
}

fn parse_address(addr: &str, what: &str) -> EngineResult<Address> {
    addr.parse::<Address>()
        .map_err(|e| EngineError::Config(format!("Invalid {} address {}: {}", what, addr, e)))
}

/// Convert a user-facing decimal amount into raw token units
fn parse_token_amount(amount: f64, decimals: u32) -> EngineResult<U256> {
    let parsed = ethers::utils::parse_units(amount.to_string(), decimals)
        .map_err(|_| EngineError::InvalidAmount(amount))?;
    Ok(parsed.into())
}

fn decode_u256(out: &Bytes) -> EngineResult<U256> {
    if out.len() < 32 {
        return Err(EngineError::ProviderUnavailable(format!(
            "short RPC response: {} bytes",
            out.len()
        )));
    }
    Ok(U256::from_big_endian(&out[..32]))
}

fn word_from_address(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_bytes());
    word
}

fn word_from_u256(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// Quoter calls revert when no pool can serve the requested pair
fn classify_call_error(msg: &str) -> EngineError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("revert") || lower.contains("execution reverted") {
        EngineError::NoLiquidity
    } else {
        EngineError::ProviderUnavailable(msg.to_string())
    }
}

fn is_chain_rejection(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("insufficient funds")
        || lower.contains("revert")
        || lower.contains("rejected")
        || lower.contains("underpriced")
}
