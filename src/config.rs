//! Configuration management for the swapflow engine
//!
//! Loads configuration from TOML files with environment variable substitution.
//! The loaded record is immutable for the lifetime of the process.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    pub tokens: TokensConfig,
    pub wallet: WalletConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Interval for the HTTP block-polling fallback
    pub poll_interval_ms: u64,
    /// Slippage bound applied to quoted output when building swap calldata
    pub slippage_bps: u32,
    /// Blocks a constructed trade's quote is considered fresh for
    pub quote_ttl_blocks: u64,
    /// Interval for the periodic status log in the binary
    pub status_interval_secs: u64,
}

/// Operating environment: who supplies the controlling address
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    /// Preconfigured dev address with a locally signed/submitted flow
    Local,
    /// Browser-injected signer supplies the address interactively
    WalletExtension,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub environment: Environment,
    /// Network id selecting the RPC endpoint from `rpc`
    pub active: String,
    /// RPC endpoint per network id
    pub rpc: HashMap<String, String>,
    /// Optional WebSocket endpoint for block subscriptions
    pub ws_url: Option<String>,
    pub router_address: String,
    pub quoter_address: String,
    pub wrapped_native_address: String,
    /// Default pool fee tier in hundredths of a bip (e.g. 3000 = 0.3%)
    pub pool_fee: u32,
}

impl NetworkConfig {
    /// RPC endpoint for the active network (presence checked by validate)
    pub fn rpc_url(&self) -> &str {
        self.rpc
            .get(&self.active)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Token descriptors for the configured pair
#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    #[serde(rename = "in")]
    pub token_in: TokenConfig,
    #[serde(rename = "out")]
    pub token_out: TokenConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenConfig {
    pub address: String,
    pub symbol: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the dev private key (local mode)
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAPFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let rpc_url = self.network.rpc_url();
        if rpc_url.is_empty() {
            anyhow::bail!(
                "No RPC endpoint configured for active network '{}'",
                self.network.active
            );
        }

        for (name, addr) in [
            ("router_address", &self.network.router_address),
            ("quoter_address", &self.network.quoter_address),
            ("wrapped_native_address", &self.network.wrapped_native_address),
        ] {
            if addr.parse::<ethers::types::Address>().is_err() {
                anyhow::bail!("Invalid {}: {}", name, addr);
            }
        }

        for token in [&self.tokens.token_in, &self.tokens.token_out] {
            if token.address.parse::<ethers::types::Address>().is_err() {
                anyhow::bail!("Invalid address for token {}: {}", token.symbol, token.address);
            }
            if token.decimals > 36 {
                anyhow::bail!("Unreasonable decimals for token {}: {}", token.symbol, token.decimals);
            }
        }

        if self.engine.slippage_bps >= 10_000 {
            anyhow::bail!("slippage_bps must be below 10000");
        }

        if self.network.environment == Environment::Local && self.wallet.private_key_env.is_none() {
            tracing::warn!(
                "Local environment without wallet.private_key_env - falling back to SWAPFLOW_PRIVATE_KEY"
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
