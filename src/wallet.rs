//! Wallet connection
//!
//! Establishes and exposes the address controlling trades. At most one
//! connection exists per session; in local-node mode the preconfigured dev
//! address is present from construction and `connect` is a no-op.

use crate::config::Environment;
use crate::error::EngineResult;
use crate::provider::ChainProvider;

use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub struct WalletConnection {
    provider: Arc<dyn ChainProvider>,
    address: RwLock<Option<Address>>,
}

impl WalletConnection {
    pub fn new(provider: Arc<dyn ChainProvider>, environment: Environment) -> Self {
        // Local-node mode carries a fixed dev address, never absent
        let address = match environment {
            Environment::Local => provider.address(),
            Environment::WalletExtension => None,
        };

        Self {
            provider,
            address: RwLock::new(address),
        }
    }

    /// Request account access and make the first authorized address the
    /// active connection. Idempotent once connected.
    pub async fn connect(&self) -> EngineResult<Address> {
        if let Some(addr) = *self.address.read().await {
            return Ok(addr);
        }

        let addr = self.provider.request_account_access().await?;
        *self.address.write().await = Some(addr);
        info!("Wallet connected: {:?}", addr);
        crate::metrics::record_wallet_connected();

        Ok(addr)
    }

    /// The connected address, if any
    pub async fn current_address(&self) -> Option<Address> {
        *self.address.read().await
    }
}
