//! Error types for the swapflow engine

use thiserror::Error;

/// Main error type for the trade engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No wallet extension available")]
    NoWalletInstalled,

    #[error("Wallet connection rejected by user")]
    UserRejected,

    #[error("Invalid trade amount: {0}")]
    InvalidAmount(f64),

    #[error("No viable route for the requested pair")]
    NoLiquidity,

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Illegal operation: {0}")]
    IllegalOperation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl EngineError {
    /// Check if the error is a caller-side precondition violation
    /// rather than a chain-level outcome
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidAmount(_)
                | EngineError::IllegalOperation(_)
                | EngineError::NoWalletInstalled
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
