//! Signer Port
//!
//! The wallet seam the orchestrator works through: treasury identity, the
//! cached treasury balance, and scoped signing. Implementations return only
//! signature bytes, never key material.

use async_trait::async_trait;
use thiserror::Error;

use crate::vault::{VaultError, WalletVault};

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("No treasury wallet configured")]
    NoTreasury,

    #[error(transparent)]
    Vault(#[from] VaultError),
}

#[async_trait]
pub trait SignerPort: Send + Sync {
    /// Address of the treasury wallet this signer operates for.
    fn treasury_address(&self) -> Result<String, SignerError>;

    /// Cached treasury balance in lamports; not authoritative.
    fn treasury_balance_lamports(&self) -> u64;

    /// Sign a payload with the key held for `address`.
    async fn sign(&self, address: &str, payload: &[u8]) -> Result<Vec<u8>, SignerError>;
}

#[async_trait]
impl SignerPort for WalletVault {
    fn treasury_address(&self) -> Result<String, SignerError> {
        self.get_treasury()
            .map(|w| w.address)
            .ok_or(SignerError::NoTreasury)
    }

    fn treasury_balance_lamports(&self) -> u64 {
        self.get_treasury().map(|w| w.balance_lamports).unwrap_or(0)
    }

    async fn sign(&self, address: &str, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(WalletVault::sign(self, address, payload)?)
    }
}
