//! Solana RPC Client
//!
//! Async-compatible wrapper around the blocking RPC client for the calls
//! this engine makes: balance lookups and signed-transaction submission.

use std::str::FromStr;
use std::sync::Arc;

use solana_client::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolanaClientError {
    #[error("RPC request failed: {0}")]
    RpcError(String),
    #[error("Transaction failed: {0}")]
    TransactionError(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// Wrapper around the Solana RPC client with async-compatible methods
#[derive(Clone)]
pub struct SolanaRpcClient {
    client: Arc<RpcClient>,
}

impl SolanaRpcClient {
    pub fn new(rpc_url: String) -> Self {
        let client = Arc::new(RpcClient::new_with_commitment(
            rpc_url,
            CommitmentConfig::confirmed(),
        ));
        Self { client }
    }

    /// SOL balance for a public key, in lamports
    pub async fn get_balance(&self, pubkey: &str) -> Result<u64, SolanaClientError> {
        let pubkey = solana_sdk::pubkey::Pubkey::from_str(pubkey)
            .map_err(|e| SolanaClientError::InvalidPublicKey(e.to_string()))?;

        // Spawn blocking to make the sync RPC call async-compatible
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            client
                .get_balance(&pubkey)
                .map_err(|e| SolanaClientError::RpcError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }

    /// Submit a signed transaction and wait for confirmation
    pub async fn send_and_confirm(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<String, SolanaClientError> {
        let tx = transaction.clone();
        let client = Arc::clone(&self.client);

        tokio::task::spawn_blocking(move || {
            client
                .send_and_confirm_transaction(&tx)
                .map(|sig| sig.to_string())
                .map_err(|e| SolanaClientError::TransactionError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = SolanaRpcClient::new("https://api.devnet.solana.com".to_string());
        assert!(std::mem::size_of_val(&client) > 0);
    }

    #[tokio::test]
    async fn test_invalid_pubkey_rejected() {
        let client = SolanaRpcClient::new("https://api.devnet.solana.com".to_string());
        let result = client.get_balance("not-a-pubkey").await;
        assert!(matches!(result, Err(SolanaClientError::InvalidPublicKey(_))));
    }

    #[test]
    fn test_error_display() {
        let err = SolanaClientError::RpcError("test".to_string());
        assert!(err.to_string().contains("RPC request failed"));
    }
}
