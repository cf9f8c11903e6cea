//! Execution Port
//!
//! Narrow interface to the swap-execution venue: quote, then submit a
//! signed payload and receive the confirmed fill. Slow venue calls happen
//! outside the ledger lock; a timed-out submit is a failure, never a fill.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Slippage tolerance exceeded")]
    SlippageExceeded,

    #[error("Submission failed: {0}")]
    SubmitFailed(String),

    #[error("Execution timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// A quoted swap, including the venue-built transaction to sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in base units
    pub input_amount: u64,
    /// Expected output amount in base units
    pub output_amount: u64,
    /// Minimum output after slippage
    pub min_output_amount: u64,
    /// Implied price (USD per output token unit)
    pub price: f64,
    /// Base64-encoded unsigned transaction from the venue
    pub transaction: String,
}

/// Confirmed execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub tx_id: String,
    pub filled_price: f64,
    pub filled_amount: f64,
}

#[async_trait::async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Quote a swap of `amount` base units of `input_mint` into
    /// `output_mint` within the slippage tolerance.
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<Quote, ExecutionError>;

    /// Submit a signed payload and await the confirmed fill.
    async fn submit(&self, signed_payload: &[u8]) -> Result<Fill, ExecutionError>;
}
