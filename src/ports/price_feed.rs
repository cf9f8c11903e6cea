//! Price Feed Port
//!
//! Narrow interface to the external price source. Implementations must
//! return an explicit error on unavailability rather than a stale value.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("Price request failed: {0}")]
    RequestFailed(String),

    #[error("No price data for token: {0}")]
    NoPriceData(String),

    #[error("Price response could not be parsed: {0}")]
    ParseError(String),
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current USD price for a token mint. Errors are retryable by the
    /// caller; a non-positive price is never returned as a success.
    async fn get_price(&self, token_mint: &str) -> Result<f64, PriceError>;
}
