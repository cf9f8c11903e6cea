//! Jupiter API Client
//!
//! HTTP client for the Jupiter DEX aggregator: price lookups, quote
//! fetching and swap-transaction building, with retry and rate-limit
//! backoff. `JupiterExecutionAdapter` combines this client with a Solana
//! RPC connection to implement the execution port end to end.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use solana_sdk::message::VersionedMessage;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;

use crate::adapters::solana::SolanaRpcClient;
use crate::ports::execution::{ExecutionAdapter, ExecutionError, Fill, Quote};
use crate::ports::price_feed::{PriceError, PriceFeed};

use super::quote::{PriceResponse, QuoteRequest, QuoteResponse, SwapRequest, SwapResponse};

/// Jupiter API client configuration
#[derive(Debug, Clone)]
pub struct JupiterConfig {
    /// Base URL for the swap API
    pub api_base_url: String,
    /// Base URL for the price API
    pub price_api_url: String,
    /// Optional API key for higher rate limits
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Number of retry attempts
    pub max_retries: u32,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.jup.ag/swap/v1".to_string(),
            price_api_url: "https://price.jup.ag/v6/price".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Jupiter DEX aggregator client
#[derive(Debug, Clone)]
pub struct JupiterClient {
    config: JupiterConfig,
    http: Client,
}

impl JupiterClient {
    pub fn new() -> Result<Self, ExecutionError> {
        Self::with_config(JupiterConfig::default())
    }

    pub fn with_config(config: JupiterConfig) -> Result<Self, ExecutionError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExecutionError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    /// Get a quote for a token swap
    pub async fn get_quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, ExecutionError> {
        let url = format!("{}/quote", self.config.api_base_url);

        let mut req = self.http.get(&url).query(&[
            ("inputMint", &request.input_mint),
            ("outputMint", &request.output_mint),
            ("amount", &request.amount.to_string()),
            ("slippageBps", &request.slippage_bps.to_string()),
        ]);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("x-api-key", api_key);
        }

        let response = self
            .execute_with_retry(|| async {
                req.try_clone()
                    .ok_or_else(|| ExecutionError::ApiError("Failed to clone request".into()))?
                    .send()
                    .await
                    .map_err(|e| ExecutionError::ApiError(e.to_string()))
            })
            .await?;

        self.handle_response(response).await
    }

    /// Build a swap transaction for a quote
    pub async fn get_swap_transaction(
        &self,
        request: &SwapRequest,
    ) -> Result<SwapResponse, ExecutionError> {
        let url = format!("{}/swap", self.config.api_base_url);

        let mut req = self.http.post(&url).json(request);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("x-api-key", api_key);
        }

        let response = self
            .execute_with_retry(|| async {
                req.try_clone()
                    .ok_or_else(|| ExecutionError::ApiError("Failed to clone request".into()))?
                    .send()
                    .await
                    .map_err(|e| ExecutionError::ApiError(e.to_string()))
            })
            .await?;

        self.handle_response(response).await
    }

    /// Current USD price for a mint via the price endpoint
    pub async fn get_token_price(&self, mint: &str) -> Result<f64, PriceError> {
        let url = format!("{}?ids={}", self.config.price_api_url, mint);

        let response: PriceResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PriceError::RequestFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| PriceError::ParseError(e.to_string()))?;

        let price = response
            .data
            .get(mint)
            .map(|p| p.price)
            .ok_or_else(|| PriceError::NoPriceData(mint.to_string()))?;

        if price <= 0.0 {
            return Err(PriceError::NoPriceData(mint.to_string()));
        }
        Ok(price)
    }

    /// Execute a request with retry and rate-limit backoff
    async fn execute_with_retry<F, Fut>(
        &self,
        request_fn: F,
    ) -> Result<reqwest::Response, ExecutionError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, ExecutionError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            match request_fn().await {
                Ok(response) => {
                    if response.status().is_success()
                        || response.status() == StatusCode::BAD_REQUEST
                    {
                        return Ok(response);
                    }

                    if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        let backoff = Duration::from_secs(2u64.pow(attempt + 1));
                        tracing::warn!(
                            "Rate limited (429), backing off for {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            self.config.max_retries
                        );
                        last_error =
                            Some(ExecutionError::ApiError("Rate limit exceeded".into()));
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if response.status().is_server_error() {
                        last_error = Some(ExecutionError::ApiError(format!(
                            "Server error: {}",
                            response.status()
                        )));
                        tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1)))
                            .await;
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) => {
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExecutionError::ApiError("Max retries exceeded".into())))
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ExecutionError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExecutionError::ApiError("Rate limit exceeded".into()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if error_text.contains("SlippageToleranceExceeded") || error_text.contains("6001") {
                return Err(ExecutionError::SlippageExceeded);
            }
            return Err(ExecutionError::ApiError(format!(
                "API error {}: {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ExecutionError::ApiError(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl PriceFeed for JupiterClient {
    async fn get_price(&self, token_mint: &str) -> Result<f64, PriceError> {
        self.get_token_price(token_mint).await
    }
}

/// Context for pricing the fill after a submit
#[derive(Debug, Clone)]
struct PendingQuote {
    price: f64,
    output_amount: u64,
}

/// Execution port backed by Jupiter for quoting/building and a Solana RPC
/// connection for submission.
///
/// The `transaction` field of a [`Quote`] carries the base64 transaction
/// *message*; the signed payload handed back to [`submit`] is the 64-byte
/// signature followed by that message.
pub struct JupiterExecutionAdapter {
    jupiter: JupiterClient,
    rpc: SolanaRpcClient,
    user_public_key: String,
    slippage_bps: u16,
    pending: Mutex<Option<PendingQuote>>,
}

impl JupiterExecutionAdapter {
    pub fn new(
        jupiter: JupiterClient,
        rpc: SolanaRpcClient,
        user_public_key: String,
        slippage_bps: u16,
    ) -> Self {
        Self {
            jupiter,
            rpc,
            user_public_key,
            slippage_bps,
            pending: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for JupiterExecutionAdapter {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<Quote, ExecutionError> {
        let slippage = if max_slippage_bps > 0 {
            max_slippage_bps
        } else {
            self.slippage_bps
        };

        let quote_response = self
            .jupiter
            .get_quote(&QuoteRequest::new(
                input_mint.to_string(),
                output_mint.to_string(),
                amount,
                slippage,
            ))
            .await?;

        let output_amount = quote_response.output_amount();
        if output_amount == 0 {
            return Err(ExecutionError::QuoteUnavailable(format!(
                "Empty quote for {} -> {}",
                input_mint, output_mint
            )));
        }

        let swap = self
            .jupiter
            .get_swap_transaction(&SwapRequest {
                user_public_key: self.user_public_key.clone(),
                quote_response: serde_json::to_value(&quote_response)
                    .map_err(|e| ExecutionError::InvalidParameters(e.to_string()))?,
                prioritization_fee_lamports: None,
                dynamic_compute_unit_limit: true,
            })
            .await?;

        // Extract the message so the vault signs exactly what the chain
        // verifies
        let tx_bytes = BASE64
            .decode(&swap.swap_transaction)
            .map_err(|e| ExecutionError::ApiError(format!("Bad swap transaction: {}", e)))?;
        let tx: VersionedTransaction = bincode::deserialize(&tx_bytes)
            .map_err(|e| ExecutionError::ApiError(format!("Bad swap transaction: {}", e)))?;
        let message_bytes = tx.message.serialize();

        let price = amount as f64 / output_amount as f64;
        *self.pending.lock().unwrap() = Some(PendingQuote {
            price,
            output_amount,
        });

        Ok(Quote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            input_amount: amount,
            output_amount,
            min_output_amount: quote_response.min_output_amount(),
            price,
            transaction: BASE64.encode(message_bytes),
        })
    }

    async fn submit(&self, signed_payload: &[u8]) -> Result<Fill, ExecutionError> {
        if signed_payload.len() <= 64 {
            return Err(ExecutionError::InvalidParameters(
                "Signed payload too short".into(),
            ));
        }

        let signature = Signature::try_from(&signed_payload[..64])
            .map_err(|_| ExecutionError::InvalidParameters("Malformed signature".into()))?;
        let message: VersionedMessage = bincode::deserialize(&signed_payload[64..])
            .map_err(|e| ExecutionError::InvalidParameters(format!("Bad message: {}", e)))?;

        let tx = VersionedTransaction {
            signatures: vec![signature],
            message,
        };

        let tx_id = self.rpc.send_and_confirm(&tx).await.map_err(|e| {
            ExecutionError::SubmitFailed(e.to_string())
        })?;

        let pending = self.pending.lock().unwrap().take();
        let (filled_price, filled_amount) = pending
            .map(|p| (p.price, p.output_amount as f64))
            .unwrap_or((0.0, 0.0));

        Ok(Fill {
            tx_id,
            filled_price,
            filled_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jupiter_config_default() {
        let config = JupiterConfig::default();
        assert_eq!(config.api_base_url, "https://api.jup.ag/swap/v1");
        assert!(config.api_key.is_none());
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_jupiter_client_creation() {
        assert!(JupiterClient::new().is_ok());
    }
}
