//! Jupiter Wire Types
//!
//! Request/response structures for the Jupiter V6 quote, swap and price
//! endpoints.

use serde::{Deserialize, Serialize};

/// Parameters for the /quote endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Amount in base units (lamports for SOL)
    pub amount: u64,
    /// Slippage tolerance in basis points (1 = 0.01%)
    pub slippage_bps: u16,
}

impl QuoteRequest {
    pub fn new(input_mint: String, output_mint: String, amount: u64, slippage_bps: u16) -> Self {
        Self {
            input_mint,
            output_mint,
            amount,
            slippage_bps,
        }
    }
}

/// Response from the /quote endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub other_amount_threshold: String,
    pub swap_mode: String,
    pub slippage_bps: u16,
    #[serde(default)]
    pub price_impact_pct: String,
    /// Catch-all for additional fields; echoed back to the /swap endpoint
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

impl QuoteResponse {
    pub fn input_amount(&self) -> u64 {
        self.in_amount.parse().unwrap_or(0)
    }

    pub fn output_amount(&self) -> u64 {
        self.out_amount.parse().unwrap_or(0)
    }

    pub fn min_output_amount(&self) -> u64 {
        self.other_amount_threshold.parse().unwrap_or(0)
    }

    pub fn price_impact(&self) -> f64 {
        self.price_impact_pct.parse().unwrap_or(0.0)
    }
}

/// Parameters for the /swap endpoint (transaction build)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    /// Signing wallet address
    pub user_public_key: String,
    /// The full quote response, echoed back verbatim
    pub quote_response: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prioritization_fee_lamports: Option<u64>,
    pub dynamic_compute_unit_limit: bool,
}

/// Response from the /swap endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    /// Base64 serialized transaction, ready to sign
    pub swap_transaction: String,
    pub last_valid_block_height: u64,
    #[serde(default)]
    pub prioritization_fee_lamports: u64,
}

/// Response from the price endpoint: mint -> price data
#[derive(Debug, Deserialize)]
pub struct PriceResponse {
    pub data: std::collections::HashMap<String, PriceData>,
}

#[derive(Debug, Deserialize)]
pub struct PriceData {
    pub price: f64,
}
