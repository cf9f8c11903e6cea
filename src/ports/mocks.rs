//! Recording mocks for the external ports.
//!
//! Each mock records every call and serves scripted responses, so tests can
//! assert both outcomes and invocation counts (e.g. dry-run isolation).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::execution::{ExecutionAdapter, ExecutionError, Fill, Quote};
use super::price_feed::{PriceError, PriceFeed};
use super::signer::{SignerError, SignerPort};

/// Mock price feed with per-mint prices and a call log.
#[derive(Debug, Default)]
pub struct MockPriceFeed {
    prices: Mutex<HashMap<String, f64>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, mint: &str, price: f64) -> Self {
        self.prices.lock().unwrap().insert(mint.to_string(), price);
        self
    }

    pub fn set_price(&self, mint: &str, price: f64) {
        self.prices.lock().unwrap().insert(mint.to_string(), price);
    }

    pub fn remove_price(&self, mint: &str) {
        self.prices.lock().unwrap().remove(mint);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    async fn get_price(&self, token_mint: &str) -> Result<f64, PriceError> {
        self.calls.lock().unwrap().push(token_mint.to_string());
        self.prices
            .lock()
            .unwrap()
            .get(token_mint)
            .copied()
            .ok_or_else(|| PriceError::NoPriceData(token_mint.to_string()))
    }
}

/// Mock execution adapter with scripted quote/submit outcomes and
/// invocation counters.
#[derive(Debug)]
pub struct MockExecution {
    quote_calls: Arc<Mutex<Vec<(String, String, u64)>>>,
    submit_calls: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_quote: Mutex<bool>,
    fail_submit: Mutex<bool>,
    fill_price: Mutex<f64>,
}

impl Default for MockExecution {
    fn default() -> Self {
        Self {
            quote_calls: Arc::new(Mutex::new(Vec::new())),
            submit_calls: Arc::new(Mutex::new(Vec::new())),
            fail_quote: Mutex::new(false),
            fail_submit: Mutex::new(false),
            fill_price: Mutex::new(1.0),
        }
    }
}

impl MockExecution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fill_price(self, price: f64) -> Self {
        *self.fill_price.lock().unwrap() = price;
        self
    }

    /// Script the next quote calls to fail.
    pub fn fail_quotes(&self, fail: bool) {
        *self.fail_quote.lock().unwrap() = fail;
    }

    /// Script the next submit calls to fail.
    pub fn fail_submits(&self, fail: bool) {
        *self.fail_submit.lock().unwrap() = fail;
    }

    pub fn set_fill_price(&self, price: f64) {
        *self.fill_price.lock().unwrap() = price;
    }

    pub fn quote_call_count(&self) -> usize {
        self.quote_calls.lock().unwrap().len()
    }

    pub fn submit_call_count(&self) -> usize {
        self.submit_calls.lock().unwrap().len()
    }

    pub fn total_calls(&self) -> usize {
        self.quote_call_count() + self.submit_call_count()
    }
}

#[async_trait]
impl ExecutionAdapter for MockExecution {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        _max_slippage_bps: u16,
    ) -> Result<Quote, ExecutionError> {
        self.quote_calls
            .lock()
            .unwrap()
            .push((input_mint.to_string(), output_mint.to_string(), amount));

        if *self.fail_quote.lock().unwrap() {
            return Err(ExecutionError::QuoteUnavailable("scripted failure".into()));
        }

        let price = *self.fill_price.lock().unwrap();
        Ok(Quote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            input_amount: amount,
            output_amount: amount,
            min_output_amount: amount,
            price,
            transaction: "bW9jay10eA==".to_string(),
        })
    }

    async fn submit(&self, signed_payload: &[u8]) -> Result<Fill, ExecutionError> {
        self.submit_calls
            .lock()
            .unwrap()
            .push(signed_payload.to_vec());

        if *self.fail_submit.lock().unwrap() {
            return Err(ExecutionError::SubmitFailed("scripted failure".into()));
        }

        let price = *self.fill_price.lock().unwrap();
        Ok(Fill {
            tx_id: format!("mock-tx-{}", self.submit_calls.lock().unwrap().len()),
            filled_price: price,
            filled_amount: 1.0,
        })
    }
}

/// Mock signer that counts invocations without touching any key material.
#[derive(Debug)]
pub struct MockSigner {
    address: String,
    balance_lamports: Mutex<u64>,
    sign_calls: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockSigner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            balance_lamports: Mutex::new(0),
            sign_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_balance(self, lamports: u64) -> Self {
        *self.balance_lamports.lock().unwrap() = lamports;
        self
    }

    pub fn sign_call_count(&self) -> usize {
        self.sign_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SignerPort for MockSigner {
    fn treasury_address(&self) -> Result<String, SignerError> {
        Ok(self.address.clone())
    }

    fn treasury_balance_lamports(&self) -> u64 {
        *self.balance_lamports.lock().unwrap()
    }

    async fn sign(&self, _address: &str, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.sign_calls.lock().unwrap().push(payload.to_vec());
        Ok(vec![0u8; 64])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_price_feed() {
        let feed = MockPriceFeed::new().with_price("SOL", 150.0);

        assert_eq!(feed.get_price("SOL").await.unwrap(), 150.0);
        assert!(matches!(
            feed.get_price("UNKNOWN").await,
            Err(PriceError::NoPriceData(_))
        ));
        assert_eq!(feed.calls(), vec!["SOL".to_string(), "UNKNOWN".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_execution_records_calls() {
        let exec = MockExecution::new().with_fill_price(2.5);

        let quote = exec.quote("in", "out", 1000, 50).await.unwrap();
        assert_eq!(quote.price, 2.5);

        let fill = exec.submit(b"signed").await.unwrap();
        assert_eq!(fill.filled_price, 2.5);

        assert_eq!(exec.quote_call_count(), 1);
        assert_eq!(exec.submit_call_count(), 1);
        assert_eq!(exec.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_execution_scripted_failures() {
        let exec = MockExecution::new();
        exec.fail_submits(true);

        assert!(exec.quote("in", "out", 1, 50).await.is_ok());
        assert!(matches!(
            exec.submit(b"x").await,
            Err(ExecutionError::SubmitFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_signer_counts() {
        let signer = MockSigner::new("Treasury1111");
        assert_eq!(signer.treasury_address().unwrap(), "Treasury1111");

        signer.sign("Treasury1111", b"payload").await.unwrap();
        assert_eq!(signer.sign_call_count(), 1);
    }
}
