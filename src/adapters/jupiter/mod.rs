//! Jupiter Adapter
//!
//! Price feed and execution port implementations for the Jupiter DEX
//! aggregator: quote fetching, swap building and transaction submission.

mod client;
mod quote;

pub use client::{JupiterClient, JupiterConfig, JupiterExecutionAdapter};
pub use quote::{QuoteRequest, QuoteResponse, SwapRequest, SwapResponse};
