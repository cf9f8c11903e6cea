//! Adapters Layer - External System Implementations
//!
//! Implementations of the port traits:
//! - Jupiter: DEX aggregator client (prices, quotes, swap building)
//! - Solana: RPC client for balances and transaction submission

pub mod jupiter;
pub mod solana;

pub use jupiter::{JupiterClient, JupiterConfig, JupiterExecutionAdapter};
pub use solana::SolanaRpcClient;
