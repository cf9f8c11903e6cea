//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract:
//! - Price quotes (PriceFeed)
//! - Swap execution (ExecutionAdapter)
//! - Transaction signing (SignerPort, implemented by the wallet vault)

pub mod execution;
pub mod mocks;
pub mod price_feed;
pub mod signer;

pub use execution::{ExecutionAdapter, ExecutionError, Fill, Quote};
pub use price_feed::{PriceError, PriceFeed};
pub use signer::{SignerError, SignerPort};
