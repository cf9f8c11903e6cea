pub mod rpc;

pub use rpc::{SolanaClientError, SolanaRpcClient};
