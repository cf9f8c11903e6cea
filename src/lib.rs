//! Treasury Engine - Secure treasury trading for Solana via Jupiter
//!
//! An automated custody-and-execution engine: encrypted key custody and
//! signing, a durable position ledger with crash recovery, a pure risk and
//! sizing engine, an authorized trading orchestrator, and a threshold-based
//! position monitor.
//!
//! # Modules
//!
//! - `domain`: Core business logic (Position, RiskEngine, TradeReport, audit)
//! - `ledger`: Durable position ledger (two-phase open, migration, recompute)
//! - `vault`: Encrypted wallet custody and signing
//! - `ports`: Trait abstractions (PriceFeed, ExecutionAdapter, SignerPort)
//! - `adapters`: External implementations (Jupiter, Solana RPC)
//! - `application`: TradingOrchestrator and PositionMonitor
//! - `config`: Configuration loading and validation

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod ports;
pub mod vault;
