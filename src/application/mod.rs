//! Application Layer - Orchestration and monitoring
//!
//! - `orchestrator`: the authorized open/close surface over the ledger
//! - `monitor`: the polling evaluator that turns price movement into
//!   alerts and forced closes

pub mod monitor;
pub mod orchestrator;

pub use monitor::{
    AlertHandler, AlertKind, MonitorConfig, MonitorStats, PositionAlert, PositionMonitor,
};
pub use orchestrator::{
    OrchestratorSettings, TradeError, TradingOrchestrator, SOL_MINT, SYSTEM_ACTOR,
};
