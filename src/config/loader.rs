//! Configuration Loader
//!
//! Loads and validates engine configuration from a TOML file. Secrets never
//! live in the file: the master secret and RPC override come from the
//! environment.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::domain::risk::{PortfolioLimits, RiskTier};

/// Environment variable holding the key-derivation master secret
pub const MASTER_SECRET_ENV: &str = "TREASURY_MASTER_SECRET";

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub jupiter: JupiterSection,
    #[serde(default)]
    pub solana: SolanaSection,
    #[serde(default)]
    pub vault: VaultSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Core engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Simulate fills without touching the signer or the venue
    pub dry_run: bool,
    /// Directory for positions, history, volume and audit files
    pub data_dir: String,
    /// Caller ids allowed to mutate trading state
    pub admin_ids: Vec<u64>,
    /// Position sizing tier
    pub risk_tier: RiskTier,
    /// Trailing stop fraction applied to new positions (0 disables)
    pub trailing_stop_pct: f64,
    /// Default signal grade when a caller supplies none
    pub default_grade: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            dry_run: true,
            data_dir: "data".to_string(),
            admin_ids: Vec::new(),
            risk_tier: RiskTier::Moderate,
            trailing_stop_pct: 0.0,
            default_grade: "B".to_string(),
        }
    }
}

/// Portfolio limit overrides; mirrors `PortfolioLimits` defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_positions: usize,
    pub max_trade_usd: f64,
    pub max_daily_usd: f64,
    pub max_position_pct: f64,
    pub max_symbol_exposure_pct: f64,
    pub max_total_exposure_pct: f64,
    pub max_leverage: f64,
    pub max_loss_per_position_usd: f64,
    pub stale_position_hours: f64,
    pub rapid_loss_pct: f64,
    pub rapid_loss_window_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let defaults = PortfolioLimits::default();
        Self {
            max_positions: defaults.max_positions,
            max_trade_usd: defaults.max_trade_usd,
            max_daily_usd: defaults.max_daily_usd,
            max_position_pct: defaults.max_position_pct,
            max_symbol_exposure_pct: defaults.max_symbol_exposure_pct,
            max_total_exposure_pct: defaults.max_total_exposure_pct,
            max_leverage: defaults.max_leverage,
            max_loss_per_position_usd: defaults.max_loss_per_position_usd,
            stale_position_hours: defaults.stale_position_hours,
            rapid_loss_pct: defaults.rapid_loss_pct,
            rapid_loss_window_secs: defaults.rapid_loss_window_secs,
        }
    }
}

impl LimitsSection {
    pub fn to_portfolio_limits(&self) -> PortfolioLimits {
        PortfolioLimits {
            max_positions: self.max_positions,
            max_trade_usd: self.max_trade_usd,
            max_daily_usd: self.max_daily_usd,
            max_position_pct: self.max_position_pct,
            max_symbol_exposure_pct: self.max_symbol_exposure_pct,
            max_total_exposure_pct: self.max_total_exposure_pct,
            max_leverage: self.max_leverage,
            max_loss_per_position_usd: self.max_loss_per_position_usd,
            stale_position_hours: self.stale_position_hours,
            rapid_loss_pct: self.rapid_loss_pct,
            rapid_loss_window_secs: self.rapid_loss_window_secs,
        }
    }
}

/// Position monitor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Seconds between monitor ticks
    pub poll_interval_secs: u64,
    /// Cooldown between repeat alerts of the same kind per position
    pub alert_cooldown_secs: u64,
    /// Maintenance margin ratio for liquidation scoring
    pub maintenance_margin: f64,
    /// Leverage assumed for risk scoring; 1.0 = spot
    pub leverage: f64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            alert_cooldown_secs: 300,
            maintenance_margin: 0.05,
            leverage: 1.0,
        }
    }
}

/// Jupiter API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JupiterSection {
    /// Swap API base URL
    pub api_url: String,
    /// Price API base URL
    pub price_api_url: String,
    /// Optional API key for higher rate limits
    pub api_key: Option<String>,
    /// Slippage tolerance in basis points
    pub slippage_bps: u16,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for JupiterSection {
    fn default() -> Self {
        Self {
            api_url: "https://api.jup.ag/swap/v1".to_string(),
            price_api_url: "https://price.jup.ag/v6/price".to_string(),
            api_key: None,
            slippage_bps: 200,
            timeout_secs: 30,
        }
    }
}

/// Solana RPC configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolanaSection {
    pub rpc_url: String,
}

impl Default for SolanaSection {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
        }
    }
}

impl SolanaSection {
    /// RPC URL with environment variable override
    pub fn get_rpc_url(&self) -> String {
        std::env::var("SOLANA_RPC_URL").unwrap_or_else(|_| self.rpc_url.clone())
    }
}

/// Wallet vault configuration. The master secret is env-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultSection {
    /// Directory for the wallet registry and key blobs
    pub wallet_dir: String,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            wallet_dir: "data/wallet".to_string(),
        }
    }
}

impl VaultSection {
    /// Wallet directory with `~` expanded
    pub fn expanded_wallet_dir(&self) -> String {
        shellexpand::tilde(&self.wallet_dir).to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Read the master secret from the environment. Never logged, never stored
/// in the config file.
pub fn master_secret() -> Result<String, ConfigError> {
    std::env::var(MASTER_SECRET_ENV).map_err(|_| {
        ConfigError::ValidationError(format!("{} is not set", MASTER_SECRET_ENV))
    })
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_positions == 0 {
            return Err(ConfigError::ValidationError(
                "max_positions must be > 0".to_string(),
            ));
        }
        if self.limits.max_trade_usd <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "max_trade_usd must be > 0, got {}",
                self.limits.max_trade_usd
            )));
        }
        if !(0.0..=1.0).contains(&self.limits.max_position_pct)
            || self.limits.max_position_pct == 0.0
        {
            return Err(ConfigError::ValidationError(format!(
                "max_position_pct must be in (0, 1], got {}",
                self.limits.max_position_pct
            )));
        }
        if !(0.0..1.0).contains(&self.engine.trailing_stop_pct) {
            return Err(ConfigError::ValidationError(format!(
                "trailing_stop_pct must be in [0, 1), got {}",
                self.engine.trailing_stop_pct
            )));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.monitor.leverage < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "leverage must be >= 1, got {}",
                self.monitor.leverage
            )));
        }
        if self.jupiter.slippage_bps == 0 {
            return Err(ConfigError::ValidationError(
                "slippage_bps must be > 0".to_string(),
            ));
        }
        if !self.engine.dry_run && self.engine.admin_ids.is_empty() {
            return Err(ConfigError::ValidationError(
                "live mode requires at least one admin id".to_string(),
            ));
        }
        Ok(())
    }

    /// Trailing stop as an Option (0 disables)
    pub fn trailing_stop(&self) -> Option<f64> {
        if self.engine.trailing_stop_pct > 0.0 {
            Some(self.engine.trailing_stop_pct)
        } else {
            None
        }
    }
}
