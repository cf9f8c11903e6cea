//! Trading Orchestrator
//!
//! The only mutating surface external collaborators call. Authorizes the
//! caller, sizes and risk-checks the trade, reserves ledger capacity, runs
//! the execution leg outside the ledger lock, then commits or releases.
//! The dry-run flag gates every signer and execution call site.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use thiserror::Error;

use crate::domain::position::{Direction, ExitReason, Position};
use crate::domain::report::TradeReport;
use crate::domain::risk::{self, PortfolioLimits, RiskTier, RiskViolation};
use crate::ledger::{LedgerError, PositionLedger};
use crate::ports::execution::{ExecutionAdapter, Fill};
use crate::ports::price_feed::PriceFeed;
use crate::ports::signer::{SignerError, SignerPort};

/// Wrapped SOL mint, the quote leg for every treasury swap
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Actor id used for engine-initiated closes (monitor triggers)
pub const SYSTEM_ACTOR: u64 = 0;

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("Unauthorized - admin access required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Maximum positions reached ({0})")]
    CapacityExceeded(usize),

    #[error(transparent)]
    Risk(#[from] RiskViolation),

    #[error("Price unavailable, try again: {0}")]
    PriceUnavailable(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Signing(#[from] SignerError),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Position not found: {0}")]
    NotFound(String),

    #[error("Trading halted - ledger persistence must be resolved first")]
    Halted,
}

impl From<LedgerError> for TradeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::CapacityExceeded(n) => TradeError::CapacityExceeded(n),
            LedgerError::NotFound(id) => TradeError::NotFound(id),
            LedgerError::Halted => TradeError::Halted,
            LedgerError::Persistence(msg) => TradeError::Persistence(msg),
            other => TradeError::Persistence(other.to_string()),
        }
    }
}

/// Tunable settings, typically sourced from the config file.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Caller ids allowed to mutate trading state
    pub admin_ids: Vec<u64>,
    pub risk_tier: RiskTier,
    pub limits: PortfolioLimits,
    /// When true, no signer or execution calls occur anywhere
    pub dry_run: bool,
    pub slippage_bps: u16,
    /// Optional trailing stop applied to every new position
    pub trailing_stop_pct: Option<f64>,
    /// Leverage multiple; 1.0 = spot
    pub leverage: f64,
    /// Default signal grade when the caller supplies none
    pub default_grade: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            admin_ids: Vec::new(),
            risk_tier: RiskTier::Moderate,
            limits: PortfolioLimits::default(),
            dry_run: true,
            slippage_bps: 200,
            trailing_stop_pct: None,
            leverage: 1.0,
            default_grade: "B".to_string(),
        }
    }
}

/// Coordinates custody, risk and execution around the position ledger.
pub struct TradingOrchestrator {
    ledger: Arc<PositionLedger>,
    signer: Arc<dyn SignerPort>,
    price_feed: Arc<dyn PriceFeed>,
    execution: Arc<dyn ExecutionAdapter>,
    settings: OrchestratorSettings,
}

impl TradingOrchestrator {
    pub fn new(
        ledger: Arc<PositionLedger>,
        signer: Arc<dyn SignerPort>,
        price_feed: Arc<dyn PriceFeed>,
        execution: Arc<dyn ExecutionAdapter>,
        mut settings: OrchestratorSettings,
    ) -> Self {
        // Monitor-initiated closes pass the same auth gate under a
        // distinct, auditable actor id
        if !settings.admin_ids.contains(&SYSTEM_ACTOR) {
            settings.admin_ids.push(SYSTEM_ACTOR);
        }
        Self {
            ledger,
            signer,
            price_feed,
            execution,
            settings,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn limits(&self) -> &PortfolioLimits {
        &self.settings.limits
    }

    fn is_admin(&self, caller_id: u64) -> bool {
        self.settings.admin_ids.contains(&caller_id)
    }

    // ==========================================================================
    // OPEN
    // ==========================================================================

    pub async fn open_position(
        &self,
        caller_id: u64,
        token_mint: &str,
        token_symbol: &str,
        direction: Direction,
        requested_usd: Option<f64>,
        signal_grade: Option<&str>,
    ) -> Result<Position, TradeError> {
        // 1. Authorization: reject, audit, no other side effect
        if !self.is_admin(caller_id) {
            self.ledger.log_audit(
                "OPEN_POSITION_REJECTED",
                &caller_id.to_string(),
                false,
                serde_json::json!({"token": token_symbol, "reason": "unauthorized"}),
            );
            return Err(TradeError::Unauthorized);
        }

        // 2. Input validation before any lock or I/O
        if !is_valid_mint(token_mint) {
            return Err(TradeError::Validation(format!(
                "Malformed token mint: {}",
                token_mint
            )));
        }
        if let Some(usd) = requested_usd {
            if !(usd > 0.0) || !usd.is_finite() {
                return Err(TradeError::Validation(
                    "Amount must be a positive number".to_string(),
                ));
            }
        }

        // 3. Current price; unavailability is retryable by the caller
        let price = self
            .price_feed
            .get_price(token_mint)
            .await
            .map_err(|e| TradeError::PriceUnavailable(e.to_string()))?;
        if price <= 0.0 {
            return Err(TradeError::PriceUnavailable(token_symbol.to_string()));
        }

        let grade = signal_grade.unwrap_or(&self.settings.default_grade).to_string();

        // 4. Size via the risk engine when the caller did not specify
        let portfolio_usd = self.portfolio_value_usd().await?;
        let amount_usd = match requested_usd {
            Some(usd) => usd,
            None => risk::position_size(portfolio_usd, self.settings.risk_tier),
        };
        if amount_usd <= 0.0 {
            return Err(TradeError::Validation(
                "Position size resolved to zero - fund the treasury or pass an amount".to_string(),
            ));
        }

        // 5. Exposure and spending caps
        let open_positions = self.ledger.get_open_positions().await;
        if let Err(violation) = risk::validate_daily_volume(
            amount_usd,
            self.ledger.daily_volume(),
            &self.settings.limits,
        )
        .and_then(|_| {
            risk::validate_exposure(
                token_mint,
                amount_usd,
                self.settings.leverage,
                &open_positions,
                portfolio_usd,
                &self.settings.limits,
            )
        }) {
            self.ledger.log_audit(
                "OPEN_POSITION_REJECTED",
                &caller_id.to_string(),
                false,
                serde_json::json!({
                    "token": token_symbol,
                    "reason": "risk_limit",
                    "violation": violation.to_string(),
                    "amount_usd": amount_usd,
                }),
            );
            return Err(TradeError::Risk(violation));
        }

        // 6. Reserve capacity; the slot is held while execution runs
        let token = match self.ledger.reserve_slot(token_mint).await {
            Ok(t) => t,
            Err(e) => {
                self.ledger.log_audit(
                    "OPEN_POSITION_REJECTED",
                    &caller_id.to_string(),
                    false,
                    serde_json::json!({"token": token_symbol, "reason": "capacity"}),
                );
                return Err(e.into());
            }
        };

        // 7. Execution leg, outside the ledger lock. Any failure releases
        // the reservation before surfacing.
        let (entry_price, tx_id) = if self.settings.dry_run {
            (price, None)
        } else {
            match self.execute_entry(direction, token_mint, amount_usd, price).await {
                Ok(fill) => {
                    let entry = if fill.filled_price > 0.0 && fill.filled_price.is_finite() {
                        fill.filled_price
                    } else {
                        price
                    };
                    (entry, Some(fill.tx_id))
                }
                Err(e) => {
                    self.ledger.release_reservation(token).await;
                    self.ledger.log_audit(
                        "OPEN_POSITION_FAILED",
                        &caller_id.to_string(),
                        false,
                        serde_json::json!({"token": token_symbol, "error": e.to_string()}),
                    );
                    return Err(e);
                }
            }
        };

        // 8. Build and commit. Nothing else runs between fill confirmation
        // and the persisted commit.
        let (tp_price, sl_price) = risk::tp_sl_levels(entry_price, &grade, direction);
        let position = Position::open(
            uuid::Uuid::new_v4().to_string()[..8].to_string(),
            token_mint.to_string(),
            token_symbol.to_string(),
            direction,
            entry_price,
            amount_usd / entry_price,
            amount_usd,
            tp_price,
            sl_price,
            self.settings.trailing_stop_pct,
            grade.clone(),
            0.0,
            Utc::now(),
        )
        .map_err(|e| {
            // Unreachable for positive entry prices; surfaced as validation
            // if it ever fires
            TradeError::Validation(e.to_string())
        })?;

        let position = self
            .ledger
            .commit_open(token, position, &caller_id.to_string())
            .await?;

        if let Err(e) = self.ledger.add_daily_volume(amount_usd) {
            tracing::warn!("Failed to record daily volume: {}", e);
        }

        tracing::info!(
            "Opened {} {} ${:.2} @ ${:.6} (TP ${:.6} / SL ${:.6}){}",
            match direction {
                Direction::Long => "LONG",
                Direction::Short => "SHORT",
            },
            token_symbol,
            amount_usd,
            entry_price,
            tp_price,
            sl_price,
            tx_id.map(|t| format!(" tx {}", t)).unwrap_or_default(),
        );

        Ok(position)
    }

    /// Quote, sign and submit the entry swap. Only called in live mode.
    async fn execute_entry(
        &self,
        direction: Direction,
        token_mint: &str,
        amount_usd: f64,
        _token_price: f64,
    ) -> Result<Fill, TradeError> {
        if direction == Direction::Short {
            return Err(TradeError::Execution(
                "Short entries are not supported by the spot venue".to_string(),
            ));
        }

        let sol_price = self
            .price_feed
            .get_price(SOL_MINT)
            .await
            .map_err(|e| TradeError::PriceUnavailable(e.to_string()))?;
        if sol_price <= 0.0 {
            return Err(TradeError::PriceUnavailable("SOL".to_string()));
        }
        let lamports = (amount_usd / sol_price * 1e9) as u64;
        if lamports == 0 {
            return Err(TradeError::Validation("Trade too small".to_string()));
        }

        let quote = self
            .execution
            .quote(SOL_MINT, token_mint, lamports, self.settings.slippage_bps)
            .await
            .map_err(|e| TradeError::Execution(e.to_string()))?;

        self.sign_and_submit(&quote.transaction).await
    }

    /// Sign the venue-built payload with the treasury key and submit.
    async fn sign_and_submit(&self, transaction_b64: &str) -> Result<Fill, TradeError> {
        let treasury = self.signer.treasury_address()?;
        let payload = BASE64
            .decode(transaction_b64)
            .map_err(|e| TradeError::Execution(format!("Bad venue transaction: {}", e)))?;

        let signature = self.signer.sign(&treasury, &payload).await?;

        let mut signed = Vec::with_capacity(signature.len() + payload.len());
        signed.extend_from_slice(&signature);
        signed.extend_from_slice(&payload);

        self.execution
            .submit(&signed)
            .await
            .map_err(|e| TradeError::Execution(e.to_string()))
    }

    // ==========================================================================
    // CLOSE
    // ==========================================================================

    pub async fn close_position(
        &self,
        caller_id: u64,
        position_id: &str,
        reason: ExitReason,
    ) -> Result<Position, TradeError> {
        if !self.is_admin(caller_id) {
            self.ledger.log_audit(
                "CLOSE_POSITION_REJECTED",
                &caller_id.to_string(),
                false,
                serde_json::json!({"position_id": position_id, "reason": "unauthorized"}),
            );
            return Err(TradeError::Unauthorized);
        }

        let position = self
            .ledger
            .get_position(position_id)
            .await
            .ok_or_else(|| TradeError::NotFound(position_id.to_string()))?;

        // Terminal ids short-circuit through the ledger's idempotent close
        if !position.is_open() {
            return Ok(self
                .ledger
                .record_close(position_id, 0.0, reason, &caller_id.to_string())
                .await?);
        }

        let feed_price = self
            .price_feed
            .get_price(&position.token_mint)
            .await
            .map_err(|e| TradeError::PriceUnavailable(e.to_string()))?;

        let exit_price = if self.settings.dry_run {
            feed_price
        } else {
            // Reverse swap back into SOL; the recorded exit is whatever the
            // venue filled, not the requested price
            let base_units = (position.quantity * 1e9) as u64;
            let quote = self
                .execution
                .quote(
                    &position.token_mint,
                    SOL_MINT,
                    base_units.max(1),
                    self.settings.slippage_bps,
                )
                .await
                .map_err(|e| TradeError::Execution(e.to_string()))?;

            let fill = self.sign_and_submit(&quote.transaction).await?;
            if fill.filled_price > 0.0 && fill.filled_price.is_finite() {
                fill.filled_price
            } else {
                feed_price
            }
        };

        Ok(self
            .ledger
            .record_close(position_id, exit_price, reason, &caller_id.to_string())
            .await?)
    }

    // ==========================================================================
    // READ-ONLY SURFACE
    // ==========================================================================

    pub async fn get_open_positions(&self) -> Vec<Position> {
        self.ledger.get_open_positions().await
    }

    pub async fn generate_report(&self) -> TradeReport {
        let history = self.ledger.trade_history().await;
        let open = self.ledger.get_open_positions().await;
        TradeReport::generate(&history, &open)
    }

    /// Grade-keyed TP/SL prices for an entry.
    pub fn get_tp_sl_levels(&self, entry_price: f64, grade: &str, direction: Direction) -> (f64, f64) {
        risk::tp_sl_levels(entry_price, grade, direction)
    }

    /// Position size in USD for the configured risk tier.
    pub fn calculate_position_size(&self, portfolio_usd: f64) -> f64 {
        risk::position_size(portfolio_usd, self.settings.risk_tier)
    }

    /// Portfolio value from the cached treasury balance and the SOL price.
    /// An unfunded treasury is worth zero without a feed call.
    pub async fn portfolio_value_usd(&self) -> Result<f64, TradeError> {
        let lamports = self.signer.treasury_balance_lamports();
        if lamports == 0 {
            return Ok(0.0);
        }
        let sol_price = self
            .price_feed
            .get_price(SOL_MINT)
            .await
            .map_err(|e| TradeError::PriceUnavailable(e.to_string()))?;
        Ok(lamports as f64 / 1e9 * sol_price)
    }
}

/// Base58 Solana address, 32-44 characters.
pub fn is_valid_mint(mint: &str) -> bool {
    if !(32..=44).contains(&mint.len()) {
        return false;
    }
    bs58::decode(mint).into_vec().is_ok()
}
