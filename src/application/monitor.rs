//! Position Monitor
//!
//! Polling evaluator over every OPEN position: refreshes prices through the
//! ledger's recompute, then walks the trigger ladder in order (stop-loss,
//! take-profit, trailing stop, max loss, risk escalation, staleness, rapid
//! loss). The first close-class trigger forces exactly one close through the
//! orchestrator; the first alert-class trigger delivers exactly one alert.
//! Repeat alerts of the same kind for the same position are suppressed by a
//! cooldown window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::domain::position::{Direction, ExitReason, Position};
use crate::domain::risk::{self, PortfolioLimits, RiskAssessment, RiskLevel};
use crate::ports::price_feed::PriceFeed;

use super::orchestrator::{TradingOrchestrator, SYSTEM_ACTOR};

#[derive(Debug, Error)]
pub enum AlertDeliveryError {
    #[error("Alert delivery failed: {0}")]
    Failed(String),
}

/// Alert classes the monitor can raise (close-class triggers force a close
/// instead of alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    RiskEscalation,
    StalePosition,
    RapidLoss,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::RiskEscalation => "risk_escalation",
            AlertKind::StalePosition => "stale_position",
            AlertKind::RapidLoss => "rapid_loss",
        }
    }
}

/// A monitor alert instance.
#[derive(Debug, Clone)]
pub struct PositionAlert {
    pub position_id: String,
    pub token_symbol: String,
    pub kind: AlertKind,
    pub message: String,
    pub pnl_pct: f64,
    pub timestamp: DateTime<Utc>,
}

/// Async alert sink. A failing handler is logged and never blocks other
/// handlers or the next tick.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, alert: &PositionAlert) -> Result<(), AlertDeliveryError>;
}

/// What the trigger ladder decided for one position on one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerAction {
    Close(ExitReason),
    Alert(AlertKind),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub alert_cooldown: Duration,
    /// Maintenance margin ratio used for liquidation-risk scoring
    pub maintenance_margin: f64,
    /// Leverage assumed for risk scoring; 1.0 = spot
    pub leverage: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            alert_cooldown: Duration::from_secs(300),
            maintenance_margin: 0.05,
            leverage: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub ticks: u64,
    pub alerts_sent: u64,
    pub forced_closes: u64,
    pub alerts_by_kind: HashMap<&'static str, u64>,
}

/// Tracks the best PnL seen per position for rapid-loss detection.
#[derive(Debug, Clone, Copy)]
struct HighWater {
    peak_pnl_pct: f64,
    seen_at: Instant,
}

/// Polling position evaluator driving alerts and forced closes.
pub struct PositionMonitor {
    orchestrator: Arc<TradingOrchestrator>,
    price_feed: Arc<dyn PriceFeed>,
    config: MonitorConfig,
    handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    high_water: Mutex<HashMap<String, HighWater>>,
    is_running: RwLock<bool>,
    stats: Mutex<MonitorStats>,
}

impl PositionMonitor {
    pub fn new(
        orchestrator: Arc<TradingOrchestrator>,
        price_feed: Arc<dyn PriceFeed>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            orchestrator,
            price_feed,
            config,
            handlers: RwLock::new(Vec::new()),
            cooldowns: Mutex::new(HashMap::new()),
            high_water: Mutex::new(HashMap::new()),
            is_running: RwLock::new(false),
            stats: Mutex::new(MonitorStats::default()),
        }
    }

    pub async fn register_handler(&self, handler: Arc<dyn AlertHandler>) {
        tracing::info!("Registered alert handler: {}", handler.name());
        self.handlers.write().await.push(handler);
    }

    pub async fn stats(&self) -> MonitorStats {
        self.stats.lock().await.clone()
    }

    /// Run the polling loop until `stop()` is called.
    pub async fn run(&self) {
        *self.is_running.write().await = true;
        tracing::info!(
            "Position monitor started (interval: {:?})",
            self.config.poll_interval
        );

        while *self.is_running.read().await {
            self.tick().await;
            tokio::time::sleep(self.config.poll_interval).await;
        }

        tracing::info!("Position monitor stopped");
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    /// Evaluate every open position once.
    pub async fn tick(&self) {
        self.stats.lock().await.ticks += 1;

        let positions = self.orchestrator.get_open_positions().await;
        let open_ids: Vec<String> = positions.iter().map(|p| p.id.clone()).collect();

        for position in positions {
            if let Err(e) = self.check_position(&position).await {
                tracing::error!("Monitor check failed for {}: {}", position.id, e);
            }
        }

        // Drop tracking state for positions that are no longer open
        let mut high_water = self.high_water.lock().await;
        high_water.retain(|id, _| open_ids.contains(id));
    }

    async fn check_position(&self, position: &Position) -> Result<(), String> {
        let price = match self.price_feed.get_price(&position.token_mint).await {
            Ok(p) if p > 0.0 => p,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    "No price for {} - skipping monitor check",
                    position.token_symbol
                );
                return Ok(());
            }
        };

        let Some(updated) = self
            .orchestrator
            .ledger()
            .recompute(&position.id, price)
            .await
        else {
            return Ok(());
        };

        let drawdown_pct = self.update_high_water(&updated).await;

        let assessment = risk::assess(
            updated.entry_price,
            updated.current_price,
            updated.direction,
            self.config.leverage,
            updated.notional_usd / self.config.leverage.max(1.0),
            updated.notional_usd,
            self.config.maintenance_margin,
        );

        let action = decide(
            &updated,
            &assessment,
            drawdown_pct,
            self.orchestrator.limits(),
            Utc::now(),
        );

        match action {
            Some(TriggerAction::Close(reason)) => self.force_close(&updated, reason).await,
            Some(TriggerAction::Alert(kind)) => {
                self.raise_alert(&updated, kind, &assessment).await
            }
            None => {}
        }

        Ok(())
    }

    /// Track the peak PnL since the position was first seen; returns the
    /// drawdown from that peak if the peak is recent enough to count.
    async fn update_high_water(&self, position: &Position) -> Option<f64> {
        let mut map = self.high_water.lock().await;
        let pnl = position.pnl_pct;
        let window = Duration::from_secs(
            self.orchestrator.limits().rapid_loss_window_secs,
        );

        match map.get_mut(&position.id) {
            Some(hw) => {
                if pnl > hw.peak_pnl_pct {
                    hw.peak_pnl_pct = pnl;
                    hw.seen_at = Instant::now();
                    None
                } else if hw.seen_at.elapsed() <= window {
                    Some(hw.peak_pnl_pct - pnl)
                } else {
                    None
                }
            }
            None => {
                map.insert(
                    position.id.clone(),
                    HighWater {
                        peak_pnl_pct: pnl,
                        seen_at: Instant::now(),
                    },
                );
                None
            }
        }
    }

    async fn force_close(&self, position: &Position, reason: ExitReason) {
        tracing::warn!(
            "{} triggered for {} ({}) at ${:.6} - forcing close",
            reason.as_str(),
            position.token_symbol,
            position.id,
            position.current_price
        );

        match self
            .orchestrator
            .close_position(SYSTEM_ACTOR, &position.id, reason)
            .await
        {
            Ok(closed) => {
                self.stats.lock().await.forced_closes += 1;
                tracing::info!(
                    "Forced close of {} complete: P&L ${:+.2} ({:+.1}%)",
                    closed.token_symbol,
                    closed.pnl_usd,
                    closed.pnl_pct
                );
            }
            Err(e) => {
                tracing::error!("Forced close of {} failed: {}", position.id, e);
            }
        }
    }

    async fn raise_alert(&self, position: &Position, kind: AlertKind, assessment: &RiskAssessment) {
        let cooldown_key = format!("{}:{}", position.id, kind.as_str());
        {
            let mut cooldowns = self.cooldowns.lock().await;
            if let Some(last) = cooldowns.get(&cooldown_key) {
                if last.elapsed() < self.config.alert_cooldown {
                    return;
                }
            }
            cooldowns.insert(cooldown_key, Instant::now());
        }

        let message = match kind {
            AlertKind::RiskEscalation => format!(
                "Risk level {:?} (score {}, health {:.2}, {:.1}% from liquidation)",
                assessment.risk_level,
                assessment.risk_score,
                assessment.health_factor,
                assessment.distance_to_liquidation_pct
            ),
            AlertKind::StalePosition => format!(
                "Open for {:.1} hours with no exit trigger",
                position.age_seconds(Utc::now()) as f64 / 3600.0
            ),
            AlertKind::RapidLoss => format!(
                "Rapid drawdown from peak, now {:+.1}%",
                position.pnl_pct
            ),
        };

        let alert = PositionAlert {
            position_id: position.id.clone(),
            token_symbol: position.token_symbol.clone(),
            kind,
            message,
            pnl_pct: position.pnl_pct,
            timestamp: Utc::now(),
        };

        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            if let Err(e) = handler.deliver(&alert).await {
                tracing::error!("Alert handler {} failed: {}", handler.name(), e);
            }
        }

        let mut stats = self.stats.lock().await;
        stats.alerts_sent += 1;
        *stats.alerts_by_kind.entry(kind.as_str()).or_insert(0) += 1;
    }
}

/// The ordered trigger ladder. Exactly one action (or none) per position
/// per tick.
pub fn decide(
    position: &Position,
    assessment: &RiskAssessment,
    drawdown_pct: Option<f64>,
    limits: &PortfolioLimits,
    now: DateTime<Utc>,
) -> Option<TriggerAction> {
    let price = position.current_price;

    let sl_hit = match position.direction {
        Direction::Long => price <= position.stop_loss_price,
        Direction::Short => price >= position.stop_loss_price,
    };
    if sl_hit {
        return Some(TriggerAction::Close(ExitReason::StopLoss));
    }

    let tp_hit = match position.direction {
        Direction::Long => price >= position.take_profit_price,
        Direction::Short => price <= position.take_profit_price,
    };
    if tp_hit {
        return Some(TriggerAction::Close(ExitReason::TakeProfit));
    }

    if let Some(trailing) = position.trailing_stop_price {
        let trailing_hit = match position.direction {
            Direction::Long => price <= trailing,
            Direction::Short => price >= trailing,
        };
        if trailing_hit {
            return Some(TriggerAction::Close(ExitReason::TrailingStop));
        }
    }

    if position.pnl_usd < -limits.max_loss_per_position_usd {
        return Some(TriggerAction::Close(ExitReason::MaxLoss));
    }

    if matches!(
        assessment.risk_level,
        RiskLevel::High | RiskLevel::Critical | RiskLevel::Liquidation
    ) {
        return Some(TriggerAction::Alert(AlertKind::RiskEscalation));
    }

    let age_hours = position.age_seconds(now) as f64 / 3600.0;
    if age_hours >= limits.stale_position_hours {
        return Some(TriggerAction::Alert(AlertKind::StalePosition));
    }

    if let Some(drawdown) = drawdown_pct {
        if drawdown >= limits.rapid_loss_pct {
            return Some(TriggerAction::Alert(AlertKind::RapidLoss));
        }
    }

    None
}
