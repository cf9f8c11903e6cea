//! Position Lifecycle
//!
//! Core position record with the TP/SL ordering invariant enforced at
//! construction and the RESERVED -> OPEN -> {CLOSED, LIQUIDATED} state
//! machine. Price marking and trailing-stop math live here but are only
//! driven through `PositionLedger::recompute`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// PnL sign: +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Transient in-memory slot held while execution is in flight.
    /// Never valid in persisted state.
    Reserved,
    Open,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionStatus::Closed | PositionStatus::Liquidated)
    }
}

/// Why a position left the OPEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Manual,
    TakeProfit,
    StopLoss,
    TrailingStop,
    MaxLoss,
    Liquidation,
    Stale,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Manual => "manual",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::MaxLoss => "max_loss",
            ExitReason::Liquidation => "liquidation",
            ExitReason::Stale => "stale",
        }
    }
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("Invalid notional: {0}")]
    InvalidNotional(f64),
    #[error("Take profit {tp} / stop loss {sl} ordering invalid for {direction:?} entry {entry}")]
    InvalidTpSlOrdering {
        direction: Direction,
        entry: f64,
        tp: f64,
        sl: f64,
    },
    #[error("Invalid trailing stop percentage: {0}")]
    InvalidTrailingStop(f64),
    #[error("Position is not open")]
    NotOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub token_mint: String,
    pub token_symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub current_price: f64,
    /// Token amount
    pub quantity: f64,
    /// Entry value in USD
    pub notional_usd: f64,
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
    /// Trailing stop as a fraction of 1.0 (e.g. 0.05 = 5% behind the peak)
    #[serde(default)]
    pub trailing_stop_pct: Option<f64>,
    /// High-water-mark-derived trailing stop; only ever tightens
    #[serde(default)]
    pub trailing_stop_price: Option<f64>,
    /// Best price seen in the position's favor since entry
    pub peak_price: f64,
    pub status: PositionStatus,
    pub signal_grade: String,
    pub signal_score: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub pnl_usd: f64,
    #[serde(default)]
    pub pnl_pct: f64,
}

impl Position {
    /// Create a new OPEN position, rejecting invariant-violating inputs.
    ///
    /// For Long: take_profit > entry > stop_loss. For Short the inverse.
    /// Violations are errors, never silently clamped.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: String,
        token_mint: String,
        token_symbol: String,
        direction: Direction,
        entry_price: f64,
        quantity: f64,
        notional_usd: f64,
        take_profit_price: f64,
        stop_loss_price: f64,
        trailing_stop_pct: Option<f64>,
        signal_grade: String,
        signal_score: f64,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, PositionError> {
        if !(entry_price > 0.0) || !entry_price.is_finite() {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }
        if !(quantity > 0.0) || !quantity.is_finite() {
            return Err(PositionError::InvalidQuantity(quantity));
        }
        if !(notional_usd > 0.0) || !notional_usd.is_finite() {
            return Err(PositionError::InvalidNotional(notional_usd));
        }

        let ordering_ok = match direction {
            Direction::Long => take_profit_price > entry_price && entry_price > stop_loss_price,
            Direction::Short => take_profit_price < entry_price && entry_price < stop_loss_price,
        };
        if !ordering_ok {
            return Err(PositionError::InvalidTpSlOrdering {
                direction,
                entry: entry_price,
                tp: take_profit_price,
                sl: stop_loss_price,
            });
        }

        if let Some(pct) = trailing_stop_pct {
            if !(pct > 0.0 && pct < 1.0) {
                return Err(PositionError::InvalidTrailingStop(pct));
            }
        }

        Ok(Self {
            id,
            token_mint,
            token_symbol,
            direction,
            entry_price,
            current_price: entry_price,
            quantity,
            notional_usd,
            take_profit_price,
            stop_loss_price,
            trailing_stop_pct,
            trailing_stop_price: None,
            peak_price: entry_price,
            status: PositionStatus::Open,
            signal_grade,
            signal_score,
            opened_at,
            closed_at: None,
            exit_price: None,
            exit_reason: None,
            pnl_usd: 0.0,
            pnl_pct: 0.0,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unrealized PnL percentage, sign-adjusted by direction.
    pub fn unrealized_pnl_pct(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.direction.sign() * (self.current_price - self.entry_price) / self.entry_price * 100.0
    }

    /// Unrealized PnL in USD against the entry notional.
    pub fn unrealized_pnl_usd(&self) -> f64 {
        self.notional_usd * self.unrealized_pnl_pct() / 100.0
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_seconds().max(0)
    }

    /// Apply a fresh market price: current price, PnL, high-water mark and
    /// trailing stop. The trailing stop only moves in the position's favor.
    ///
    /// Only `PositionLedger::recompute` drives this, so the tighten-only
    /// invariant lives in one place.
    pub(crate) fn mark_price(&mut self, price: f64) {
        if price <= 0.0 || !price.is_finite() {
            return;
        }
        self.current_price = price;
        self.pnl_pct = self.unrealized_pnl_pct();
        self.pnl_usd = self.unrealized_pnl_usd();

        match self.direction {
            Direction::Long => {
                if price > self.peak_price {
                    self.peak_price = price;
                }
            }
            Direction::Short => {
                if price < self.peak_price {
                    self.peak_price = price;
                }
            }
        }

        if let Some(pct) = self.trailing_stop_pct {
            let candidate = match self.direction {
                Direction::Long => self.peak_price * (1.0 - pct),
                Direction::Short => self.peak_price * (1.0 + pct),
            };
            self.trailing_stop_price = Some(match (self.direction, self.trailing_stop_price) {
                (Direction::Long, Some(existing)) => existing.max(candidate),
                (Direction::Short, Some(existing)) => existing.min(candidate),
                (_, None) => candidate,
            });
        }
    }

    /// Transition to a terminal state with realized PnL.
    pub(crate) fn close_at(
        &mut self,
        exit_price: f64,
        reason: ExitReason,
        when: DateTime<Utc>,
    ) -> Result<(), PositionError> {
        if !self.is_open() {
            return Err(PositionError::NotOpen);
        }
        self.current_price = exit_price;
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        self.closed_at = Some(when);
        self.pnl_pct = if self.entry_price > 0.0 {
            self.direction.sign() * (exit_price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        };
        self.pnl_usd = self.notional_usd * self.pnl_pct / 100.0;
        self.status = if reason == ExitReason::Liquidation {
            PositionStatus::Liquidated
        } else {
            PositionStatus::Closed
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_long() -> Position {
        Position::open(
            "pos-1".to_string(),
            "So11111111111111111111111111111111111111112".to_string(),
            "SOL".to_string(),
            Direction::Long,
            100.0,
            2.0,
            200.0,
            130.0,
            90.0,
            None,
            "A".to_string(),
            0.8,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_long_valid() {
        let pos = open_long();
        assert_eq!(pos.status, PositionStatus::Open);
        assert_eq!(pos.current_price, 100.0);
        assert_eq!(pos.peak_price, 100.0);
        assert!(pos.trailing_stop_price.is_none());
    }

    #[test]
    fn test_open_rejects_bad_ordering_long() {
        let result = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Long,
            100.0,
            1.0,
            100.0,
            90.0, // TP below entry
            80.0,
            None,
            "B".into(),
            0.0,
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(PositionError::InvalidTpSlOrdering { .. })
        ));
    }

    #[test]
    fn test_open_rejects_bad_ordering_short() {
        let result = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Short,
            100.0,
            1.0,
            100.0,
            120.0, // TP above entry is wrong for short
            80.0,
            None,
            "B".into(),
            0.0,
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(PositionError::InvalidTpSlOrdering { .. })
        ));
    }

    #[test]
    fn test_open_short_valid() {
        let pos = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Short,
            100.0,
            1.0,
            100.0,
            85.0,
            110.0,
            None,
            "B".into(),
            0.0,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(pos.direction, Direction::Short);
    }

    #[test]
    fn test_open_rejects_non_positive_inputs() {
        let result = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Long,
            0.0,
            1.0,
            100.0,
            130.0,
            90.0,
            None,
            "B".into(),
            0.0,
            Utc::now(),
        );
        assert!(matches!(result, Err(PositionError::InvalidEntryPrice(_))));
    }

    #[test]
    fn test_unrealized_pnl_pct_sign() {
        let mut long = open_long();
        long.mark_price(110.0);
        assert!((long.unrealized_pnl_pct() - 10.0).abs() < 1e-9);

        let mut short = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Short,
            100.0,
            1.0,
            100.0,
            85.0,
            110.0,
            None,
            "B".into(),
            0.0,
            Utc::now(),
        )
        .unwrap();
        short.mark_price(110.0);
        assert!((short.unrealized_pnl_pct() - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_mark_price_idempotent() {
        let mut pos = open_long();
        pos.mark_price(115.0);
        let first = (pos.pnl_pct, pos.pnl_usd, pos.trailing_stop_price);
        pos.mark_price(115.0);
        pos.mark_price(115.0);
        assert_eq!(first, (pos.pnl_pct, pos.pnl_usd, pos.trailing_stop_price));
    }

    #[test]
    fn test_trailing_stop_only_tightens_long() {
        let mut pos = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Long,
            100.0,
            1.0,
            100.0,
            150.0,
            90.0,
            Some(0.05),
            "A".into(),
            0.0,
            Utc::now(),
        )
        .unwrap();

        pos.mark_price(120.0);
        let stop_at_peak = pos.trailing_stop_price.unwrap();
        assert!((stop_at_peak - 114.0).abs() < 1e-9);

        // Price falls back - the stop must not loosen
        pos.mark_price(105.0);
        assert_eq!(pos.trailing_stop_price.unwrap(), stop_at_peak);

        // New high tightens further
        pos.mark_price(140.0);
        assert!(pos.trailing_stop_price.unwrap() > stop_at_peak);
    }

    #[test]
    fn test_trailing_stop_only_tightens_short() {
        let mut pos = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Short,
            100.0,
            1.0,
            100.0,
            70.0,
            110.0,
            Some(0.05),
            "A".into(),
            0.0,
            Utc::now(),
        )
        .unwrap();

        pos.mark_price(80.0);
        let stop = pos.trailing_stop_price.unwrap();
        assert!((stop - 84.0).abs() < 1e-9);

        pos.mark_price(95.0);
        assert_eq!(pos.trailing_stop_price.unwrap(), stop);
    }

    #[test]
    fn test_close_realizes_pnl() {
        let mut pos = open_long();
        pos.close_at(110.0, ExitReason::TakeProfit, Utc::now()).unwrap();

        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_price, Some(110.0));
        assert!((pos.pnl_pct - 10.0).abs() < 1e-9);
        assert!((pos.pnl_usd - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_liquidation_status() {
        let mut pos = open_long();
        pos.close_at(60.0, ExitReason::Liquidation, Utc::now()).unwrap();
        assert_eq!(pos.status, PositionStatus::Liquidated);
    }

    #[test]
    fn test_close_twice_rejected() {
        let mut pos = open_long();
        pos.close_at(110.0, ExitReason::Manual, Utc::now()).unwrap();
        let result = pos.close_at(120.0, ExitReason::Manual, Utc::now());
        assert!(matches!(result, Err(PositionError::NotOpen)));
    }

    #[test]
    fn test_invalid_trailing_pct_rejected() {
        let result = Position::open(
            "p".into(),
            "mint".into(),
            "T".into(),
            Direction::Long,
            100.0,
            1.0,
            100.0,
            130.0,
            90.0,
            Some(1.5),
            "B".into(),
            0.0,
            Utc::now(),
        );
        assert!(matches!(result, Err(PositionError::InvalidTrailingStop(_))));
    }

    #[test]
    fn test_serde_round_trip() {
        let pos = open_long();
        let json = serde_json::to_string(&pos).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, pos.id);
        assert_eq!(back.entry_price, pos.entry_price);
        assert_eq!(back.status, pos.status);
    }
}
