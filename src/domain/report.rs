//! Trade Report
//!
//! Performance aggregation over the trade history and open positions.

use serde::{Deserialize, Serialize};

use super::position::Position;

/// Summary of trading performance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeReport {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl_usd: f64,
    pub total_pnl_pct: f64,
    pub best_trade_pnl: f64,
    pub worst_trade_pnl: f64,
    pub avg_trade_pnl: f64,
    pub open_positions: usize,
    pub unrealized_pnl: f64,
}

impl TradeReport {
    /// Build a report from closed history plus current open positions.
    pub fn generate(history: &[Position], open: &[Position]) -> Self {
        let total_trades = history.len();
        let winning_trades = history.iter().filter(|p| p.pnl_usd > 0.0).count();
        let losing_trades = history.iter().filter(|p| p.pnl_usd < 0.0).count();

        let total_pnl_usd: f64 = history.iter().map(|p| p.pnl_usd).sum();
        let total_notional: f64 = history.iter().map(|p| p.notional_usd).sum();
        let total_pnl_pct = if total_notional > 0.0 {
            total_pnl_usd / total_notional * 100.0
        } else {
            0.0
        };

        let best_trade_pnl = history.iter().map(|p| p.pnl_usd).fold(0.0, f64::max);
        let worst_trade_pnl = history.iter().map(|p| p.pnl_usd).fold(0.0, f64::min);
        let avg_trade_pnl = if total_trades > 0 {
            total_pnl_usd / total_trades as f64
        } else {
            0.0
        };
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let unrealized_pnl: f64 = open.iter().map(|p| p.unrealized_pnl_usd()).sum();

        Self {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl_usd,
            total_pnl_pct,
            best_trade_pnl,
            worst_trade_pnl,
            avg_trade_pnl,
            open_positions: open.len(),
            unrealized_pnl,
        }
    }

    /// Plain-text rendering for CLI/status output.
    pub fn to_display_string(&self) -> String {
        format!(
            "TRADING PERFORMANCE\n\
             Total Trades: {} | Win Rate: {:.1}% ({}W / {}L)\n\
             Total P&L: ${:+.2} ({:+.1}%)\n\
             Best: ${:+.2} | Worst: ${:+.2} | Average: ${:+.2}\n\
             Open Positions: {} | Unrealized P&L: ${:+.2}",
            self.total_trades,
            self.win_rate,
            self.winning_trades,
            self.losing_trades,
            self.total_pnl_usd,
            self.total_pnl_pct,
            self.best_trade_pnl,
            self.worst_trade_pnl,
            self.avg_trade_pnl,
            self.open_positions,
            self.unrealized_pnl,
        )
    }
}
