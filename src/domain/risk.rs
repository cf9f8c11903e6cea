//! Risk Engine
//!
//! Pure, stateless risk computations shared by the orchestrator and the
//! position monitor: position sizing by tier, grade-keyed TP/SL levels,
//! liquidation price, health factor, risk scoring and exposure validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::position::{Direction, Position};

/// Position-size fraction of portfolio value per risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Conservative,
    Moderate,
    Aggressive,
    MaxRisk,
}

impl RiskTier {
    /// Fraction of portfolio value committed per position.
    pub fn fraction(&self) -> f64 {
        match self {
            RiskTier::Conservative => 0.01,
            RiskTier::Moderate => 0.02,
            RiskTier::Aggressive => 0.05,
            RiskTier::MaxRisk => 0.10,
        }
    }
}

/// Liquidation-proximity risk buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    Moderate,
    High,
    Critical,
    Liquidation,
}

/// TP/SL percentage pair for a signal grade (fractions of 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeLevels {
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Grade table. Higher-confidence grades get wider take-profit targets;
/// unknown grades fall back to the most conservative pair.
const GRADE_TABLE: &[(&str, GradeLevels)] = &[
    ("A+", GradeLevels { take_profit: 0.35, stop_loss: 0.10 }),
    ("A", GradeLevels { take_profit: 0.30, stop_loss: 0.10 }),
    ("A-", GradeLevels { take_profit: 0.25, stop_loss: 0.09 }),
    ("B+", GradeLevels { take_profit: 0.20, stop_loss: 0.08 }),
    ("B", GradeLevels { take_profit: 0.15, stop_loss: 0.08 }),
    ("B-", GradeLevels { take_profit: 0.12, stop_loss: 0.07 }),
    ("C+", GradeLevels { take_profit: 0.12, stop_loss: 0.06 }),
    ("C", GradeLevels { take_profit: 0.10, stop_loss: 0.05 }),
];

/// The fallback pair for unknown grades (same as grade C).
pub const DEFAULT_GRADE_LEVELS: GradeLevels = GradeLevels {
    take_profit: 0.10,
    stop_loss: 0.05,
};

/// Portfolio-level limits with documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioLimits {
    /// Maximum concurrent positions (OPEN + RESERVED)
    pub max_positions: usize,
    /// Maximum single trade size in USD
    pub max_trade_usd: f64,
    /// Maximum daily trading volume in USD
    pub max_daily_usd: f64,
    /// Maximum single position as a fraction of portfolio value
    pub max_position_pct: f64,
    /// Maximum per-token exposure as a fraction of portfolio value
    pub max_symbol_exposure_pct: f64,
    /// Maximum total deployed exposure as a fraction of portfolio value
    pub max_total_exposure_pct: f64,
    /// Maximum leverage multiple
    pub max_leverage: f64,
    /// Maximum unrealized loss per position in USD before a forced close
    pub max_loss_per_position_usd: f64,
    /// Hours a position may stay open before a staleness alert
    pub stale_position_hours: f64,
    /// Drawdown from the high-water mark (percentage points) that counts
    /// as a rapid loss
    pub rapid_loss_pct: f64,
    /// Rolling window for rapid-loss detection in seconds
    pub rapid_loss_window_secs: u64,
}

impl Default for PortfolioLimits {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_trade_usd: 100.0,
            max_daily_usd: 500.0,
            max_position_pct: 0.20,
            max_symbol_exposure_pct: 0.25,
            max_total_exposure_pct: 0.80,
            max_leverage: 3.0,
            max_loss_per_position_usd: 50.0,
            stale_position_hours: 72.0,
            rapid_loss_pct: 15.0,
            rapid_loss_window_secs: 1800,
        }
    }
}

/// First violated exposure constraint, never a silent clamp.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskViolation {
    #[error("Trade ${proposed:.2} exceeds max single trade ${limit:.2}")]
    TradeSizeExceeded { proposed: f64, limit: f64 },

    #[error("Position {pct:.1}% exceeds max {limit_pct:.0}% of portfolio")]
    PositionPctExceeded { pct: f64, limit_pct: f64 },

    #[error("Leverage {0:.1}x exceeds maximum {1:.1}x")]
    LeverageExceeded(f64, f64),

    #[error("Maximum positions reached ({0})")]
    PositionCountExceeded(usize),

    #[error("Token allocation {pct:.1}% exceeds max {limit_pct:.0}% for {symbol}")]
    SymbolExposureExceeded {
        symbol: String,
        pct: f64,
        limit_pct: f64,
    },

    #[error("Total exposure {pct:.1}% exceeds max {limit_pct:.0}% of portfolio")]
    TotalExposureExceeded { pct: f64, limit_pct: f64 },

    #[error("Daily limit reached: ${used:.2} of ${limit:.2} used, ${remaining:.2} remaining")]
    DailyVolumeExceeded {
        used: f64,
        limit: f64,
        remaining: f64,
    },
}

/// Snapshot of a position's liquidation risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub liquidation_price: f64,
    pub distance_to_liquidation_pct: f64,
    pub health_factor: f64,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
}

/// Position size in USD for a portfolio value and risk tier.
pub fn position_size(portfolio_value: f64, tier: RiskTier) -> f64 {
    if portfolio_value <= 0.0 {
        return 0.0;
    }
    portfolio_value * tier.fraction()
}

/// Look up the TP/SL percentage pair for a signal grade.
pub fn grade_levels(grade: &str) -> GradeLevels {
    GRADE_TABLE
        .iter()
        .find(|(g, _)| *g == grade)
        .map(|(_, levels)| *levels)
        .unwrap_or(DEFAULT_GRADE_LEVELS)
}

/// Take-profit and stop-loss prices for an entry, direction-aware.
pub fn tp_sl_levels(entry_price: f64, grade: &str, direction: Direction) -> (f64, f64) {
    let levels = grade_levels(grade);
    match direction {
        Direction::Long => (
            entry_price * (1.0 + levels.take_profit),
            entry_price * (1.0 - levels.stop_loss),
        ),
        Direction::Short => (
            entry_price * (1.0 - levels.take_profit),
            entry_price * (1.0 + levels.stop_loss),
        ),
    }
}

/// Liquidation price for a leveraged position. Unleveraged spot has no
/// liquidation and returns 0.
pub fn liquidation_price(
    entry_price: f64,
    leverage: f64,
    direction: Direction,
    maintenance_margin: f64,
) -> f64 {
    if leverage <= 1.0 {
        return 0.0;
    }
    let price = match direction {
        Direction::Long => entry_price * (1.0 - (1.0 / leverage) + maintenance_margin),
        Direction::Short => entry_price * (1.0 + (1.0 / leverage) - maintenance_margin),
    };
    price.max(0.0)
}

/// Health factor: margin ratio relative to the minimum maintenance ratio.
/// Below 1.0 implies imminent liquidation risk.
pub fn health_factor(margin: f64, notional: f64, min_margin_ratio: f64) -> f64 {
    if notional <= 0.0 || min_margin_ratio <= 0.0 {
        return 0.0;
    }
    (margin / notional) / min_margin_ratio
}

/// Additive risk score in [0, 100] from liquidation distance, health factor
/// and leverage.
pub fn risk_score(distance_to_liquidation_pct: f64, health_factor: f64, leverage: f64) -> u8 {
    let mut score: u32 = 0;

    if distance_to_liquidation_pct < 5.0 {
        score += 50;
    } else if distance_to_liquidation_pct < 10.0 {
        score += 30;
    } else if distance_to_liquidation_pct < 20.0 {
        score += 15;
    }

    if health_factor < 1.2 {
        score += 30;
    } else if health_factor < 1.5 {
        score += 15;
    }

    if leverage > 5.0 {
        score += 20;
    } else if leverage > 3.0 {
        score += 10;
    }

    score.min(100) as u8
}

/// Bucket a health factor and liquidation distance into a risk level.
pub fn risk_level(health_factor: f64, distance_to_liquidation_pct: f64) -> RiskLevel {
    if health_factor < 1.0 || distance_to_liquidation_pct < 3.0 {
        RiskLevel::Liquidation
    } else if health_factor < 1.2 || distance_to_liquidation_pct < 5.0 {
        RiskLevel::Critical
    } else if health_factor < 1.5 || distance_to_liquidation_pct < 10.0 {
        RiskLevel::High
    } else if health_factor < 2.0 || distance_to_liquidation_pct < 20.0 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Safe
    }
}

/// Full liquidation-risk snapshot for a position at a given price.
pub fn assess(
    entry_price: f64,
    current_price: f64,
    direction: Direction,
    leverage: f64,
    margin: f64,
    notional: f64,
    maintenance_margin: f64,
) -> RiskAssessment {
    let liq = liquidation_price(entry_price, leverage, direction, maintenance_margin);
    let distance = if liq > 0.0 && current_price > 0.0 {
        ((current_price - liq).abs() / current_price) * 100.0
    } else {
        100.0
    };
    let hf = if leverage <= 1.0 {
        // Spot is fully collateralized
        1.0 / maintenance_margin
    } else {
        health_factor(margin, notional, maintenance_margin)
    };

    RiskAssessment {
        liquidation_price: liq,
        distance_to_liquidation_pct: distance,
        health_factor: hf,
        risk_score: risk_score(distance, hf, leverage),
        risk_level: risk_level(hf, distance),
    }
}

/// Validate a proposed position against portfolio limits. Returns the first
/// violated constraint.
pub fn validate_exposure(
    token_mint: &str,
    proposed_usd: f64,
    leverage: f64,
    open_positions: &[Position],
    portfolio_value: f64,
    limits: &PortfolioLimits,
) -> Result<(), RiskViolation> {
    if proposed_usd > limits.max_trade_usd {
        return Err(RiskViolation::TradeSizeExceeded {
            proposed: proposed_usd,
            limit: limits.max_trade_usd,
        });
    }

    if portfolio_value > 0.0 {
        let pct = proposed_usd / portfolio_value;
        if pct > limits.max_position_pct {
            return Err(RiskViolation::PositionPctExceeded {
                pct: pct * 100.0,
                limit_pct: limits.max_position_pct * 100.0,
            });
        }
    }

    if leverage > limits.max_leverage {
        return Err(RiskViolation::LeverageExceeded(leverage, limits.max_leverage));
    }

    if open_positions.len() >= limits.max_positions {
        return Err(RiskViolation::PositionCountExceeded(limits.max_positions));
    }

    if portfolio_value > 0.0 {
        let symbol_usd: f64 = open_positions
            .iter()
            .filter(|p| p.token_mint == token_mint)
            .map(|p| p.notional_usd)
            .sum();
        let symbol_pct = (symbol_usd + proposed_usd) / portfolio_value;
        if symbol_pct > limits.max_symbol_exposure_pct {
            return Err(RiskViolation::SymbolExposureExceeded {
                symbol: token_mint.to_string(),
                pct: symbol_pct * 100.0,
                limit_pct: limits.max_symbol_exposure_pct * 100.0,
            });
        }

        let deployed: f64 = open_positions.iter().map(|p| p.notional_usd).sum();
        let total_pct = (deployed + proposed_usd) / portfolio_value;
        if total_pct > limits.max_total_exposure_pct {
            return Err(RiskViolation::TotalExposureExceeded {
                pct: total_pct * 100.0,
                limit_pct: limits.max_total_exposure_pct * 100.0,
            });
        }
    }

    Ok(())
}

/// Check the daily-volume spending cap.
pub fn validate_daily_volume(
    proposed_usd: f64,
    volume_today: f64,
    limits: &PortfolioLimits,
) -> Result<(), RiskViolation> {
    if volume_today + proposed_usd > limits.max_daily_usd {
        return Err(RiskViolation::DailyVolumeExceeded {
            used: volume_today,
            limit: limits.max_daily_usd,
            remaining: (limits.max_daily_usd - volume_today).max(0.0),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn pos(mint: &str, notional: f64) -> Position {
        Position::open(
            uuid::Uuid::new_v4().to_string()[..8].to_string(),
            mint.to_string(),
            "TEST".to_string(),
            Direction::Long,
            1.0,
            notional,
            notional,
            1.3,
            0.9,
            None,
            "B".to_string(),
            0.0,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_position_size_by_tier() {
        assert_relative_eq!(position_size(10_000.0, RiskTier::Conservative), 100.0);
        assert_relative_eq!(position_size(10_000.0, RiskTier::Moderate), 200.0);
        assert_relative_eq!(position_size(10_000.0, RiskTier::Aggressive), 500.0);
        assert_relative_eq!(position_size(10_000.0, RiskTier::MaxRisk), 1000.0);
    }

    #[test]
    fn test_position_size_zero_portfolio() {
        assert_eq!(position_size(0.0, RiskTier::Moderate), 0.0);
        assert_eq!(position_size(-50.0, RiskTier::Moderate), 0.0);
    }

    #[test]
    fn test_tp_sl_grade_a() {
        let (tp, sl) = tp_sl_levels(100.0, "A", Direction::Long);
        assert_relative_eq!(tp, 130.0, epsilon = 0.01);
        assert_relative_eq!(sl, 90.0, epsilon = 0.01);
    }

    #[test]
    fn test_tp_sl_grade_b_plus() {
        let (tp, sl) = tp_sl_levels(100.0, "B+", Direction::Long);
        assert_relative_eq!(tp, 120.0, epsilon = 0.01);
        assert_relative_eq!(sl, 92.0, epsilon = 0.01);
    }

    #[test]
    fn test_tp_sl_grade_b() {
        let (tp, sl) = tp_sl_levels(100.0, "B", Direction::Long);
        assert_relative_eq!(tp, 115.0, epsilon = 0.01);
        assert_relative_eq!(sl, 92.0, epsilon = 0.01);
    }

    #[test]
    fn test_tp_sl_grade_c() {
        let (tp, sl) = tp_sl_levels(100.0, "C", Direction::Long);
        assert_relative_eq!(tp, 110.0, epsilon = 0.01);
        assert_relative_eq!(sl, 95.0, epsilon = 0.01);
    }

    #[test]
    fn test_tp_sl_unknown_grade_most_conservative() {
        let (tp, sl) = tp_sl_levels(100.0, "Z?", Direction::Long);
        assert_relative_eq!(tp, 110.0, epsilon = 0.01);
        assert_relative_eq!(sl, 95.0, epsilon = 0.01);
    }

    #[test]
    fn test_tp_sl_short_mirrored() {
        let (tp, sl) = tp_sl_levels(100.0, "A", Direction::Short);
        assert_relative_eq!(tp, 70.0, epsilon = 0.01);
        assert_relative_eq!(sl, 110.0, epsilon = 0.01);
    }

    #[test]
    fn test_liquidation_price_long() {
        // entry=100, 3x long, 5% maintenance => 100 * (1 - 1/3 + 0.05)
        let liq = liquidation_price(100.0, 3.0, Direction::Long, 0.05);
        assert_relative_eq!(liq, 71.6667, epsilon = 0.01);
    }

    #[test]
    fn test_liquidation_price_short() {
        let liq = liquidation_price(100.0, 3.0, Direction::Short, 0.05);
        assert_relative_eq!(liq, 128.3333, epsilon = 0.01);
    }

    #[test]
    fn test_liquidation_price_spot() {
        assert_eq!(liquidation_price(100.0, 1.0, Direction::Long, 0.05), 0.0);
    }

    #[test]
    fn test_health_factor() {
        // margin ratio 0.10 over min 0.05 => 2.0
        assert_relative_eq!(health_factor(10.0, 100.0, 0.05), 2.0);
        assert_eq!(health_factor(10.0, 0.0, 0.05), 0.0);
    }

    #[test]
    fn test_risk_score_buckets() {
        assert_eq!(risk_score(50.0, 3.0, 1.0), 0);
        assert_eq!(risk_score(4.0, 3.0, 1.0), 50);
        assert_eq!(risk_score(4.0, 1.1, 1.0), 80);
        assert_eq!(risk_score(4.0, 1.1, 6.0), 100);
        assert_eq!(risk_score(15.0, 1.4, 4.0), 15 + 15 + 10);
    }

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(risk_level(0.9, 50.0), RiskLevel::Liquidation);
        assert_eq!(risk_level(3.0, 2.0), RiskLevel::Liquidation);
        assert_eq!(risk_level(1.1, 50.0), RiskLevel::Critical);
        assert_eq!(risk_level(1.4, 50.0), RiskLevel::High);
        assert_eq!(risk_level(1.9, 50.0), RiskLevel::Moderate);
        assert_eq!(risk_level(3.0, 50.0), RiskLevel::Safe);
    }

    #[test]
    fn test_validate_exposure_trade_size() {
        let limits = PortfolioLimits::default();
        let result = validate_exposure("mint", 150.0, 1.0, &[], 10_000.0, &limits);
        assert!(matches!(
            result,
            Err(RiskViolation::TradeSizeExceeded { .. })
        ));
    }

    #[test]
    fn test_validate_exposure_position_pct() {
        let limits = PortfolioLimits {
            max_trade_usd: 10_000.0,
            ..Default::default()
        };
        // 25% of a 200 USD portfolio
        let result = validate_exposure("mint", 50.0, 1.0, &[], 200.0, &limits);
        assert!(matches!(
            result,
            Err(RiskViolation::PositionPctExceeded { .. })
        ));
    }

    #[test]
    fn test_validate_exposure_leverage() {
        let limits = PortfolioLimits {
            max_trade_usd: 10_000.0,
            max_position_pct: 1.0,
            ..Default::default()
        };
        let result = validate_exposure("mint", 50.0, 5.0, &[], 10_000.0, &limits);
        assert!(matches!(result, Err(RiskViolation::LeverageExceeded(..))));
    }

    #[test]
    fn test_validate_exposure_position_count() {
        let limits = PortfolioLimits {
            max_positions: 2,
            ..Default::default()
        };
        let open = vec![pos("m1", 10.0), pos("m2", 10.0)];
        let result = validate_exposure("m3", 10.0, 1.0, &open, 10_000.0, &limits);
        assert!(matches!(
            result,
            Err(RiskViolation::PositionCountExceeded(2))
        ));
    }

    #[test]
    fn test_validate_exposure_symbol_concentration() {
        let limits = PortfolioLimits {
            max_trade_usd: 10_000.0,
            max_position_pct: 1.0,
            ..Default::default()
        };
        let open = vec![pos("m1", 200.0)];
        // Existing 200 + proposed 100 = 30% of 1000 > 25% cap
        let result = validate_exposure("m1", 100.0, 1.0, &open, 1000.0, &limits);
        assert!(matches!(
            result,
            Err(RiskViolation::SymbolExposureExceeded { .. })
        ));
    }

    #[test]
    fn test_validate_exposure_total() {
        let limits = PortfolioLimits {
            max_trade_usd: 10_000.0,
            max_position_pct: 1.0,
            max_symbol_exposure_pct: 1.0,
            max_positions: 10,
            ..Default::default()
        };
        let open = vec![pos("m1", 400.0), pos("m2", 400.0)];
        let result = validate_exposure("m3", 100.0, 1.0, &open, 1000.0, &limits);
        assert!(matches!(
            result,
            Err(RiskViolation::TotalExposureExceeded { .. })
        ));
    }

    #[test]
    fn test_validate_exposure_passes() {
        let limits = PortfolioLimits::default();
        let result = validate_exposure("mint", 50.0, 1.0, &[], 10_000.0, &limits);
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_daily_volume() {
        let limits = PortfolioLimits::default();
        assert!(validate_daily_volume(100.0, 300.0, &limits).is_ok());
        let result = validate_daily_volume(100.0, 450.0, &limits);
        assert!(matches!(
            result,
            Err(RiskViolation::DailyVolumeExceeded { .. })
        ));
    }

    #[test]
    fn test_assess_spot_is_safe() {
        let a = assess(100.0, 100.0, Direction::Long, 1.0, 100.0, 100.0, 0.05);
        assert_eq!(a.liquidation_price, 0.0);
        assert_eq!(a.risk_level, RiskLevel::Safe);
        assert_eq!(a.risk_score, 0);
    }

    #[test]
    fn test_assess_leveraged_near_liquidation() {
        // 3x long from 100, price collapsed to just above liquidation
        let a = assess(100.0, 73.0, Direction::Long, 3.0, 33.0, 219.0, 0.05);
        assert!(a.liquidation_price > 70.0);
        assert!(a.distance_to_liquidation_pct < 3.0);
        assert_eq!(a.risk_level, RiskLevel::Liquidation);
        assert!(a.risk_score >= 50);
    }
}
