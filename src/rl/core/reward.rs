//! Reward Functions
//!
//! Confluence scoring at entry and trade scoring at close.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rl::core::action::Direction;
use crate::rl::environment::TradeResult;
use crate::rl::features::{FibLevel, StructuralFeatures, SwingLeg};

// Re-export config
pub use crate::rl::config::RewardConfig;

/// Bound applied to every reward entering the buffer
pub const REWARD_BOUND: f64 = 100.0;

const REGIME_WEIGHT: f64 = 0.3;
const SR_WEIGHT: f64 = 0.3;
const FIB_WEIGHT: f64 = 0.2;
const VOL_WEIGHT: f64 = 0.2;
const SR_PROXIMITY_ATR: f64 = 2.0;
const FIB_PROXIMITY_ATR: f64 = 3.0;
const RETRACEMENT_BONUS: f64 = 0.25;

/// Signal quality of entering `direction` given the structure, in [0, 1].
///
/// Regime alignment 30%, S/R proximity 30%, Fibonacci plausibility 20%,
/// volatility tier 20%. HOLD scores 0.
pub fn confluence_score(features: &StructuralFeatures, direction: Direction) -> f64 {
    if !direction.is_trade() {
        return 0.0;
    }
    let regime = regime_alignment(features, direction);
    let sr = sr_proximity(features, direction);
    let fib = fib_plausibility(features, direction);
    let vol = match features.vol_regime {
        1 => 1.0,
        0 => 0.5,
        _ => 0.1,
    };
    let score = REGIME_WEIGHT * regime + SR_WEIGHT * sr + FIB_WEIGHT * fib + VOL_WEIGHT * vol;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// 1.0 for a clear aligned phase, 0.5 for an even mix
fn regime_alignment(features: &StructuralFeatures, direction: Direction) -> f64 {
    let r = &features.regime;
    let aligned = match direction {
        Direction::Long => r.advancing + 0.5 * r.accumulation,
        Direction::Short => r.declining + 0.5 * r.distribution,
        Direction::Hold => 0.0,
    };
    (aligned / 0.75).clamp(0.0, 1.0)
}

/// Closeness to the level the trade leans on, scaled by its strength
fn sr_proximity(features: &StructuralFeatures, direction: Direction) -> f64 {
    let (distance, strength) = match direction {
        Direction::Long => (features.dist_to_support, features.support_strength),
        Direction::Short => (features.dist_to_resistance, features.resistance_strength),
        Direction::Hold => return 0.0,
    };
    match distance {
        Some(d) if d.is_finite() && d <= SR_PROXIMITY_ATR => {
            (1.0 - d.max(0.0) / SR_PROXIMITY_ATR) * strength
        }
        _ => 0.0,
    }
}

/// Nearest Fibonacci level within 3 ATR, plus a bonus for entering on a
/// retracement in the direction of the last leg
fn fib_plausibility(features: &StructuralFeatures, direction: Direction) -> f64 {
    let Some(swing) = features.swing else {
        return 0.0;
    };
    let nearest = FibLevel::ALL
        .iter()
        .map(|&level| (level, features.fib_distance(level).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1));
    let Some((level, distance)) = nearest else {
        return 0.0;
    };
    if distance > FIB_PROXIMITY_ATR {
        return 0.0;
    }
    let mut score = 1.0 - distance / FIB_PROXIMITY_ATR;
    let with_leg = matches!(
        (swing.leg, direction),
        (SwingLeg::Up, Direction::Long) | (SwingLeg::Down, Direction::Short)
    );
    if !level.is_extension() && with_leg {
        score += RETRACEMENT_BONUS;
    }
    score.min(1.0)
}

/// Drawdown bookkeeping around a close
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardContext {
    pub max_drawdown_before: f64,
    pub max_drawdown_after: f64,
}

/// Reward components for one closed trade
///
/// Breaking the reward into components helps when tuning `RewardConfig`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardSignal {
    /// pnl_percent x 200
    pub base: f64,
    /// TP bonus or SL penalty multiplier
    pub exit_factor: f64,
    /// 1 + confluence_bonus x confluence
    pub confluence_factor: f64,
    pub drawdown_penalty: f64,
    pub turnover_penalty: f64,
    /// Validated total
    pub total: f64,
}

/// Scores closed trades
#[derive(Debug, Clone, Default)]
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// Reward for a closed trade
    pub fn calculate_reward(&self, trade: &TradeResult, ctx: &RewardContext) -> f64 {
        self.breakdown(trade, ctx).total
    }

    /// Reward for a closed trade with every component exposed
    pub fn breakdown(&self, trade: &TradeResult, ctx: &RewardContext) -> RewardSignal {
        let cfg = &self.config;
        let base = trade.pnl_percent * 200.0;
        let exit_factor = if trade.hit_tp {
            1.0 + cfg.tp_bonus * trade.fib_alignment.unwrap_or(0.0)
        } else if trade.hit_sl {
            cfg.sl_penalty
        } else {
            1.0
        };
        let confluence_factor = 1.0 + cfg.confluence_bonus * trade.confluence_score;
        let drawdown_penalty =
            cfg.lambda_dd * (ctx.max_drawdown_after - ctx.max_drawdown_before).max(0.0);
        let turnover_penalty = cfg.lambda_turn;

        let raw = base * exit_factor * confluence_factor - drawdown_penalty - turnover_penalty;
        RewardSignal {
            base,
            exit_factor,
            confluence_factor,
            drawdown_penalty,
            turnover_penalty,
            total: validate_reward(raw),
        }
    }
}

/// Map NaN/Inf to 0 and clamp to [-100, 100]. Idempotent.
pub fn validate_reward(reward: f64) -> f64 {
    if !reward.is_finite() {
        warn!(reward, "numerical instability in reward, replacing with 0");
        return 0.0;
    }
    reward.clamp(-REWARD_BOUND, REWARD_BOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::environment::ExitReason;
    use crate::rl::features::{MarketPhase, RegimeMix, SwingPair};

    fn trade(pnl_percent: f64, reason: ExitReason) -> TradeResult {
        TradeResult {
            direction: Direction::Long,
            entry_bar: 10,
            exit_bar: 20,
            entry_price: 100.0,
            exit_price: 100.0 * (1.0 + pnl_percent),
            quantity: 1.0,
            pnl: 100.0 * pnl_percent,
            pnl_percent,
            hit_tp: reason == ExitReason::TakeProfit,
            hit_sl: reason == ExitReason::StopLoss,
            fees: 0.0,
            slippage: 0.0,
            confluence_score: 0.0,
            fib_alignment: None,
            exit_reason: reason,
            bars_held: 10,
        }
    }

    fn structure() -> StructuralFeatures {
        let mut f = StructuralFeatures::neutral(100.0);
        f.atr = 2.0;
        f.regime = RegimeMix::dominant(MarketPhase::Advancing);
        f.dist_to_support = Some(0.5);
        f.dist_to_resistance = Some(3.0);
        f.support_strength = 1.0;
        f.resistance_strength = 0.5;
        f
    }

    #[test]
    fn test_hold_scores_zero() {
        assert_eq!(confluence_score(&structure(), Direction::Hold), 0.0);
    }

    #[test]
    fn test_confluence_prefers_aligned_direction() {
        let f = structure();
        let long = confluence_score(&f, Direction::Long);
        let short = confluence_score(&f, Direction::Short);
        // regime 0.3 + support (1 - 0.25) x 1 x 0.3 + mid vol 0.2
        assert!((long - 0.725).abs() < 1e-9);
        assert!(short < long);
        assert!((0.0..=1.0).contains(&short));
    }

    #[test]
    fn test_confluence_retracement_bonus() {
        let mut f = structure();
        f.swing = Some(SwingPair {
            high: 110.0,
            low: 90.0,
            leg: SwingLeg::Up,
        });
        // close sits exactly on the 0.5 retracement
        f.fib_distances = [9.0, 15.0, 25.0, 1.0, 0.0, -1.0];
        let with_fib = confluence_score(&f, Direction::Long);
        assert!((with_fib - 0.925).abs() < 1e-9);
    }

    #[test]
    fn test_stop_loss_amplifies_loss() {
        let calc = RewardCalculator::default();
        let ctx = RewardContext::default();
        let sl = calc.calculate_reward(&trade(-0.01, ExitReason::StopLoss), &ctx);
        let timeout = calc.calculate_reward(&trade(-0.01, ExitReason::Timeout), &ctx);
        assert!((timeout - (-2.0 - 0.05)).abs() < 1e-9);
        assert!((sl - (-2.4 - 0.05)).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit_bonus_uses_fib_alignment() {
        let calc = RewardCalculator::default();
        let mut t = trade(0.01, ExitReason::TakeProfit);
        t.fib_alignment = Some(1.0);
        t.confluence_score = 1.0;
        let signal = calc.breakdown(&t, &RewardContext::default());
        assert!((signal.exit_factor - 1.5).abs() < 1e-12);
        assert!((signal.confluence_factor - 1.3).abs() < 1e-12);
        assert!((signal.total - (2.0 * 1.5 * 1.3 - 0.05)).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_increase_is_penalized() {
        let calc = RewardCalculator::default();
        let ctx = RewardContext {
            max_drawdown_before: 0.02,
            max_drawdown_after: 0.05,
        };
        let r = calc.calculate_reward(&trade(0.0, ExitReason::Timeout), &ctx);
        assert!((r - (-0.3 - 0.05)).abs() < 1e-9);
    }

    #[test]
    fn test_validate_reward_bounds_and_idempotence() {
        for raw in [f64::NAN, f64::INFINITY, -1e9, -3.5, 0.0, 42.0, 1e6] {
            let once = validate_reward(raw);
            assert!((-REWARD_BOUND..=REWARD_BOUND).contains(&once));
            assert_eq!(validate_reward(once), once);
        }
        assert_eq!(validate_reward(f64::NAN), 0.0);
        assert_eq!(validate_reward(250.0), 100.0);
    }
}
