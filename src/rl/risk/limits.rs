//! Risk Limits
//!
//! Hard-cap breach detection and the cooldown state machine
//! (normal <-> cooldown(n)). Breaches are in-band results, never errors.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rl::config::EnvironmentConfig;
use crate::rl::core::action::HybridAction;

/// Hard drawdown limit, not configurable
pub const MAX_DRAWDOWN_LIMIT: f64 = 0.25;

const DEFAULT_COOLDOWN: usize = 10;
const DAILY_LOSS_COOLDOWN: usize = 20;
const MAX_DRAWDOWN_COOLDOWN: usize = 50;
const DEFAULT_PENALTY: f64 = -0.5;
const DAILY_LOSS_PENALTY: f64 = -1.0;
const MAX_DRAWDOWN_PENALTY: f64 = -2.0;
const WARNING_PENALTY: f64 = -0.1;

/// Which limit was breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Equity at or below zero
    EquityDepleted,
    DailyLossCap,
    MaxDrawdown,
    Leverage,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::EquityDepleted => "equity_depleted",
            ViolationKind::DailyLossCap => "daily_loss_cap",
            ViolationKind::MaxDrawdown => "max_drawdown",
            ViolationKind::Leverage => "leverage",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

/// A detected limit breach
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Observed value of the limited quantity
    pub value: f64,
    pub limit: f64,
}

impl RiskViolation {
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// What the environment must do about a breach
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreachResponse {
    pub force_flatten: bool,
    pub cooldown_bars: usize,
    pub penalty: f64,
}

/// Account figures the limits are checked against
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub equity: f64,
    pub daily_pnl: f64,
    /// Drawdown from peak equity, as a fraction
    pub drawdown: f64,
    /// Notional of the open position
    pub notional: f64,
}

/// Outcome of a position-size check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeCheck {
    pub quantity: f64,
    pub adjusted: bool,
}

/// Limits taken from `EnvironmentConfig`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub daily_loss_cap: f64,
    pub max_leverage: f64,
    pub max_risk_per_trade: f64,
    pub max_qty_per_asset: f64,
    pub point_value: f64,
}

impl From<&EnvironmentConfig> for RiskLimits {
    fn from(cfg: &EnvironmentConfig) -> Self {
        Self {
            daily_loss_cap: cfg.daily_loss_cap,
            max_leverage: cfg.max_leverage,
            max_risk_per_trade: cfg.max_risk_per_trade,
            max_qty_per_asset: cfg.max_qty_per_asset,
            point_value: cfg.point_value,
        }
    }
}

/// Breach detector and cooldown tracker for one environment
#[derive(Debug, Clone)]
pub struct RiskLimitManager {
    limits: RiskLimits,
    cooldown_remaining: usize,
}

impl RiskLimitManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            cooldown_remaining: 0,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Back to the normal state
    pub fn reset(&mut self) {
        self.cooldown_remaining = 0;
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_remaining > 0
    }

    pub fn cooldown_remaining(&self) -> usize {
        self.cooldown_remaining
    }

    /// First matching limit wins.
    ///
    /// Critical limits are skipped while cooling down: the breach that started
    /// the cooldown already flattened the account and no position can open
    /// until it ends, so only the leverage warning is evaluated. Critical
    /// checks resume on the first bar after the cooldown.
    pub fn check_limits(&self, snapshot: &RiskSnapshot) -> Option<RiskViolation> {
        if !self.is_cooling_down() {
            if let Some(v) = self.check_critical(snapshot) {
                return Some(v);
            }
        }

        if snapshot.equity > 0.0 {
            let leverage = snapshot.notional / snapshot.equity;
            if leverage > self.limits.max_leverage {
                return Some(RiskViolation {
                    kind: ViolationKind::Leverage,
                    severity: Severity::Warning,
                    value: leverage,
                    limit: self.limits.max_leverage,
                });
            }
        }
        None
    }

    fn check_critical(&self, snapshot: &RiskSnapshot) -> Option<RiskViolation> {
        if !(snapshot.equity > 0.0) {
            return Some(RiskViolation {
                kind: ViolationKind::EquityDepleted,
                severity: Severity::Critical,
                value: snapshot.equity,
                limit: 0.0,
            });
        }

        let daily_loss_percent = snapshot.daily_pnl / snapshot.equity;
        if daily_loss_percent < -self.limits.daily_loss_cap {
            return Some(RiskViolation {
                kind: ViolationKind::DailyLossCap,
                severity: Severity::Critical,
                value: daily_loss_percent,
                limit: -self.limits.daily_loss_cap,
            });
        }

        if snapshot.drawdown > MAX_DRAWDOWN_LIMIT {
            return Some(RiskViolation {
                kind: ViolationKind::MaxDrawdown,
                severity: Severity::Critical,
                value: snapshot.drawdown,
                limit: MAX_DRAWDOWN_LIMIT,
            });
        }
        None
    }

    /// Enter cooldown for critical breaches and report the penalty
    pub fn handle_risk_breach(&mut self, violation: &RiskViolation) -> BreachResponse {
        let response = match (violation.severity, violation.kind) {
            (Severity::Warning, _) => BreachResponse {
                force_flatten: false,
                cooldown_bars: 0,
                penalty: WARNING_PENALTY,
            },
            (Severity::Critical, ViolationKind::DailyLossCap) => BreachResponse {
                force_flatten: true,
                cooldown_bars: DAILY_LOSS_COOLDOWN,
                penalty: DAILY_LOSS_PENALTY,
            },
            (Severity::Critical, ViolationKind::MaxDrawdown) => BreachResponse {
                force_flatten: true,
                cooldown_bars: MAX_DRAWDOWN_COOLDOWN,
                penalty: MAX_DRAWDOWN_PENALTY,
            },
            (Severity::Critical, _) => BreachResponse {
                force_flatten: true,
                cooldown_bars: DEFAULT_COOLDOWN,
                penalty: DEFAULT_PENALTY,
            },
        };

        if response.force_flatten {
            self.cooldown_remaining = response.cooldown_bars;
            warn!(
                kind = %violation.kind,
                value = violation.value,
                limit = violation.limit,
                cooldown = response.cooldown_bars,
                "critical risk breach, flattening"
            );
        } else {
            debug!(kind = %violation.kind, value = violation.value, "risk warning");
        }
        response
    }

    /// Decrement the cooldown once per step
    pub fn tick(&mut self) {
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);
    }

    /// Force non-HOLD actions to HOLD while cooling down
    pub fn filter_action(&self, action: &HybridAction) -> (HybridAction, bool) {
        if self.is_cooling_down() && action.direction.is_trade() {
            (action.as_hold(), true)
        } else {
            (*action, false)
        }
    }

    /// Largest quantity satisfying the dollar-risk, quantity and leverage caps
    pub fn calculate_max_safe_position_size(
        &self,
        entry_price: f64,
        stop_distance: f64,
        equity: f64,
    ) -> f64 {
        let pv = self.limits.point_value;
        if !(equity > 0.0 && entry_price > 0.0 && stop_distance > 0.0 && pv > 0.0) {
            return 0.0;
        }
        let by_risk = self.limits.max_risk_per_trade * equity / (stop_distance * pv);
        let by_leverage = self.limits.max_leverage * equity / (entry_price * pv);
        by_risk.min(by_leverage).min(self.limits.max_qty_per_asset).max(0.0)
    }

    /// Shrink (never reject) a requested quantity to the safe maximum
    pub fn validate_position_size(
        &self,
        quantity: f64,
        entry_price: f64,
        stop_distance: f64,
        equity: f64,
    ) -> SizeCheck {
        let requested = if quantity.is_finite() { quantity.max(0.0) } else { 0.0 };
        let safe = self.calculate_max_safe_position_size(entry_price, stop_distance, equity);
        if requested > safe {
            SizeCheck {
                quantity: safe,
                adjusted: true,
            }
        } else {
            SizeCheck {
                quantity: requested,
                adjusted: requested != quantity,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::core::action::Direction;

    fn manager(daily_loss_cap: f64) -> RiskLimitManager {
        RiskLimitManager::new(RiskLimits {
            daily_loss_cap,
            max_leverage: 5.0,
            max_risk_per_trade: 0.02,
            max_qty_per_asset: 1000.0,
            point_value: 1.0,
        })
    }

    #[test]
    fn test_daily_loss_breach() {
        let mut mgr = manager(0.06);
        let snapshot = RiskSnapshot {
            equity: 10_000.0,
            daily_pnl: -650.0,
            drawdown: 0.065,
            notional: 0.0,
        };
        let violation = mgr.check_limits(&snapshot).unwrap();
        assert_eq!(violation.kind, ViolationKind::DailyLossCap);
        assert_eq!(violation.kind.as_str(), "daily_loss_cap");
        assert!((violation.value + 0.065).abs() < 1e-12);

        let response = mgr.handle_risk_breach(&violation);
        assert!(response.force_flatten);
        assert_eq!(response.cooldown_bars, 20);
        assert_eq!(response.penalty, -1.0);
        assert!(mgr.is_cooling_down());
    }

    #[test]
    fn test_drawdown_breach_escalates() {
        let mut mgr = manager(0.5);
        let snapshot = RiskSnapshot {
            equity: 7000.0,
            daily_pnl: 0.0,
            drawdown: 0.3,
            notional: 0.0,
        };
        let violation = mgr.check_limits(&snapshot).unwrap();
        assert_eq!(violation.kind, ViolationKind::MaxDrawdown);
        let response = mgr.handle_risk_breach(&violation);
        assert_eq!(response.cooldown_bars, 50);
        assert_eq!(response.penalty, -2.0);
    }

    #[test]
    fn test_depleted_equity_is_critical() {
        let mut mgr = manager(0.05);
        let violation = mgr
            .check_limits(&RiskSnapshot {
                equity: 0.0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::EquityDepleted);
        let response = mgr.handle_risk_breach(&violation);
        assert_eq!(response.cooldown_bars, 10);
        assert_eq!(response.penalty, -0.5);
    }

    #[test]
    fn test_leverage_is_warning_only() {
        let mut mgr = manager(0.05);
        let violation = mgr
            .check_limits(&RiskSnapshot {
                equity: 1000.0,
                notional: 6000.0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(violation.severity, Severity::Warning);
        let response = mgr.handle_risk_breach(&violation);
        assert!(!response.force_flatten);
        assert_eq!(response.penalty, -0.1);
        assert!(!mgr.is_cooling_down());
    }

    #[test]
    fn test_cooldown_blocks_trades_and_retriggers() {
        let mut mgr = manager(0.05);
        let breach = RiskSnapshot {
            equity: 10_000.0,
            daily_pnl: -1000.0,
            ..Default::default()
        };
        let v = mgr.check_limits(&breach).unwrap();
        mgr.handle_risk_breach(&v);
        assert!(mgr.check_limits(&breach).is_none());

        let long = HybridAction::new(Direction::Long, 0.0, 1.0, 0.5);
        let (filtered, overridden) = mgr.filter_action(&long);
        assert!(overridden);
        assert_eq!(filtered.direction, Direction::Hold);

        for _ in 0..20 {
            mgr.tick();
        }
        assert!(!mgr.is_cooling_down());
        assert!(mgr.check_limits(&breach).is_some());
    }

    #[test]
    fn test_only_leverage_is_checked_while_cooling_down() {
        let mut mgr = manager(0.05);
        let deep = RiskSnapshot {
            equity: 7_000.0,
            drawdown: 0.3,
            ..Default::default()
        };
        let v = mgr.check_limits(&deep).unwrap();
        assert_eq!(v.kind, ViolationKind::MaxDrawdown);
        mgr.handle_risk_breach(&v);
        assert_eq!(mgr.cooldown_remaining(), 50);
        assert!(mgr.check_limits(&deep).is_none());

        let levered = RiskSnapshot {
            notional: 70_000.0,
            ..deep
        };
        let v = mgr.check_limits(&levered).unwrap();
        assert_eq!(v.kind, ViolationKind::Leverage);
        assert!(!v.is_critical());
    }

    #[test]
    fn test_position_size_is_shrunk_not_rejected() {
        let mgr = manager(0.05);
        // risk cap: 0.02 * 10000 / 2 = 100; leverage cap: 5 * 10000 / 100 = 500
        let safe = mgr.calculate_max_safe_position_size(100.0, 2.0, 10_000.0);
        assert!((safe - 100.0).abs() < 1e-9);

        let check = mgr.validate_position_size(250.0, 100.0, 2.0, 10_000.0);
        assert!(check.adjusted);
        assert!((check.quantity - 100.0).abs() < 1e-9);

        let ok = mgr.validate_position_size(40.0, 100.0, 2.0, 10_000.0);
        assert!(!ok.adjusted);
        assert_eq!(ok.quantity, 40.0);
    }

    #[test]
    fn test_leverage_cap_binds_on_tight_stops() {
        let mgr = manager(0.05);
        // risk cap: 200 / 0.1 = 2000 -> qty cap 1000 -> leverage cap 5 * 10000 / 100 = 500
        let safe = mgr.calculate_max_safe_position_size(100.0, 0.1, 10_000.0);
        assert!((safe - 500.0).abs() < 1e-9);
    }
}
