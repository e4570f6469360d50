//! Positions and realized trades

use serde::{Deserialize, Serialize};

use crate::rl::core::action::Direction;
use crate::rl::features::{FibLevel, TpSlSuggestion};

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
    /// Closed by a critical risk breach
    RiskBreach,
    /// Closed at the last bar of the data
    EndOfData,
    /// Closed when the episode was truncated
    Truncated,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Timeout => "timeout",
            ExitReason::RiskBreach => "risk_breach",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::Truncated => "truncated",
        }
    }
}

/// An open trade. At most one per environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_bar: usize,
    pub quantity: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub chosen_fib_level: Option<FibLevel>,
    /// Price of the chosen Fibonacci target at entry
    pub fib_target: Option<f64>,
    pub confluence_score: f64,
    pub atr_at_entry: f64,
    /// Fees paid at entry
    pub entry_fees: f64,
    /// Slippage and half-spread paid at entry
    pub entry_slippage: f64,
    /// Scored structural TP/SL candidates at entry
    #[serde(default)]
    pub suggestion: Option<TpSlSuggestion>,
}

impl Position {
    pub fn notional(&self, price: f64, point_value: f64) -> f64 {
        (price * self.quantity * point_value).abs()
    }

    /// Mark-to-market PnL before exit costs
    pub fn unrealized_pnl(&self, price: f64, point_value: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price) * self.quantity * point_value
    }

    pub fn unrealized_pct(&self, price: f64, point_value: f64) -> f64 {
        let entry_notional = self.notional(self.entry_price, point_value);
        if entry_notional > 0.0 {
            self.unrealized_pnl(price, point_value) / entry_notional
        } else {
            0.0
        }
    }

    pub fn bars_held(&self, current_bar: usize) -> usize {
        current_bar.saturating_sub(self.entry_bar)
    }
}

/// A realized round trip. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub direction: Direction,
    pub entry_bar: usize,
    pub exit_bar: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Net PnL at close: price delta less exit costs
    pub pnl: f64,
    /// `pnl` over entry notional
    pub pnl_percent: f64,
    pub hit_tp: bool,
    pub hit_sl: bool,
    /// Entry plus exit fees
    pub fees: f64,
    /// Entry plus exit slippage and half-spread
    pub slippage: f64,
    pub confluence_score: f64,
    /// Closeness of the exit to the Fibonacci target; TP exits only
    pub fib_alignment: Option<f64>,
    pub exit_reason: ExitReason,
    pub bars_held: usize,
}

impl TradeResult {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}
