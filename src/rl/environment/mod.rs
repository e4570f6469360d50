//! Simulated Trading Environment for RL Training
//!
//! This module provides a gym-like environment for training RL agents
//! on historical or synthetic candles without risking real capital.

mod anomaly;
mod market;
mod position;
mod trading;

pub use anomaly::{Anomaly, AnomalyKind, AnomalyLog};
pub use market::{generate_candles, MarketConfig, MarketState, SimulatedMarket};
pub use position::{ExitReason, Position, TradeResult};
pub use trading::{
    compute_stop_loss, compute_take_profit, validate_tp_sl, EnvironmentState, EpisodeCosts,
    IntrabarOrder, Placement, StepInfo, StepResult, TradingEnvironment, MAX_ATR_DISTANCE,
    MIN_ATR_DISTANCE,
};
