//! Trading Environment for RL Training
//!
//! Gym-like reset/step interface over a candle series. The environment owns
//! the episode state exclusively and mutates it only in `reset` and `step`.

use std::sync::Arc;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::anomaly::{AnomalyKind, AnomalyLog};
use super::position::{ExitReason, Position, TradeResult};
use crate::error::{EngineError, Result};
use crate::rl::config::{EnvironmentConfig, RewardConfig};
use crate::rl::core::action::{Direction, HybridAction};
use crate::rl::core::reward::{validate_reward, RewardCalculator, RewardContext};
use crate::rl::features::{build_window, AccountSnapshot, FibLevel, MarketFeatures, StructuralFeatures};
use crate::rl::risk::{ActionMasker, RiskLimitManager, RiskLimits, RiskSnapshot, RiskViolation};

/// Stop and target bounds in ATR multiples
pub const MIN_ATR_DISTANCE: f64 = 0.3;
pub const MAX_ATR_DISTANCE: f64 = 6.0;

/// Target distance when no structure is available, in ATR
const DEFAULT_TARGET_ATR: f64 = 2.0;
/// Fibonacci targets closer than this are skipped, in ATR
const MIN_FIB_TARGET_ATR: f64 = 1.0;

/// Per-episode cost rates sampled at reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeCosts {
    pub fee_rate: f64,
    pub slippage_rate: f64,
    pub spread_rate: f64,
}

impl EpisodeCosts {
    /// (fees, slippage incl. half spread) for a notional
    pub fn on_notional(&self, notional: f64) -> (f64, f64) {
        (
            notional * self.fee_rate,
            notional * (self.slippage_rate + self.spread_rate / 2.0),
        )
    }
}

/// Resolution of a bar that touches both TP and SL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrabarOrder {
    TakeProfitFirst,
    StopLossFirst,
}

impl IntrabarOrder {
    /// Fair coin from the injected source; no look-ahead bias either way
    pub fn draw<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        if rng.gen_bool(0.5) {
            IntrabarOrder::TakeProfitFirst
        } else {
            IntrabarOrder::StopLossFirst
        }
    }
}

/// Mutable episode state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Realized equity
    pub equity: f64,
    /// Peak mark-to-market equity
    pub peak_equity: f64,
    pub drawdown: f64,
    pub max_drawdown: f64,
    pub start_bar: usize,
    pub current_bar: usize,
    pub position: Option<Position>,
    pub trades: Vec<TradeResult>,
    pub daily_pnl: f64,
    pub last_reset_bar: usize,
    pub steps: usize,
    pub done: bool,
}

/// Additional step information
#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    pub equity: f64,
    pub drawdown: f64,
    pub max_drawdown: f64,
    pub num_trades: usize,
    pub win_rate: f64,
    pub cooldown_remaining: usize,
    /// Action after cooldown and mask overrides
    pub executed: HybridAction,
    /// Action blocked by the structural mask
    pub masked: bool,
    pub violation: Option<RiskViolation>,
    pub closed_trade: Option<TradeResult>,
}

/// Result of taking a step in the environment
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Feature window after the step
    pub observation: Vec<Vec<f64>>,
    /// Validated reward
    pub reward: f64,
    pub done: bool,
    /// Ended by `max_episode_bars` rather than the data
    pub truncated: bool,
    pub info: StepInfo,
}

/// Validated TP/SL placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub tp_corrected: bool,
    pub sl_corrected: bool,
}

/// Stop loss beyond the nearest level that protects the trade.
///
/// The base distance is the gap to the level plus one ATR (two ATR without a
/// level), scaled by `sl_tight` and clamped to [0.3, 6.0] x ATR.
pub fn compute_stop_loss(
    direction: Direction,
    entry: f64,
    atr: f64,
    level: Option<f64>,
    sl_tight: f64,
) -> f64 {
    let base = match level {
        Some(price) if price.is_finite() => (entry - price).abs() + atr,
        _ => DEFAULT_TARGET_ATR * atr,
    };
    let distance = (base * sl_tight).clamp(MIN_ATR_DISTANCE * atr, MAX_ATR_DISTANCE * atr);
    entry - direction.sign() * distance
}

/// Take profit at the nearest Fibonacci target beyond one ATR, capped by the
/// opposing S/R level, shifted by `tp_offset` ATR and clamped to bounds.
///
/// Returns the target and the Fibonacci level it was derived from, `None`
/// when the S/R level or the default distance set the target.
pub fn compute_take_profit(
    direction: Direction,
    entry: f64,
    atr: f64,
    features: &StructuralFeatures,
    tp_offset: f64,
) -> (f64, Option<FibLevel>) {
    let sign = direction.sign();
    let fib = FibLevel::ALL
        .iter()
        .filter_map(|&level| {
            let price = features.fib_price(level)?;
            let distance = sign * (price - entry);
            (distance >= MIN_FIB_TARGET_ATR * atr).then_some((level, distance))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1));

    let opposing = match direction {
        Direction::Short => features.support_price(),
        _ => features.resistance_price(),
    }
    .map(|price| sign * (price - entry))
    .filter(|d| d.is_finite() && *d >= MIN_FIB_TARGET_ATR * atr);

    let (distance, level) = match (fib, opposing) {
        (Some((_, d)), Some(wall)) if wall < d => (wall, None),
        (Some((level, d)), _) => (d, Some(level)),
        (None, Some(wall)) => (wall, None),
        (None, None) => (DEFAULT_TARGET_ATR * atr, None),
    };
    let distance = (distance + tp_offset * atr).clamp(MIN_ATR_DISTANCE * atr, MAX_ATR_DISTANCE * atr);
    (entry + sign * distance, level)
}

/// Auto-correct (never reject) a TP/SL pair onto the right side of entry
/// within [0.3, 6.0] x ATR.
pub fn validate_tp_sl(direction: Direction, entry: f64, atr: f64, tp: f64, sl: f64) -> Placement {
    let sign = direction.sign();
    let lo = MIN_ATR_DISTANCE * atr;
    let hi = MAX_ATR_DISTANCE * atr;
    let fix = |price: f64, side: f64| {
        let distance = side * (price - entry);
        if distance.is_finite() && (lo..=hi).contains(&distance) {
            (price, false)
        } else {
            let d = if distance.is_finite() {
                distance.clamp(lo, hi)
            } else {
                DEFAULT_TARGET_ATR * atr
            };
            (entry + side * d, true)
        }
    };
    let (take_profit, tp_corrected) = fix(tp, sign);
    let (stop_loss, sl_corrected) = fix(sl, -sign);
    Placement {
        take_profit,
        stop_loss,
        tp_corrected,
        sl_corrected,
    }
}

/// Trading environment for RL training
pub struct TradingEnvironment {
    config: EnvironmentConfig,
    market: Arc<MarketFeatures>,
    risk: RiskLimitManager,
    masker: ActionMasker,
    reward: RewardCalculator,
    rng: Box<dyn RngCore + Send>,
    costs: EpisodeCosts,
    state: EnvironmentState,
    anomalies: AnomalyLog,
}

impl TradingEnvironment {
    /// Create a new trading environment over prepared market features
    pub fn new(
        market: Arc<MarketFeatures>,
        config: EnvironmentConfig,
        reward: RewardConfig,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Self> {
        config.validate()?;
        let required = config.required_bars();
        if market.len() < required {
            return Err(EngineError::InsufficientData {
                required,
                available: market.len(),
            });
        }

        Ok(Self {
            risk: RiskLimitManager::new(RiskLimits::from(&config)),
            masker: ActionMasker::new(config.confluence_threshold),
            reward: RewardCalculator::new(reward),
            rng,
            costs: EpisodeCosts::default(),
            state: EnvironmentState {
                equity: config.initial_equity,
                peak_equity: config.initial_equity,
                done: true,
                ..Default::default()
            },
            anomalies: AnomalyLog::new(),
            market,
            config,
        })
    }

    /// Start a new episode and return the initial feature window
    pub fn reset(&mut self) -> Result<Vec<Vec<f64>>> {
        let required = self.config.required_bars();
        if self.market.len() < required {
            return Err(EngineError::InsufficientData {
                required,
                available: self.market.len(),
            });
        }

        self.costs = EpisodeCosts {
            fee_rate: sample(&mut self.rng, self.config.fee_range.min, self.config.fee_range.max),
            slippage_rate: sample(
                &mut self.rng,
                self.config.slippage_range.min,
                self.config.slippage_range.max,
            ),
            spread_rate: sample(
                &mut self.rng,
                self.config.spread_range.min,
                self.config.spread_range.max,
            ),
        };

        let lo = self.config.min_lookback;
        let hi = self.market.len() - self.config.min_remaining;
        let start = self.rng.gen_range(lo..=hi);

        self.state = EnvironmentState {
            equity: self.config.initial_equity,
            peak_equity: self.config.initial_equity,
            start_bar: start,
            current_bar: start,
            last_reset_bar: start,
            ..Default::default()
        };
        self.risk.reset();
        self.anomalies.clear();

        debug!(
            start_bar = start,
            fee = self.costs.fee_rate,
            slippage = self.costs.slippage_rate,
            spread = self.costs.spread_rate,
            "episode reset"
        );
        Ok(self.observation())
    }

    /// Take a step in the environment
    pub fn step(&mut self, action: &HybridAction) -> Result<StepResult> {
        if self.state.done {
            return Err(EngineError::Validation(
                "step called on a finished episode; call reset first".into(),
            ));
        }
        self.state.steps += 1;
        let bar = self.state.current_bar;
        let candle = self.market.candle(bar).clone();
        let mut reward = 0.0;
        let mut info = StepInfo::default();

        // 1. hard limits
        let snapshot = self.risk_snapshot(candle.close);
        if let Some(violation) = self.risk.check_limits(&snapshot) {
            let response = self.risk.handle_risk_breach(&violation);
            info.violation = Some(violation);
            reward += response.penalty;

            if response.force_flatten {
                if let Some(trade) = self.close_position(ExitReason::RiskBreach, candle.close, bar) {
                    info.closed_trade = Some(trade);
                }
                self.anomalies.record(
                    bar,
                    AnomalyKind::ForcedFlatten,
                    format!("{} breach ({:.4})", violation.kind, violation.value),
                );
                self.mark_to_market(candle.close);
                let truncated = self.advance_bar();
                return Ok(self.finish_step(reward, truncated, info));
            }
        }

        // 2. cooldown override
        let (mut action, overridden) = self.risk.filter_action(action);
        if overridden {
            self.anomalies.record(bar, AnomalyKind::CooldownOverride, "cooling down");
        }

        // 3. manage the open position
        let flat_at_start = self.state.position.is_none();
        if let Some(position) = &self.state.position {
            let hit_tp = match position.direction {
                Direction::Short => candle.low <= position.take_profit,
                _ => candle.high >= position.take_profit,
            };
            let hit_sl = match position.direction {
                Direction::Short => candle.high >= position.stop_loss,
                _ => candle.low <= position.stop_loss,
            };
            let exit = match (hit_tp, hit_sl) {
                (true, true) => match IntrabarOrder::draw(&mut self.rng) {
                    IntrabarOrder::TakeProfitFirst => Some((ExitReason::TakeProfit, position.take_profit)),
                    IntrabarOrder::StopLossFirst => Some((ExitReason::StopLoss, position.stop_loss)),
                },
                (true, false) => Some((ExitReason::TakeProfit, position.take_profit)),
                (false, true) => Some((ExitReason::StopLoss, position.stop_loss)),
                (false, false) if position.bars_held(bar) >= self.config.max_hold_bars => {
                    Some((ExitReason::Timeout, candle.close))
                }
                (false, false) => None,
            };

            if let Some((reason, price)) = exit {
                if let Some((trade, trade_reward)) = self.close_and_score(reason, price, bar) {
                    reward += trade_reward;
                    info.closed_trade = Some(trade);
                }
            }
        }

        // 4. open a new position, only when flat at step start
        if flat_at_start && action.direction.is_trade() {
            let features = self.market.structure(bar).clone();
            let mask = self.masker.compute_mask(&features);
            if mask.allows(action.direction) {
                let confluence = mask.confluence(action.direction);
                if !self.open_position(&action, &features, confluence, candle.close, bar) {
                    action = action.as_hold();
                }
            } else {
                self.anomalies.record(
                    bar,
                    AnomalyKind::MaskedAction,
                    format!("{} blocked: {}", action.direction, mask.reason),
                );
                action = action.as_hold();
                info.masked = true;
            }
        } else if !flat_at_start {
            // holding or just closed: new entries wait for the next bar
            action = action.as_hold();
        }
        info.executed = action;

        // 5. advance
        self.mark_to_market(candle.close);
        self.risk.tick();
        let truncated = self.advance_bar();

        if self.state.done {
            let exit_bar = self.state.current_bar;
            let last_close = self.market.candle(exit_bar).close;
            let reason = if truncated {
                ExitReason::Truncated
            } else {
                ExitReason::EndOfData
            };
            if let Some((trade, trade_reward)) = self.close_and_score(reason, last_close, exit_bar) {
                reward += trade_reward;
                info.closed_trade = Some(trade);
            }
        }

        Ok(self.finish_step(reward, truncated, info))
    }

    fn finish_step(&mut self, reward: f64, truncated: bool, mut info: StepInfo) -> StepResult {
        if !reward.is_finite() {
            self.anomalies.record(
                self.state.current_bar,
                AnomalyKind::NumericalInstability,
                format!("reward {reward}"),
            );
        }
        let reward = validate_reward(reward);
        info.equity = self.state.equity;
        info.drawdown = self.state.drawdown;
        info.max_drawdown = self.state.max_drawdown;
        info.num_trades = self.state.trades.len();
        info.win_rate = self.win_rate();
        info.cooldown_remaining = self.risk.cooldown_remaining();
        StepResult {
            observation: self.observation(),
            reward,
            done: self.state.done,
            truncated,
            info,
        }
    }

    /// Move to the next bar; returns whether the episode was truncated
    fn advance_bar(&mut self) -> bool {
        let last = self.market.len() - 1;
        self.state.current_bar = (self.state.current_bar + 1).min(last);
        if self.state.current_bar - self.state.last_reset_bar >= self.config.bars_per_day {
            self.state.daily_pnl = 0.0;
            self.state.last_reset_bar = self.state.current_bar;
        }

        let truncated = self
            .config
            .max_episode_bars
            .map_or(false, |max| self.state.steps >= max)
            && self.state.current_bar < last;
        if self.state.current_bar >= last || truncated {
            self.state.done = true;
        }
        truncated
    }

    /// Recompute drawdown from mark-to-market equity
    fn mark_to_market(&mut self, price: f64) {
        let equity = self.mtm_equity(price);
        if equity > self.state.peak_equity {
            self.state.peak_equity = equity;
        }
        self.state.drawdown = if self.state.peak_equity > 0.0 {
            ((self.state.peak_equity - equity) / self.state.peak_equity).max(0.0)
        } else {
            0.0
        };
        self.state.max_drawdown = self.state.max_drawdown.max(self.state.drawdown);
    }

    fn mtm_equity(&self, price: f64) -> f64 {
        let unrealized = self
            .state
            .position
            .as_ref()
            .map_or(0.0, |p| p.unrealized_pnl(price, self.config.point_value));
        self.state.equity + unrealized
    }

    fn risk_snapshot(&self, price: f64) -> RiskSnapshot {
        RiskSnapshot {
            equity: self.mtm_equity(price),
            daily_pnl: self.state.daily_pnl,
            drawdown: self.state.drawdown,
            notional: self
                .state
                .position
                .as_ref()
                .map_or(0.0, |p| p.notional(price, self.config.point_value)),
        }
    }

    /// Open a position at the bar close; returns false when nothing was opened
    fn open_position(
        &mut self,
        action: &HybridAction,
        features: &StructuralFeatures,
        confluence: f64,
        entry: f64,
        bar: usize,
    ) -> bool {
        let direction = action.direction;
        let atr = features.atr;
        let level = match direction {
            Direction::Short => features.resistance_price(),
            _ => features.support_price(),
        };
        let sl = compute_stop_loss(direction, entry, atr, level, action.sl_tight);
        let (tp, fib_level) = compute_take_profit(direction, entry, atr, features, action.tp_offset);

        let placement = validate_tp_sl(direction, entry, atr, tp, sl);
        if placement.tp_corrected {
            warn!(bar, tp, "take profit out of bounds, corrected");
            self.anomalies.record(
                bar,
                AnomalyKind::CorrectedTakeProfit,
                format!("{:.4} -> {:.4}", tp, placement.take_profit),
            );
        }
        if placement.sl_corrected {
            warn!(bar, sl, "stop loss out of bounds, corrected");
            self.anomalies.record(
                bar,
                AnomalyKind::CorrectedStopLoss,
                format!("{:.4} -> {:.4}", sl, placement.stop_loss),
            );
        }

        let pv = self.config.point_value;
        let stop_distance = (entry - placement.stop_loss).abs();
        let equity = self.state.equity;
        let requested = action.size * self.config.max_risk_per_trade * equity / (stop_distance * pv);
        let check = self
            .risk
            .validate_position_size(requested, entry, stop_distance, equity);
        if check.adjusted {
            self.anomalies.record(
                bar,
                AnomalyKind::ResizedPosition,
                format!("{:.4} -> {:.4}", requested, check.quantity),
            );
        }
        if !(check.quantity > 0.0) {
            self.anomalies.record(bar, AnomalyKind::ZeroQuantity, "sized to zero");
            return false;
        }

        let (entry_fees, entry_slippage) = self.costs.on_notional(entry * check.quantity * pv);
        self.state.equity -= entry_fees + entry_slippage;
        self.state.daily_pnl -= entry_fees + entry_slippage;

        let suggestion = self.market.suggest(bar, direction, confluence);
        debug!(
            bar,
            %direction,
            entry,
            tp = placement.take_profit,
            sl = placement.stop_loss,
            qty = check.quantity,
            tp_source = %suggestion.tp_source,
            sl_source = %suggestion.sl_source,
            "opened position"
        );
        self.state.position = Some(Position {
            direction,
            entry_price: entry,
            entry_bar: bar,
            quantity: check.quantity,
            take_profit: placement.take_profit,
            stop_loss: placement.stop_loss,
            chosen_fib_level: fib_level,
            fib_target: fib_level.and_then(|l| features.fib_price(l)),
            confluence_score: confluence,
            atr_at_entry: atr,
            entry_fees,
            entry_slippage,
            suggestion: Some(suggestion),
        });
        true
    }

    /// Close and score with the reward calculator
    fn close_and_score(
        &mut self,
        reason: ExitReason,
        price: f64,
        bar: usize,
    ) -> Option<(TradeResult, f64)> {
        let max_drawdown_before = self.state.max_drawdown;
        let trade = self.close_position(reason, price, bar)?;
        self.mark_to_market(price);
        let ctx = RewardContext {
            max_drawdown_before,
            max_drawdown_after: self.state.max_drawdown,
        };
        let reward = self.reward.calculate_reward(&trade, &ctx);
        Some((trade, reward))
    }

    /// Realize the open position. `equity` changes by exactly the trade's net PnL.
    fn close_position(
        &mut self,
        reason: ExitReason,
        exit_price: f64,
        bar: usize,
    ) -> Option<TradeResult> {
        let position = self.state.position.take()?;
        let pv = self.config.point_value;
        let gross = position.unrealized_pnl(exit_price, pv);
        let (exit_fees, exit_slippage) = self.costs.on_notional(position.notional(exit_price, pv));
        let pnl = gross - exit_fees - exit_slippage;
        let entry_notional = position.notional(position.entry_price, pv);

        self.state.equity += pnl;
        self.state.daily_pnl += pnl;

        let hit_tp = reason == ExitReason::TakeProfit;
        let fib_alignment = hit_tp.then(|| {
            position.fib_target.map_or(0.0, |target| {
                let atr = position.atr_at_entry.max(f64::EPSILON);
                (-(exit_price - target).abs() / atr).exp()
            })
        });

        let trade = TradeResult {
            direction: position.direction,
            entry_bar: position.entry_bar,
            exit_bar: bar,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            pnl,
            pnl_percent: if entry_notional > 0.0 { pnl / entry_notional } else { 0.0 },
            hit_tp,
            hit_sl: reason == ExitReason::StopLoss,
            fees: position.entry_fees + exit_fees,
            slippage: position.entry_slippage + exit_slippage,
            confluence_score: position.confluence_score,
            fib_alignment,
            exit_reason: reason,
            bars_held: position.bars_held(bar),
        };
        debug!(bar, reason = reason.as_str(), pnl, "closed position");
        self.state.trades.push(trade.clone());
        Some(trade)
    }

    fn account_snapshot(&self) -> AccountSnapshot {
        let bar = self.state.current_bar;
        let price = self.market.candle(bar).close;
        let pv = self.config.point_value;
        match &self.state.position {
            Some(p) => AccountSnapshot {
                position_side: p.direction.sign(),
                unrealized_pct: p.unrealized_pct(price, pv),
                hold_fraction: p.bars_held(bar) as f64 / self.config.max_hold_bars as f64,
                drawdown: self.state.drawdown,
                cooling_down: self.risk.is_cooling_down(),
            },
            None => AccountSnapshot {
                drawdown: self.state.drawdown,
                cooling_down: self.risk.is_cooling_down(),
                ..Default::default()
            },
        }
    }

    /// Feature window at the current bar
    pub fn observation(&self) -> Vec<Vec<f64>> {
        build_window(
            &self.market,
            self.state.current_bar,
            self.config.window_size,
            &self.account_snapshot(),
        )
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn costs(&self) -> &EpisodeCosts {
        &self.costs
    }

    pub fn anomalies(&self) -> &AnomalyLog {
        &self.anomalies
    }

    pub fn market(&self) -> &Arc<MarketFeatures> {
        &self.market
    }

    pub fn risk(&self) -> &RiskLimitManager {
        &self.risk
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    /// Equity change since reset
    pub fn episode_pnl(&self) -> f64 {
        self.state.equity - self.config.initial_equity
    }

    pub fn num_trades(&self) -> usize {
        self.state.trades.len()
    }

    pub fn win_rate(&self) -> f64 {
        let n = self.state.trades.len();
        if n == 0 {
            return 0.0;
        }
        self.state.trades.iter().filter(|t| t.is_win()).count() as f64 / n as f64
    }
}

fn sample(rng: &mut Box<dyn RngCore + Send>, min: f64, max: f64) -> f64 {
    if max > min {
        rng.gen_range(min..=max)
    } else {
        min
    }
}
