//! RL Configuration
//!
//! Configuration structs for the environment, model, reward and trainer.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Main RL configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RLConfig {
    /// PPO algorithm configuration
    pub ppo: PPOConfig,
    /// Trading environment configuration
    pub environment: EnvironmentConfig,
    /// Reward shaping configuration
    pub reward: RewardConfig,
    /// Model architecture
    pub model: ModelConfig,
    /// Finite-difference gradient configuration
    pub gradient: GradientConfig,
    /// Training loop configuration
    pub training: TrainingConfig,
}

impl RLConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.ppo.validate()?;
        self.environment.validate()?;
        self.model.validate()?;
        self.gradient.validate()?;
        self.training.validate()?;
        Ok(())
    }
}

/// PPO algorithm hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PPOConfig {
    /// Discount factor (gamma)
    pub gamma: f64,
    /// GAE lambda
    pub gae_lambda: f64,
    /// PPO clip range
    pub clip_epsilon: f64,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Entropy bonus coefficient
    pub entropy_coef: f64,
    /// Value function coefficient
    pub value_loss_coef: f64,
    /// Per-group L2 gradient clip
    pub max_grad_norm: f64,
    /// Mini-batch size
    pub batch_size: usize,
    /// Number of PPO epochs per update
    pub ppo_epochs: usize,
}

impl Default for PPOConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_epsilon: 0.2,
            learning_rate: 3e-4,
            entropy_coef: 0.01,
            value_loss_coef: 0.5,
            max_grad_norm: 0.5,
            batch_size: 64,
            ppo_epochs: 4,
        }
    }
}

impl PPOConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gamma) || !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(EngineError::InvalidConfiguration(
                "gamma and gae_lambda must lie in [0, 1]".into(),
            ));
        }
        if self.clip_epsilon <= 0.0 || self.learning_rate <= 0.0 || self.max_grad_norm <= 0.0 {
            return Err(EngineError::InvalidConfiguration(
                "clip_epsilon, learning_rate and max_grad_norm must be positive".into(),
            ));
        }
        if self.batch_size == 0 || self.ppo_epochs == 0 {
            return Err(EngineError::InvalidConfiguration(
                "batch_size and ppo_epochs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Inclusive sampling range for per-episode domain randomization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min >= 0.0 && self.min <= self.max
    }
}

/// Trading environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Fraction of equity risked per trade at size = 1
    pub max_risk_per_trade: f64,
    /// Absolute quantity cap per position
    pub max_qty_per_asset: f64,
    /// Daily loss cap as a fraction of equity
    pub daily_loss_cap: f64,
    /// Maximum notional / equity
    pub max_leverage: f64,
    /// Currency value of one price point per unit
    pub point_value: f64,
    /// Starting equity for every episode
    pub initial_equity: f64,
    /// Fee rate range on notional
    pub fee_range: Range,
    /// Slippage rate range on notional
    pub slippage_range: Range,
    /// Spread range as a fraction of price
    pub spread_range: Range,
    /// Rows in each observation window
    pub window_size: usize,
    /// Timeout for open positions
    pub max_hold_bars: usize,
    /// Bars per trading day for the daily PnL reset
    pub bars_per_day: usize,
    /// History required before the start bar
    pub min_lookback: usize,
    /// Bars required after the start bar
    pub min_remaining: usize,
    /// Confluence needed for a direction to be tradable
    pub confluence_threshold: f64,
    /// Optional truncation of episode length
    pub max_episode_bars: Option<usize>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 0.02,
            max_qty_per_asset: 1000.0,
            daily_loss_cap: 0.05,
            max_leverage: 5.0,
            point_value: 1.0,
            initial_equity: 10_000.0,
            fee_range: Range::new(0.0002, 0.0008),
            slippage_range: Range::new(0.0001, 0.0005),
            spread_range: Range::new(0.0001, 0.0004),
            window_size: 32,
            max_hold_bars: 100,
            bars_per_day: 24,
            min_lookback: 100,
            min_remaining: 200,
            confluence_threshold: 0.5,
            max_episode_bars: None,
        }
    }
}

impl EnvironmentConfig {
    /// Minimum number of bars a candle series needs for an episode
    pub fn required_bars(&self) -> usize {
        self.min_lookback + self.min_remaining
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_risk_per_trade", self.max_risk_per_trade),
            ("max_qty_per_asset", self.max_qty_per_asset),
            ("daily_loss_cap", self.daily_loss_cap),
            ("max_leverage", self.max_leverage),
            ("point_value", self.point_value),
            ("initial_equity", self.initial_equity),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(EngineError::InvalidConfiguration(format!(
                    "environment.{} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, range) in [
            ("fee_range", self.fee_range),
            ("slippage_range", self.slippage_range),
            ("spread_range", self.spread_range),
        ] {
            if !range.is_valid() {
                return Err(EngineError::InvalidConfiguration(format!(
                    "environment.{} must satisfy 0 <= min <= max",
                    name
                )));
            }
        }
        if self.window_size == 0 || self.bars_per_day == 0 || self.max_hold_bars == 0 {
            return Err(EngineError::InvalidConfiguration(
                "window_size, bars_per_day and max_hold_bars must be at least 1".into(),
            ));
        }
        if self.min_remaining == 0 {
            return Err(EngineError::InvalidConfiguration(
                "environment.min_remaining must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Reward function configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Penalty per unit increase of max drawdown
    pub lambda_dd: f64,
    /// Flat cost per closed trade
    pub lambda_turn: f64,
    /// Bonus multiplier for Fibonacci-aligned take profits
    pub tp_bonus: f64,
    /// Multiplier applied to stop-loss exits
    pub sl_penalty: f64,
    /// Bonus multiplier for confluence at entry
    pub confluence_bonus: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            lambda_dd: 10.0,
            lambda_turn: 0.05,
            tp_bonus: 0.5,
            sl_penalty: 1.2,
            confluence_bonus: 0.3,
        }
    }
}

/// Recurrent model architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of one observation row
    pub feature_size: usize,
    /// LSTM hidden units
    pub hidden_size: usize,
    /// Rows per input window
    pub sequence_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            feature_size: crate::rl::features::OBSERVATION_SIZE,
            hidden_size: 32,
            sequence_length: 32,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.feature_size == 0 || self.hidden_size == 0 || self.sequence_length == 0 {
            return Err(EngineError::InvalidConfiguration(
                "model dimensions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Finite-difference gradient configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    /// Central-difference step
    pub epsilon: f64,
    /// Perturb LSTM weights too
    pub include_lstm: bool,
    /// Stride-sampling rate for the LSTM group
    pub lstm_sample_rate: f64,
    /// Stride-sampling rate for other groups above the size threshold
    pub large_group_sample_rate: f64,
    /// Groups with more scalars than this are stride-sampled
    pub large_group_threshold: usize,
    /// Worker threads; 0 lets rayon decide
    pub workers: usize,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            include_lstm: false,
            lstm_sample_rate: 0.1,
            large_group_sample_rate: 0.1,
            large_group_threshold: 256,
            workers: 0,
        }
    }
}

impl GradientConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0) {
            return Err(EngineError::InvalidConfiguration(
                "gradient.epsilon must be positive".into(),
            ));
        }
        for rate in [self.lstm_sample_rate, self.large_group_sample_rate] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(EngineError::InvalidConfiguration(format!(
                    "gradient sample rates must lie in (0, 1], got {}",
                    rate
                )));
            }
        }
        Ok(())
    }
}

/// Training loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Rollout rounds; each collects `rollout_workers` episodes
    pub episodes: usize,
    /// Seed for every random source
    pub seed: u64,
    /// Episodes collected concurrently per update
    pub rollout_workers: usize,
    /// Save a checkpoint every N rollout rounds (0 disables)
    pub checkpoint_frequency: usize,
    /// Path for saving checkpoints
    pub checkpoint_dir: String,
    /// Maximum checkpoints to keep
    pub max_checkpoints: usize,
    /// Wall-clock budget in seconds
    pub deadline_secs: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: 50,
            seed: 42,
            rollout_workers: 1,
            checkpoint_frequency: 10,
            checkpoint_dir: "./checkpoints".to_string(),
            max_checkpoints: 5,
            deadline_secs: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rollout_workers == 0 {
            return Err(EngineError::InvalidConfiguration(
                "training.rollout_workers must be at least 1".into(),
            ));
        }
        if self.max_checkpoints == 0 {
            return Err(EngineError::InvalidConfiguration(
                "training.max_checkpoints must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RLConfig::default().validate().is_ok());
        assert_eq!(EnvironmentConfig::default().required_bars(), 300);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let mut env = EnvironmentConfig::default();
        env.fee_range = Range::new(0.01, 0.001);
        assert!(env.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_rejects_zero_batch() {
        let ppo = PPOConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(ppo.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let cfg: RLConfig = serde_json::from_str(r#"{"ppo": {"gamma": 0.9}}"#).unwrap();
        assert!((cfg.ppo.gamma - 0.9).abs() < 1e-12);
        assert_eq!(cfg.ppo.batch_size, 64);
        assert_eq!(cfg.environment.max_hold_bars, 100);
    }
}
