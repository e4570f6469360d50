//! Core RL abstractions
//!
//! Hybrid actions and the trade-level reward.

pub mod action;
pub mod reward;

pub use action::{sigmoid, Direction, HybridAction, RawAction, NUM_DIRECTIONS};
pub use reward::{
    confluence_score, validate_reward, RewardCalculator, RewardContext, RewardSignal, REWARD_BOUND,
};
