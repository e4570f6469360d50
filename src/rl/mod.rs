//! Reinforcement Learning Module
//!
//! Recurrent PPO agent for bar-by-bar trading decisions.
//!
//! # Features
//!
//! - **Observations**: indicator, structural and account features per bar
//! - **Action Space**: direction (Hold/Long/Short) plus continuous TP offset,
//!   stop tightness and size
//! - **Risk**: hard limits with cooldowns and a structural action mask
//! - **Algorithms**: PPO with GAE, finite-difference gradients and Adam

pub mod algorithms;
pub mod config;
pub mod core;
pub mod environment;
pub mod features;
pub mod integration;
pub mod memory;
pub mod networks;
pub mod risk;
pub mod training;

// Config exports
pub use config::{
    EnvironmentConfig, GradientConfig, ModelConfig, PPOConfig, RLConfig, RewardConfig,
    TrainingConfig,
};

// Core exports
pub use self::core::{Direction, HybridAction, RawAction, RewardCalculator};

// Algorithm exports
pub use algorithms::{PPOTrainer, TrainingMetrics};

// Memory exports
pub use memory::{Experience, ExperienceBuffer};

// Network exports
pub use networks::{ParamGroup, RecurrentPolicyValueModel};

// Integration exports
pub use integration::{Decision, InferenceEngine};

// Environment exports
pub use environment::{StepResult, TradingEnvironment};

// Training exports
pub use training::{TrainingControl, TrainingLoop, TrainingReport};
