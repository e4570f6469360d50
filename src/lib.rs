pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod rl;

pub use config::AppConfig;
pub use error::{EngineError, Result};
pub use rl::{
    HybridAction, InferenceEngine, PPOTrainer, RLConfig, RecurrentPolicyValueModel,
    TradingEnvironment, TrainingLoop,
};
