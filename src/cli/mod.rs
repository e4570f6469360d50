//! ppo-trader CLI
//!
//! Commands:
//! - `ppo-trader train` - Train a policy on candle data
//! - `ppo-trader eval` - Greedy evaluation episodes for a saved model
//! - `ppo-trader infer` - Bar-by-bar decisions from a saved model
//! - `ppo-trader info` - Inspect a saved model or checkpoint directory
//! - `ppo-trader synth` - Write synthetic candles to a JSON file

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

/// Recurrent PPO trading-decision engine
#[derive(Parser, Debug)]
#[command(name = "ppo-trader")]
#[command(author, version, about = "Recurrent PPO trading-decision engine")]
pub struct Cli {
    /// Configuration directory (default.toml, <env>.toml)
    #[arg(long, global = true, default_value = "config", env = "PPO_TRADER_CONFIG_DIR")]
    pub config_dir: String,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a policy on candle data
    Train {
        /// Number of rollout rounds
        #[arg(short, long)]
        episodes: Option<usize>,
        /// Candle JSON file (synthetic data when omitted)
        #[arg(short, long)]
        data: Option<String>,
        /// Checkpoint directory for saving models
        #[arg(short, long)]
        checkpoint: Option<String>,
        /// Seed for every random source
        #[arg(long)]
        seed: Option<u64>,
        /// Episodes collected in parallel per update
        #[arg(long)]
        rollout_workers: Option<usize>,
        /// Worker threads for gradients and rollouts
        #[arg(long)]
        workers: Option<usize>,
        /// Wall-clock budget in seconds
        #[arg(long)]
        deadline: Option<u64>,
        /// Continue training a saved model
        #[arg(long)]
        resume: Option<String>,
        /// Write the final model here
        #[arg(short, long)]
        output: Option<String>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Evaluate a saved model with greedy actions
    Eval {
        /// Model JSON file
        #[arg(short, long)]
        model: String,
        /// Candle JSON file (synthetic data when omitted)
        #[arg(short, long)]
        data: Option<String>,
        /// Number of evaluation episodes
        #[arg(short, long, default_value = "10")]
        episodes: usize,
        #[arg(long)]
        json: bool,
    },
    /// Decisions for the most recent bars
    Infer {
        /// Model JSON file
        #[arg(short, long)]
        model: String,
        /// Candle JSON file (synthetic data when omitted)
        #[arg(short, long)]
        data: Option<String>,
        /// How many trailing bars to decide on
        #[arg(short, long, default_value = "1")]
        last: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show model or checkpoint information
    Info {
        /// Model JSON file or checkpoint directory
        #[arg(short, long)]
        model: String,
    },
    /// Generate synthetic candles
    Synth {
        /// Number of bars
        #[arg(short, long, default_value = "2000")]
        bars: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Output JSON file
        #[arg(short, long)]
        output: String,
    },
}
