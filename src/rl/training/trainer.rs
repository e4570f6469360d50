//! Training Loop
//!
//! Collects episodes from the trading environment, runs PPO updates and
//! writes checkpoints. Rollouts run on the trainer's worker pool, each with
//! a private environment and random source seeded from the run seed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::checkpointing::{episode_name, CheckpointMetadata, Checkpointer};
use crate::error::{EngineError, Result};
use crate::rl::algorithms::{PPOTrainer, TrainingMetrics};
use crate::rl::config::RLConfig;
use crate::rl::environment::TradingEnvironment;
use crate::rl::features::MarketFeatures;
use crate::rl::memory::{Experience, ExperienceBuffer};
use crate::rl::networks::RecurrentPolicyValueModel;

/// Why training stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Deadline,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Completed => "completed",
            StopReason::Deadline => "deadline",
            StopReason::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Cooperative stop signals, checked between rollout rounds
#[derive(Debug, Clone, Default)]
pub struct TrainingControl {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl TrainingControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    /// Flag another thread can set to stop training
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Some(StopReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StopReason::Deadline),
            _ => None,
        }
    }
}

/// Result of one collected episode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeResult {
    /// Zero-based episode index within the run
    pub episode: usize,
    /// Total reward for episode
    pub total_reward: f64,
    /// Episode length in steps
    pub length: usize,
    /// Final PnL
    pub final_pnl: f64,
    /// Number of trades
    pub num_trades: usize,
    /// Win rate
    pub win_rate: f64,
    pub max_drawdown: f64,
    /// Anomalies recorded by the environment
    pub anomalies: usize,
}

/// Training summary statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Number of episodes
    pub num_episodes: usize,
    /// Average reward per episode
    pub avg_reward: f64,
    /// Average PnL per episode
    pub avg_pnl: f64,
    /// Average episode length
    pub avg_episode_length: f64,
    /// Average trades per episode
    pub avg_trades: f64,
    /// Average win rate
    pub avg_win_rate: f64,
    pub avg_max_drawdown: f64,
    /// Profit factor (wins / losses)
    pub profit_factor: f64,
}

/// Everything a training run produced, possibly partial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub episodes: Vec<EpisodeResult>,
    pub metrics: Vec<TrainingMetrics>,
    pub summary: TrainingSummary,
    pub stop_reason: StopReason,
    pub elapsed_secs: f64,
}

/// Calculate training summary statistics
pub fn summarize_results(results: &[EpisodeResult]) -> TrainingSummary {
    if results.is_empty() {
        return TrainingSummary::default();
    }

    let n = results.len() as f64;

    let avg_reward = results.iter().map(|r| r.total_reward).sum::<f64>() / n;
    let avg_pnl = results.iter().map(|r| r.final_pnl).sum::<f64>() / n;
    let avg_length = results.iter().map(|r| r.length as f64).sum::<f64>() / n;
    let avg_trades = results.iter().map(|r| r.num_trades as f64).sum::<f64>() / n;
    let avg_win_rate = results.iter().map(|r| r.win_rate).sum::<f64>() / n;
    let avg_max_drawdown = results.iter().map(|r| r.max_drawdown).sum::<f64>() / n;

    // Calculate profit factor (sum of wins / sum of losses)
    let total_wins: f64 = results.iter().filter(|r| r.final_pnl > 0.0).map(|r| r.final_pnl).sum();
    let total_losses: f64 = results.iter().filter(|r| r.final_pnl < 0.0).map(|r| -r.final_pnl).sum();
    let profit_factor = if total_losses > 0.0 {
        total_wins / total_losses
    } else if total_wins > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    TrainingSummary {
        num_episodes: results.len(),
        avg_reward,
        avg_pnl,
        avg_episode_length: avg_length,
        avg_trades,
        avg_win_rate,
        avg_max_drawdown,
        profit_factor,
    }
}

/// Play one episode with `model`, recording every step.
///
/// Actions are sampled unless `deterministic`. Logits are not masked here;
/// the environment overrides masked directions to HOLD.
pub fn run_episode<R: RngCore + ?Sized>(
    model: &RecurrentPolicyValueModel,
    env: &mut TradingEnvironment,
    deterministic: bool,
    rng: &mut R,
    episode: usize,
) -> Result<(ExperienceBuffer, EpisodeResult)> {
    let mut observation = env.reset()?;
    let mut buffer = ExperienceBuffer::new();
    let mut total_reward = 0.0;

    loop {
        let output = model.forward_pass(&observation, deterministic, rng)?;
        let result = env.step(&output.action)?;
        let done = result.done || result.truncated;
        total_reward += result.reward;

        buffer.push(Experience {
            observation,
            action: output.raw,
            reward: result.reward,
            value: output.value,
            log_probs: output.log_probs,
            done,
        });
        observation = result.observation;
        if done {
            break;
        }
    }

    let state = env.state();
    let summary = EpisodeResult {
        episode,
        total_reward,
        length: buffer.len(),
        final_pnl: env.episode_pnl(),
        num_trades: env.num_trades(),
        win_rate: env.win_rate(),
        max_drawdown: state.max_drawdown,
        anomalies: env.anomalies().len(),
    };
    Ok((buffer, summary))
}

/// Deterministic evaluation episodes of `model` over `market`.
///
/// Each episode gets its own seeded environment so start bars and cost
/// draws differ while the policy itself stays greedy.
pub fn evaluate_model(
    model: &RecurrentPolicyValueModel,
    market: Arc<MarketFeatures>,
    config: &RLConfig,
    episodes: usize,
) -> Result<Vec<EpisodeResult>> {
    let mut results = Vec::with_capacity(episodes);
    for episode in 0..episodes {
        let seed = episode_seed(config.training.seed.wrapping_add(0xE7A1), episode);
        let mut env = TradingEnvironment::new(
            Arc::clone(&market),
            config.environment.clone(),
            config.reward.clone(),
            Box::new(StdRng::seed_from_u64(seed)),
        )?;
        let mut rng = StdRng::seed_from_u64(seed);
        let (_, result) = run_episode(model, &mut env, true, &mut rng, episode)?;
        results.push(result);
    }
    Ok(results)
}

/// Per-episode seed, independent of which worker runs the episode
fn episode_seed(seed: u64, episode: usize) -> u64 {
    seed ^ (episode as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Training loop for the recurrent PPO agent
pub struct TrainingLoop {
    config: RLConfig,
    market: Arc<MarketFeatures>,
    trainer: PPOTrainer,
    checkpointer: Option<Checkpointer>,
    run_id: Uuid,
}

impl TrainingLoop {
    /// Build a loop with a freshly initialized model
    pub fn new(config: RLConfig, market: Arc<MarketFeatures>) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.training.seed);
        let model = RecurrentPolicyValueModel::new(&config.model, &mut rng)?;
        Self::with_model(config, market, model)
    }

    /// Build a loop that continues training `model`
    pub fn with_model(
        config: RLConfig,
        market: Arc<MarketFeatures>,
        model: RecurrentPolicyValueModel,
    ) -> Result<Self> {
        config.validate()?;
        if config.environment.window_size != model.sequence_length {
            return Err(EngineError::InvalidConfiguration(format!(
                "environment.window_size ({}) must equal the model sequence length ({})",
                config.environment.window_size, model.sequence_length
            )));
        }
        let required = config.environment.required_bars();
        if market.len() < required {
            return Err(EngineError::InsufficientData {
                required,
                available: market.len(),
            });
        }

        let trainer = PPOTrainer::new(
            config.ppo.clone(),
            config.gradient.clone(),
            model,
            Box::new(StdRng::seed_from_u64(config.training.seed.wrapping_add(1))),
        )?;
        Ok(Self {
            config,
            market,
            trainer,
            checkpointer: None,
            run_id: Uuid::new_v4(),
        })
    }

    /// Write checkpoints into the configured directory
    pub fn with_checkpoints(mut self) -> Result<Self> {
        self.checkpointer = Some(Checkpointer::new(
            &self.config.training.checkpoint_dir,
            self.config.training.max_checkpoints,
        )?);
        Ok(self)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn model(&self) -> &RecurrentPolicyValueModel {
        self.trainer.model()
    }

    pub fn into_model(self) -> RecurrentPolicyValueModel {
        self.trainer.into_model()
    }

    /// Collect `rollout_workers` episodes in parallel from the current model
    pub fn collect_rollouts(&self, first_episode: usize) -> Result<Vec<(ExperienceBuffer, EpisodeResult)>> {
        let workers = self.config.training.rollout_workers;
        let seed = self.config.training.seed;
        let market = &self.market;
        let environment = &self.config.environment;
        let reward = &self.config.reward;
        let snapshot = self.trainer.model();
        let pool = self.trainer.gradient_estimator().pool();

        pool.install(|| {
            (first_episode..first_episode + workers)
                .into_par_iter()
                .map(|episode| {
                    let seed = episode_seed(seed, episode);
                    let mut env = TradingEnvironment::new(
                        Arc::clone(market),
                        environment.clone(),
                        reward.clone(),
                        Box::new(StdRng::seed_from_u64(seed)),
                    )?;
                    let mut rng = StdRng::seed_from_u64(seed.rotate_left(17));
                    run_episode(snapshot, &mut env, false, &mut rng, episode)
                })
                .collect()
        })
    }

    /// Run the configured number of rollout rounds, updating after each.
    ///
    /// Stops early on deadline or cancellation and reports what it has.
    pub fn train(&mut self, control: &TrainingControl) -> Result<TrainingReport> {
        let started = Instant::now();
        let rounds = self.config.training.episodes;
        let mut episodes = Vec::new();
        let mut metrics = Vec::new();
        let mut stop_reason = StopReason::Completed;

        info!(
            run_id = %self.run_id,
            rounds,
            rollout_workers = self.config.training.rollout_workers,
            params = self.trainer.model().param_count(),
            "starting training"
        );

        for round in 0..rounds {
            if let Some(reason) = control.should_stop() {
                warn!(%reason, round, "training stopped early");
                stop_reason = reason;
                break;
            }

            let rollouts = self.collect_rollouts(episodes.len())?;
            let mut buffer = ExperienceBuffer::new();
            for (rollout, result) in rollouts {
                info!(
                    episode = result.episode + 1,
                    reward = result.total_reward,
                    pnl = result.final_pnl,
                    trades = result.num_trades,
                    win_rate = result.win_rate,
                    "episode complete"
                );
                buffer.extend(rollout);
                episodes.push(result);
            }

            buffer.compute_advantages(self.config.ppo.gamma, self.config.ppo.gae_lambda, 0.0);
            metrics.push(self.trainer.update_model(&mut buffer)?);

            let frequency = self.config.training.checkpoint_frequency;
            if frequency > 0 && (round + 1) % frequency == 0 {
                self.checkpoint(episodes.len())?;
            }
        }

        let summary = summarize_results(&episodes);
        info!(
            episodes = summary.num_episodes,
            avg_reward = summary.avg_reward,
            avg_pnl = summary.avg_pnl,
            profit_factor = summary.profit_factor,
            %stop_reason,
            "training finished"
        );
        Ok(TrainingReport {
            run_id: self.run_id,
            episodes,
            metrics,
            summary,
            stop_reason,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Save the current model if checkpointing is enabled
    pub fn checkpoint(&self, episodes: usize) -> Result<()> {
        if let Some(checkpointer) = &self.checkpointer {
            let model = self.trainer.model();
            let metadata = CheckpointMetadata::new(self.run_id, episodes, model);
            checkpointer.save(model, &metadata, &episode_name("ppo", episodes))?;
        }
        Ok(())
    }
}
