//! Proximal Policy Optimization (PPO)
//!
//! Clipped-surrogate PPO with Generalized Advantage Estimation (GAE).
//! Gradients come from central finite differences over parameter groups and
//! are applied with Adam. The trainer owns the live model exclusively.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::adam::Adam;
use super::gradients::GradientEstimator;
use crate::error::{EngineError, Result};
use crate::rl::config::{GradientConfig, PPOConfig};
use crate::rl::memory::{Experience, ExperienceBuffer};
use crate::rl::networks::{
    heads_from_hidden, lstm_forward, policy_heads, ParamGroup, ParamSource, PolicyOutput,
    RecurrentPolicyValueModel,
};

/// Numerical floor for advantage normalization
pub const ADVANTAGE_EPSILON: f64 = 1e-8;

/// Log-ratio clamp before exponentiation
const MAX_LOG_RATIO: f64 = 20.0;

/// Compute Generalized Advantage Estimation (GAE).
///
/// Backward scan; a `done` step neither bootstraps from the next value nor
/// carries the running advantage across. Returns raw (unnormalized)
/// advantages and `advantage + value` returns.
pub fn compute_gae(
    rewards: &[f64],
    values: &[f64],
    dones: &[bool],
    last_value: f64,
    gamma: f64,
    gae_lambda: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = rewards.len().min(values.len()).min(dones.len());
    let mut advantages = vec![0.0; n];
    let mut returns = vec![0.0; n];

    let mut gae = 0.0;
    let mut next_value = last_value;
    for t in (0..n).rev() {
        let mask = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_value * mask - values[t];
        gae = delta + gamma * gae_lambda * mask * gae;

        advantages[t] = gae;
        returns[t] = gae + values[t];
        next_value = values[t];
    }
    (advantages, returns)
}

/// Shift to zero mean and scale to unit standard deviation
pub fn normalize_advantages(advantages: &mut [f64]) {
    let n = advantages.len();
    if n == 0 {
        return;
    }
    let mean = advantages.iter().sum::<f64>() / n as f64;
    let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n as f64;
    let std = var.sqrt();
    for a in advantages.iter_mut() {
        *a = (*a - mean) / (std + ADVANTAGE_EPSILON);
    }
}

/// `1 - Var(returns - values) / Var(returns)`; 0 when returns are constant
pub fn explained_variance(values: &[f64], returns: &[f64]) -> f64 {
    let n = values.len().min(returns.len());
    if n == 0 {
        return 0.0;
    }
    fn variance(xs: &[f64]) -> f64 {
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64
    }
    let var_returns = variance(&returns[..n]);
    if var_returns <= f64::EPSILON {
        return 0.0;
    }
    let residuals: Vec<f64> = returns.iter().zip(values).map(|(r, v)| r - v).collect();
    let var_residual = variance(&residuals);
    1.0 - var_residual / var_returns
}

/// Aggregated update diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub actor_loss: f64,
    pub critic_loss: f64,
    /// Entropy proxy: negative mean joint log-probability
    pub entropy: f64,
    pub total_loss: f64,
    /// Approximate KL between the rollout policy and the current one
    pub kl_divergence: f64,
    pub explained_variance: f64,
    /// Mean pre-clip global gradient norm
    pub grad_norm: f64,
    /// Optimizer steps taken
    pub updates: usize,
    /// Experiences consumed
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct LossBreakdown {
    actor: f64,
    critic: f64,
    entropy: f64,
    kl: f64,
    total: f64,
}

/// One mini-batch with its targets
struct MiniBatch<'a> {
    experiences: Vec<&'a Experience>,
    advantages: Vec<f64>,
    returns: Vec<f64>,
}

impl MiniBatch<'_> {
    fn len(&self) -> usize {
        self.experiences.len()
    }
}

/// PPO loss over a mini-batch under `params`.
///
/// `hidden` holds cached LSTM outputs for when the LSTM group is fixed.
fn batch_loss<P: ParamSource + ?Sized>(
    params: &P,
    hidden_size: usize,
    batch: &MiniBatch<'_>,
    hidden: Option<&[Vec<f64>]>,
    config: &PPOConfig,
) -> LossBreakdown {
    let n = batch.len();
    if n == 0 {
        return LossBreakdown::default();
    }
    let mut sum = LossBreakdown::default();
    for (k, exp) in batch.experiences.iter().enumerate() {
        let heads = match hidden {
            Some(cache) => heads_from_hidden(params, &cache[k]),
            None => match policy_heads(params, hidden_size, &exp.observation) {
                Ok(heads) => heads,
                Err(_) => {
                    return LossBreakdown {
                        total: f64::NAN,
                        ..Default::default()
                    }
                }
            },
        };
        let new = heads.log_probs(&exp.action);
        let log_ratio = new.mean_delta(&exp.log_probs).clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO);
        let ratio = log_ratio.exp();
        let advantage = batch.advantages[k];
        let clipped = ratio.clamp(1.0 - config.clip_epsilon, 1.0 + config.clip_epsilon);

        sum.actor -= (ratio * advantage).min(clipped * advantage);
        sum.critic += (heads.value - batch.returns[k]).powi(2);
        sum.entropy -= new.total();
        sum.kl += exp.log_probs.total() - new.total();
    }

    let n = n as f64;
    let actor = sum.actor / n;
    let critic = sum.critic / n;
    let entropy = sum.entropy / n;
    LossBreakdown {
        actor,
        critic,
        entropy,
        kl: sum.kl / n,
        total: actor + config.value_loss_coef * critic - config.entropy_coef * entropy,
    }
}

/// PPO trainer: owns the live model, the optimizer state and the worker pool
pub struct PPOTrainer {
    config: PPOConfig,
    model: RecurrentPolicyValueModel,
    optimizer: Adam,
    gradients: GradientEstimator,
    rng: Box<dyn RngCore + Send>,
}

impl PPOTrainer {
    /// Create a new PPO trainer
    pub fn new(
        config: PPOConfig,
        gradient: GradientConfig,
        model: RecurrentPolicyValueModel,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Self> {
        config.validate()?;
        model.validate()?;
        Ok(Self {
            optimizer: Adam::new(config.learning_rate, config.max_grad_norm),
            gradients: GradientEstimator::new(gradient)?,
            config,
            model,
            rng,
        })
    }

    pub fn config(&self) -> &PPOConfig {
        &self.config
    }

    pub fn model(&self) -> &RecurrentPolicyValueModel {
        &self.model
    }

    pub fn into_model(self) -> RecurrentPolicyValueModel {
        self.model
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn gradient_estimator(&self) -> &GradientEstimator {
        &self.gradients
    }

    /// Sample (or pick deterministically) an action with the trainer's rng
    pub fn act(&mut self, observation: &[Vec<f64>], deterministic: bool) -> Result<PolicyOutput> {
        self.model.forward_pass(observation, deterministic, &mut self.rng)
    }

    /// GAE with this trainer's gamma and lambda
    pub fn compute_gae(
        &self,
        rewards: &[f64],
        values: &[f64],
        dones: &[bool],
        last_value: f64,
    ) -> (Vec<f64>, Vec<f64>) {
        compute_gae(
            rewards,
            values,
            dones,
            last_value,
            self.config.gamma,
            self.config.gae_lambda,
        )
    }

    /// Run `ppo_epochs` passes of shuffled mini-batch updates over the buffer,
    /// then clear it.
    ///
    /// Advantages are computed first if the buffer has none, bootstrapping
    /// from zero after the last step.
    pub fn update_model(&mut self, buffer: &mut ExperienceBuffer) -> Result<TrainingMetrics> {
        if buffer.is_empty() {
            return Err(EngineError::EmptyBuffer);
        }
        self.check_shapes(buffer)?;
        if !buffer.has_advantages() {
            buffer.compute_advantages(self.config.gamma, self.config.gae_lambda, 0.0);
        }

        let hidden_size = self.model.hidden_size;
        let mut totals = LossBreakdown::default();
        let mut grad_norm_sum = 0.0;
        let mut updates = 0usize;

        for epoch in 0..self.config.ppo_epochs {
            let batches = buffer.minibatch_indices(self.config.batch_size, &mut self.rng);
            for indices in batches {
                let batch = MiniBatch {
                    experiences: indices.iter().map(|&i| &buffer.experiences()[i]).collect(),
                    advantages: indices.iter().map(|&i| buffer.advantages()[i]).collect(),
                    returns: indices.iter().map(|&i| buffer.returns()[i]).collect(),
                };

                let hidden = batch
                    .experiences
                    .iter()
                    .map(|e| lstm_forward(self.model.group(ParamGroup::Lstm), hidden_size, &e.observation))
                    .collect::<Result<Vec<_>>>()?;

                let current = batch_loss(&self.model, hidden_size, &batch, Some(&hidden), &self.config);
                totals.actor += current.actor;
                totals.critic += current.critic;
                totals.entropy += current.entropy;
                totals.kl += current.kl;
                totals.total += current.total;

                let config = &self.config;
                let mut grads = self.gradients.estimate(
                    &self.model,
                    |params, group| {
                        let cache = (group != ParamGroup::Lstm).then_some(hidden.as_slice());
                        batch_loss(params, hidden_size, &batch, cache, config).total
                    },
                    self.optimizer.timestep(),
                );
                grad_norm_sum += self.optimizer.step(&mut self.model, &mut grads);
                updates += 1;
            }
            debug!(epoch, updates, "ppo epoch complete");
        }

        let values = buffer
            .experiences()
            .iter()
            .map(|e| self.model.heads(&e.observation).map(|h| h.value))
            .collect::<Result<Vec<_>>>()?;

        let n = updates.max(1) as f64;
        let metrics = TrainingMetrics {
            actor_loss: totals.actor / n,
            critic_loss: totals.critic / n,
            entropy: totals.entropy / n,
            total_loss: totals.total / n,
            kl_divergence: totals.kl / n,
            explained_variance: explained_variance(&values, buffer.returns()),
            grad_norm: grad_norm_sum / n,
            updates,
            samples: buffer.len(),
        };
        info!(
            samples = metrics.samples,
            updates = metrics.updates,
            actor_loss = metrics.actor_loss,
            critic_loss = metrics.critic_loss,
            kl = metrics.kl_divergence,
            explained_variance = metrics.explained_variance,
            "ppo update complete"
        );

        buffer.clear();
        Ok(metrics)
    }

    fn check_shapes(&self, buffer: &ExperienceBuffer) -> Result<()> {
        for exp in buffer.experiences() {
            if exp.observation.len() != self.model.sequence_length {
                return Err(EngineError::ShapeMismatch {
                    what: "experience window length".into(),
                    expected: self.model.sequence_length,
                    actual: exp.observation.len(),
                });
            }
            if let Some(row) = exp.observation.iter().find(|r| r.len() != self.model.feature_size) {
                return Err(EngineError::ShapeMismatch {
                    what: "experience row width".into(),
                    expected: self.model.feature_size,
                    actual: row.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::config::ModelConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn trainer(seed: u64) -> PPOTrainer {
        let mut rng = StdRng::seed_from_u64(seed);
        let model = RecurrentPolicyValueModel::new(
            &ModelConfig {
                feature_size: 4,
                hidden_size: 3,
                sequence_length: 3,
            },
            &mut rng,
        )
        .unwrap();
        let ppo = PPOConfig {
            batch_size: 8,
            ppo_epochs: 2,
            learning_rate: 1e-2,
            ..PPOConfig::default()
        };
        let gradient = GradientConfig {
            workers: 2,
            ..GradientConfig::default()
        };
        PPOTrainer::new(ppo, gradient, model, Box::new(StdRng::seed_from_u64(seed + 1))).unwrap()
    }

    fn rollout(trainer: &mut PPOTrainer, steps: usize) -> ExperienceBuffer {
        let mut rng = StdRng::seed_from_u64(77);
        let mut buffer = ExperienceBuffer::new();
        for t in 0..steps {
            let obs: Vec<Vec<f64>> = (0..3)
                .map(|_| (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect())
                .collect();
            let out = trainer.act(&obs, false).unwrap();
            buffer.push(Experience {
                observation: obs,
                action: out.raw,
                reward: rng.gen_range(-1.0..1.0),
                value: out.value,
                log_probs: out.log_probs,
                done: t + 1 == steps,
            });
        }
        buffer
    }

    #[test]
    fn test_single_step_gae() {
        let (adv, ret) = compute_gae(&[1.0], &[0.5], &[true], 0.0, 0.99, 0.95);
        assert!((adv[0] - 0.5).abs() < 1e-12);
        assert!((ret[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gae_respects_episode_boundaries() {
        let rewards = [1.0, 0.0, 1.0];
        let values = [0.0, 0.0, 0.0];
        let dones = [true, false, true];
        let (adv, _) = compute_gae(&rewards, &values, &dones, 10.0, 0.9, 1.0);
        assert!((adv[0] - 1.0).abs() < 1e-12);
        assert!((adv[1] - 0.9).abs() < 1e-12);
        assert!((adv[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_advantages() {
        let mut adv = vec![1.0, 2.0, 3.0, 4.0];
        normalize_advantages(&mut adv);
        let mean = adv.iter().sum::<f64>() / 4.0;
        let std = (adv.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / 4.0).sqrt();
        assert!(mean.abs() < 1e-12);
        assert!((std - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_explained_variance() {
        assert!((explained_variance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(explained_variance(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        let mut trainer = trainer(1);
        let err = trainer.update_model(&mut ExperienceBuffer::new()).unwrap_err();
        assert!(matches!(err, EngineError::EmptyBuffer));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_update_changes_actor_and_critic() {
        let mut trainer = trainer(2);
        let before = trainer.model().clone();
        let mut buffer = rollout(&mut trainer, 20);

        let metrics = trainer.update_model(&mut buffer).unwrap();
        assert!(buffer.is_empty());
        // 20 samples in batches of 8 -> 3 per epoch
        assert_eq!(metrics.updates, 6);
        assert_eq!(metrics.samples, 20);
        assert_eq!(trainer.optimizer().timestep(), 6);
        assert!(metrics.actor_loss.is_finite());
        assert!(metrics.critic_loss >= 0.0);
        assert!(metrics.grad_norm > 0.0);

        let after = trainer.model();
        assert_ne!(before.group(ParamGroup::Critic), after.group(ParamGroup::Critic));
        assert_ne!(
            before.group(ParamGroup::ActorDirection),
            after.group(ParamGroup::ActorDirection)
        );
        assert_eq!(before.group(ParamGroup::Lstm), after.group(ParamGroup::Lstm));
    }

    #[test]
    fn test_update_rejects_wrong_window() {
        let mut trainer = trainer(3);
        let mut buffer = rollout(&mut trainer, 4);
        let mut bad = buffer.experiences()[0].clone();
        bad.observation.pop();
        buffer.push(bad);
        assert!(trainer.update_model(&mut buffer).unwrap_err().is_validation());
    }
}
