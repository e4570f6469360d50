//! Experience Buffer
//!
//! On-policy rollout storage for PPO. Created per rollout, filled step by
//! step, given advantages and returns once, then cleared after the update.

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::rl::algorithms::ppo::{compute_gae, normalize_advantages};
use crate::rl::core::action::RawAction;
use crate::rl::networks::LogProbs;

/// One environment step as seen by the policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    /// Feature window the action was chosen from
    pub observation: Vec<Vec<f64>>,
    /// Action as sampled, before the size sigmoid
    pub action: RawAction,
    pub reward: f64,
    /// Critic estimate at `observation`
    pub value: f64,
    pub log_probs: LogProbs,
    /// Episode ended (or was truncated) after this step
    pub done: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExperienceBuffer {
    experiences: Vec<Experience>,
    advantages: Vec<f64>,
    returns: Vec<f64>,
}

impl ExperienceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            experiences: Vec::with_capacity(capacity),
            advantages: Vec::new(),
            returns: Vec::new(),
        }
    }

    /// Add an experience; invalidates previously computed advantages
    pub fn push(&mut self, experience: Experience) {
        self.experiences.push(experience);
        self.advantages.clear();
        self.returns.clear();
    }

    /// Append another rollout
    pub fn extend(&mut self, other: ExperienceBuffer) {
        self.experiences.extend(other.experiences);
        self.advantages.clear();
        self.returns.clear();
    }

    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }

    pub fn experiences(&self) -> &[Experience] {
        &self.experiences
    }

    pub fn get(&self, index: usize) -> Option<&Experience> {
        self.experiences.get(index)
    }

    /// Normalized advantages; empty until `compute_advantages` runs
    pub fn advantages(&self) -> &[f64] {
        &self.advantages
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    pub fn has_advantages(&self) -> bool {
        !self.experiences.is_empty() && self.advantages.len() == self.experiences.len()
    }

    pub fn total_reward(&self) -> f64 {
        self.experiences.iter().map(|e| e.reward).sum()
    }

    /// GAE over the whole buffer, then normalize the advantages.
    ///
    /// `last_value` bootstraps the final step when it is not terminal.
    pub fn compute_advantages(&mut self, gamma: f64, gae_lambda: f64, last_value: f64) {
        let rewards: Vec<f64> = self.experiences.iter().map(|e| e.reward).collect();
        let values: Vec<f64> = self.experiences.iter().map(|e| e.value).collect();
        let dones: Vec<bool> = self.experiences.iter().map(|e| e.done).collect();

        let (mut advantages, returns) =
            compute_gae(&rewards, &values, &dones, last_value, gamma, gae_lambda);
        normalize_advantages(&mut advantages);
        self.advantages = advantages;
        self.returns = returns;
    }

    /// Shuffled index mini-batches covering the buffer once
    pub fn minibatch_indices<R: RngCore + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.experiences.len()).collect();
        indices.shuffle(rng);
        indices
            .chunks(batch_size.max(1))
            .map(<[usize]>::to_vec)
            .collect()
    }

    pub fn clear(&mut self) {
        self.experiences.clear();
        self.advantages.clear();
        self.returns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::core::action::Direction;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn experience(reward: f64, value: f64, done: bool) -> Experience {
        Experience {
            observation: vec![vec![0.0; 3]; 2],
            action: RawAction {
                direction: Direction::Hold,
                tp_offset: 0.0,
                sl_tight: 1.0,
                size_raw: 0.0,
            },
            reward,
            value,
            log_probs: LogProbs::default(),
            done,
        }
    }

    #[test]
    fn test_advantages_are_normalized() {
        let mut buffer = ExperienceBuffer::new();
        for i in 0..10 {
            buffer.push(experience(i as f64 * 0.3 - 1.0, 0.5, i == 9));
        }
        buffer.compute_advantages(0.99, 0.95, 0.0);
        assert!(buffer.has_advantages());

        let n = buffer.len() as f64;
        let mean = buffer.advantages().iter().sum::<f64>() / n;
        let var = buffer.advantages().iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9);
        assert!((var.sqrt() - 1.0).abs() < 1e-6);
        assert_eq!(buffer.returns().len(), 10);
    }

    #[test]
    fn test_push_invalidates_advantages() {
        let mut buffer = ExperienceBuffer::new();
        buffer.push(experience(1.0, 0.5, true));
        buffer.compute_advantages(0.99, 0.95, 0.0);
        assert!(buffer.has_advantages());
        buffer.push(experience(1.0, 0.5, true));
        assert!(!buffer.has_advantages());
    }

    #[test]
    fn test_minibatches_cover_every_index() {
        let mut buffer = ExperienceBuffer::new();
        for _ in 0..10 {
            buffer.push(experience(0.0, 0.0, false));
        }
        let mut rng = StdRng::seed_from_u64(5);
        let batches = buffer.minibatch_indices(4, &mut rng);
        assert_eq!(batches.len(), 3);
        let mut all: Vec<usize> = batches.concat();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }
}
