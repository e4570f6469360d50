//! Recurrent Policy-Value Model
//!
//! One LSTM layer over the observation window feeding seven actor heads
//! (direction logits plus mean and log-std for each continuous parameter)
//! and a linear critic.

use std::path::Path;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::linear::Linear;
use super::lstm::lstm_forward;
use super::params::{ParamGroup, ParamSource};
use crate::error::{EngineError, Result};
use crate::rl::config::ModelConfig;
use crate::rl::core::action::{
    Direction, HybridAction, RawAction, NUM_DIRECTIONS, SL_TIGHT_RANGE, TP_OFFSET_RANGE,
};
use crate::rl::risk::{mask_actor_logits, ActionMask};

/// Log-std heads are clamped into this range before exponentiation
pub const LOG_STD_MIN: f64 = -5.0;
pub const LOG_STD_MAX: f64 = 2.0;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Sample from a standard normal (Box-Muller transform)
pub fn sample_normal<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Log-softmax; `-inf` logits stay `-inf`
pub fn log_softmax(logits: &[f64; NUM_DIRECTIONS]) -> [f64; NUM_DIRECTIONS] {
    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = logits.iter().map(|l| (l - max).exp()).sum();
    let log_sum = sum.ln() + max;
    logits.map(|l| l - log_sum)
}

/// Diagonal Gaussian head output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    pub mean: f64,
    pub log_std: f64,
}

impl Gaussian {
    pub fn std(&self) -> f64 {
        self.log_std.exp()
    }

    pub fn log_prob(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.std();
        -0.5 * z * z - self.log_std - LN_SQRT_2PI
    }

    pub fn sample<R: RngCore + ?Sized>(&self, rng: &mut R) -> f64 {
        self.mean + self.std() * sample_normal(rng)
    }
}

/// Per-component log-probabilities of one action
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LogProbs {
    pub direction: f64,
    pub tp_offset: f64,
    pub sl_tight: f64,
    pub size: f64,
}

impl LogProbs {
    pub fn components(&self) -> [f64; 4] {
        [self.direction, self.tp_offset, self.sl_tight, self.size]
    }

    pub fn total(&self) -> f64 {
        self.components().iter().sum()
    }

    /// Mean of the component-wise differences `self - old`
    pub fn mean_delta(&self, old: &LogProbs) -> f64 {
        let new = self.components();
        let old = old.components();
        new.iter().zip(old.iter()).map(|(n, o)| n - o).sum::<f64>() / 4.0
    }
}

/// Raw outputs of every head for one window
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyHeads {
    pub logits: [f64; NUM_DIRECTIONS],
    pub tp_offset: Gaussian,
    pub sl_tight: Gaussian,
    /// Pre-sigmoid size distribution
    pub size: Gaussian,
    pub value: f64,
}

impl PolicyHeads {
    /// Block directions the mask disallows; HOLD always stays selectable
    pub fn apply_mask(&mut self, mask: &ActionMask) {
        mask_actor_logits(&mut self.logits, mask);
    }

    pub fn direction_probs(&self) -> [f64; NUM_DIRECTIONS] {
        log_softmax(&self.logits).map(f64::exp)
    }

    /// Pick an action. Deterministic mode never touches `rng`.
    pub fn select<R: RngCore + ?Sized>(&self, deterministic: bool, rng: &mut R) -> RawAction {
        let (direction, tp, sl, size_raw) = if deterministic {
            (
                self.argmax_direction(),
                self.tp_offset.mean,
                self.sl_tight.mean,
                self.size.mean,
            )
        } else {
            (
                self.sample_direction(rng),
                self.tp_offset.sample(rng),
                self.sl_tight.sample(rng),
                self.size.sample(rng),
            )
        };
        RawAction {
            direction,
            tp_offset: tp.clamp(TP_OFFSET_RANGE.0, TP_OFFSET_RANGE.1),
            sl_tight: sl.clamp(SL_TIGHT_RANGE.0, SL_TIGHT_RANGE.1),
            size_raw,
        }
    }

    /// Log-probabilities of a stored action under these heads
    pub fn log_probs(&self, action: &RawAction) -> LogProbs {
        LogProbs {
            direction: log_softmax(&self.logits)[action.direction.to_index()],
            tp_offset: self.tp_offset.log_prob(action.tp_offset),
            sl_tight: self.sl_tight.log_prob(action.sl_tight),
            size: self.size.log_prob(action.size_raw),
        }
    }

    fn argmax_direction(&self) -> Direction {
        let mut best = 0;
        for (i, l) in self.logits.iter().enumerate() {
            if *l > self.logits[best] {
                best = i;
            }
        }
        Direction::from_index(best).unwrap_or(Direction::Hold)
    }

    fn sample_direction<R: RngCore + ?Sized>(&self, rng: &mut R) -> Direction {
        let probs = self.direction_probs();
        let u: f64 = rng.gen();
        let mut acc = 0.0;
        for (i, p) in probs.iter().enumerate() {
            acc += p;
            if u < acc && *p > 0.0 {
                return Direction::from_index(i).unwrap_or(Direction::Hold);
            }
        }
        // rounding left u above the cumulative sum: take the last allowed
        probs
            .iter()
            .rposition(|p| *p > 0.0)
            .and_then(Direction::from_index)
            .unwrap_or(Direction::Hold)
    }
}

/// Forward pass output
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    pub action: HybridAction,
    /// What the buffer stores for re-evaluation
    pub raw: RawAction,
    pub value: f64,
    pub log_probs: LogProbs,
}

/// Log-probabilities and value of a stored action
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub log_probs: LogProbs,
    pub value: f64,
}

/// Evaluate every head on a window under any parameter source
pub fn policy_heads<P: ParamSource + ?Sized>(
    params: &P,
    hidden_size: usize,
    sequence: &[Vec<f64>],
) -> Result<PolicyHeads> {
    let hidden = lstm_forward(params.group(ParamGroup::Lstm), hidden_size, sequence)?;
    Ok(heads_from_hidden(params, &hidden))
}

/// Evaluate the actor and critic heads on a precomputed LSTM output
pub fn heads_from_hidden<P: ParamSource + ?Sized>(params: &P, hidden: &[f64]) -> PolicyHeads {
    let scalar = |group: ParamGroup| params.group(group).forward(hidden)[0];
    let log_std = |group: ParamGroup| scalar(group).clamp(LOG_STD_MIN, LOG_STD_MAX);

    let direction = params.group(ParamGroup::ActorDirection).forward(hidden);
    let mut logits = [0.0; NUM_DIRECTIONS];
    logits.copy_from_slice(&direction[..NUM_DIRECTIONS]);

    let mut value = scalar(ParamGroup::Critic);
    if !value.is_finite() {
        warn!(value, "non-finite critic output, replacing with 0");
        value = 0.0;
    }

    PolicyHeads {
        logits,
        tp_offset: Gaussian {
            mean: scalar(ParamGroup::ActorTpMean),
            log_std: log_std(ParamGroup::ActorTpLogStd),
        },
        sl_tight: Gaussian {
            mean: scalar(ParamGroup::ActorSlMean),
            log_std: log_std(ParamGroup::ActorSlLogStd),
        },
        size: Gaussian {
            mean: scalar(ParamGroup::ActorSizeMean),
            log_std: log_std(ParamGroup::ActorSizeLogStd),
        },
        value,
    }
}

/// Re-evaluate a stored action under any parameter source
pub fn evaluate_action<P: ParamSource + ?Sized>(
    params: &P,
    hidden_size: usize,
    sequence: &[Vec<f64>],
    action: &RawAction,
) -> Result<Evaluation> {
    let heads = policy_heads(params, hidden_size, sequence)?;
    Ok(Evaluation {
        log_probs: heads.log_probs(action),
        value: heads.value,
    })
}

/// LSTM actor-critic with JSON-serializable weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentPolicyValueModel {
    pub feature_size: usize,
    pub hidden_size: usize,
    pub sequence_length: usize,
    lstm: Linear,
    actor_direction: Linear,
    actor_tp_mean: Linear,
    actor_tp_log_std: Linear,
    actor_sl_mean: Linear,
    actor_sl_log_std: Linear,
    actor_size_mean: Linear,
    actor_size_log_std: Linear,
    critic: Linear,
}

impl RecurrentPolicyValueModel {
    /// Create a freshly initialized model
    pub fn new<R: RngCore + ?Sized>(config: &ModelConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let (f, h) = (config.feature_size, config.hidden_size);
        let head = |rng: &mut R, bias: f64| Linear::uniform(1, h, 0.01, rng).with_bias(bias);

        let mut lstm = Linear::xavier(4 * h, f + h, rng);
        // forget gate starts open
        lstm.bias[..h].iter_mut().for_each(|b| *b = 1.0);

        Ok(Self {
            feature_size: f,
            hidden_size: h,
            sequence_length: config.sequence_length,
            lstm,
            actor_direction: Linear::uniform(NUM_DIRECTIONS, h, 0.01, rng),
            actor_tp_mean: head(&mut *rng, 0.0),
            actor_tp_log_std: head(&mut *rng, -1.5),
            actor_sl_mean: head(&mut *rng, 1.0),
            actor_sl_log_std: head(&mut *rng, -1.0),
            actor_size_mean: head(&mut *rng, 0.0),
            actor_size_log_std: head(&mut *rng, -0.5),
            critic: Linear::uniform(1, h, 0.01, rng),
        })
    }

    pub fn config(&self) -> ModelConfig {
        ModelConfig {
            feature_size: self.feature_size,
            hidden_size: self.hidden_size,
            sequence_length: self.sequence_length,
        }
    }

    pub fn group_mut(&mut self, group: ParamGroup) -> &mut Linear {
        match group {
            ParamGroup::Lstm => &mut self.lstm,
            ParamGroup::ActorDirection => &mut self.actor_direction,
            ParamGroup::ActorTpMean => &mut self.actor_tp_mean,
            ParamGroup::ActorTpLogStd => &mut self.actor_tp_log_std,
            ParamGroup::ActorSlMean => &mut self.actor_sl_mean,
            ParamGroup::ActorSlLogStd => &mut self.actor_sl_log_std,
            ParamGroup::ActorSizeMean => &mut self.actor_size_mean,
            ParamGroup::ActorSizeLogStd => &mut self.actor_size_log_std,
            ParamGroup::Critic => &mut self.critic,
        }
    }

    pub fn param_count(&self) -> usize {
        ParamGroup::ALL.iter().map(|g| self.group(*g).param_count()).sum()
    }

    /// All heads for one window
    pub fn heads(&self, sequence: &[Vec<f64>]) -> Result<PolicyHeads> {
        self.check_sequence(sequence)?;
        policy_heads(self, self.hidden_size, sequence)
    }

    /// Run the policy on one window.
    ///
    /// Deterministic mode takes the argmax direction and Gaussian means and is
    /// a pure function of the weights and the window.
    pub fn forward_pass<R: RngCore + ?Sized>(
        &self,
        sequence: &[Vec<f64>],
        deterministic: bool,
        rng: &mut R,
    ) -> Result<PolicyOutput> {
        let heads = self.heads(sequence)?;
        Ok(Self::output(&heads, deterministic, rng))
    }

    /// Deterministic forward pass without a random source
    pub fn act_deterministic(&self, sequence: &[Vec<f64>]) -> Result<PolicyOutput> {
        let heads = self.heads(sequence)?;
        Ok(Self::deterministic_output(&heads))
    }

    /// Argmax direction and Gaussian means of already computed heads
    pub fn deterministic_output(heads: &PolicyHeads) -> PolicyOutput {
        Self::output(heads, true, &mut rand::rngs::mock::StepRng::new(0, 0))
    }

    pub fn output<R: RngCore + ?Sized>(heads: &PolicyHeads, deterministic: bool, rng: &mut R) -> PolicyOutput {
        let raw = heads.select(deterministic, rng);
        PolicyOutput {
            action: raw.to_hybrid(),
            raw,
            value: heads.value,
            log_probs: heads.log_probs(&raw),
        }
    }

    /// Log-probabilities and value of a stored action
    pub fn evaluate(&self, sequence: &[Vec<f64>], action: &RawAction) -> Result<Evaluation> {
        self.check_sequence(sequence)?;
        evaluate_action(self, self.hidden_size, sequence, action)
    }

    fn check_sequence(&self, sequence: &[Vec<f64>]) -> Result<()> {
        if sequence.len() != self.sequence_length {
            return Err(EngineError::ShapeMismatch {
                what: "sequence length".into(),
                expected: self.sequence_length,
                actual: sequence.len(),
            });
        }
        Ok(())
    }

    /// Check every group's shape and that all weights are finite
    pub fn validate(&self) -> Result<()> {
        for group in ParamGroup::ALL {
            let (rows, cols) = group.shape(self.feature_size, self.hidden_size);
            let layer = self.group(group);
            layer.check_shape(group.name(), rows, cols)?;
            if !layer.is_finite() {
                return Err(EngineError::Validation(format!(
                    "non-finite weights in {group}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl ParamSource for RecurrentPolicyValueModel {
    fn group(&self, group: ParamGroup) -> &Linear {
        match group {
            ParamGroup::Lstm => &self.lstm,
            ParamGroup::ActorDirection => &self.actor_direction,
            ParamGroup::ActorTpMean => &self.actor_tp_mean,
            ParamGroup::ActorTpLogStd => &self.actor_tp_log_std,
            ParamGroup::ActorSlMean => &self.actor_sl_mean,
            ParamGroup::ActorSlLogStd => &self.actor_sl_log_std,
            ParamGroup::ActorSizeMean => &self.actor_size_mean,
            ParamGroup::ActorSizeLogStd => &self.actor_size_log_std,
            ParamGroup::Critic => &self.critic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::risk::MaskReason;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> ModelConfig {
        ModelConfig {
            feature_size: 4,
            hidden_size: 6,
            sequence_length: 5,
        }
    }

    fn window(rng: &mut StdRng) -> Vec<Vec<f64>> {
        (0..5)
            .map(|_| (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_deterministic_forward_is_pure() {
        let mut rng = StdRng::seed_from_u64(11);
        let model = RecurrentPolicyValueModel::new(&small_config(), &mut rng).unwrap();
        let seq = window(&mut rng);

        let a = model.forward_pass(&seq, true, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = model.forward_pass(&seq, true, &mut StdRng::seed_from_u64(999)).unwrap();
        let c = model.act_deterministic(&seq).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.value.to_bits(), c.value.to_bits());
    }

    #[test]
    fn test_sampled_log_probs_match_evaluation() {
        let mut rng = StdRng::seed_from_u64(12);
        let model = RecurrentPolicyValueModel::new(&small_config(), &mut rng).unwrap();
        let seq = window(&mut rng);
        for _ in 0..10 {
            let out = model.forward_pass(&seq, false, &mut rng).unwrap();
            let eval = model.evaluate(&seq, &out.raw).unwrap();
            assert_eq!(out.log_probs, eval.log_probs);
            assert!((-0.5..=0.5).contains(&out.action.tp_offset));
            assert!((0.5..=2.0).contains(&out.action.sl_tight));
            assert!((0.0..=1.0).contains(&out.action.size));
        }
    }

    #[test]
    fn test_masked_heads_never_pick_blocked_direction() {
        let mut rng = StdRng::seed_from_u64(13);
        let model = RecurrentPolicyValueModel::new(&small_config(), &mut rng).unwrap();
        let seq = window(&mut rng);
        let mask = ActionMask {
            can_trade_long: false,
            can_trade_short: false,
            long_confluence: 0.0,
            short_confluence: 0.0,
            reason: MaskReason::ExtremeVolatility,
        };
        let mut heads = model.heads(&seq).unwrap();
        heads.apply_mask(&mask);
        for _ in 0..20 {
            let out = RecurrentPolicyValueModel::output(&heads, false, &mut rng);
            assert_eq!(out.action.direction, Direction::Hold);
            assert!(out.log_probs.direction.abs() < 1e-12);
        }
    }

    #[test]
    fn test_json_round_trip() {
        let mut rng = StdRng::seed_from_u64(14);
        let model = RecurrentPolicyValueModel::new(&small_config(), &mut rng).unwrap();
        let json = model.to_json().unwrap();
        let restored = RecurrentPolicyValueModel::from_json(&json).unwrap();
        assert_eq!(restored, model);
        assert_eq!(restored.to_json().unwrap(), json);
    }

    #[test]
    fn test_from_json_rejects_bad_shapes() {
        let mut rng = StdRng::seed_from_u64(15);
        let mut model = RecurrentPolicyValueModel::new(&small_config(), &mut rng).unwrap();
        model.critic.weights.pop();
        let json = model.to_json().unwrap();
        let err = RecurrentPolicyValueModel::from_json(&json).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_wrong_window_length() {
        let mut rng = StdRng::seed_from_u64(16);
        let model = RecurrentPolicyValueModel::new(&small_config(), &mut rng).unwrap();
        let seq = vec![vec![0.0; 4]; 3];
        assert!(model.act_deterministic(&seq).is_err());
    }

    #[test]
    fn test_log_softmax_with_blocked_logits() {
        let lp = log_softmax(&[0.0, f64::NEG_INFINITY, f64::NEG_INFINITY]);
        assert_eq!(lp[0], 0.0);
        assert_eq!(lp[1], f64::NEG_INFINITY);
    }
}
