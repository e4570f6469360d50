//! Inference
//!
//! Turns a trained model into trading decisions. Disallowed directions are
//! removed from the softmax before the argmax, so the policy never proposes
//! a masked trade; blocked conditions come back as HOLD with a reason.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::rl::core::action::{Direction, HybridAction, NUM_DIRECTIONS};
use crate::rl::features::{build_window, AccountSnapshot, MarketFeatures, TpSlSuggestion, MIN_HISTORY};
use crate::rl::networks::RecurrentPolicyValueModel;
use crate::rl::risk::{ActionMask, ActionMasker, MaskReason};

/// One trading decision with its explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub bar: usize,
    pub action: HybridAction,
    /// "ok" when trading, otherwise why the engine holds
    pub reason: String,
    /// Critic estimate
    pub value: f64,
    /// Direction probabilities after masking (hold, long, short)
    pub probabilities: [f64; NUM_DIRECTIONS],
    pub mask: ActionMask,
    /// Scored structural TP/SL candidates, trades only
    pub suggestion: Option<TpSlSuggestion>,
}

impl Decision {
    pub fn is_trade(&self) -> bool {
        self.action.direction.is_trade()
    }
}

/// Deterministic decision engine around a trained model
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    model: RecurrentPolicyValueModel,
    masker: ActionMasker,
}

impl InferenceEngine {
    pub fn new(model: RecurrentPolicyValueModel, confluence_threshold: f64) -> Result<Self> {
        model.validate()?;
        if model.feature_size != crate::rl::features::OBSERVATION_SIZE {
            return Err(EngineError::ShapeMismatch {
                what: "model feature size".into(),
                expected: crate::rl::features::OBSERVATION_SIZE,
                actual: model.feature_size,
            });
        }
        Ok(Self {
            model,
            masker: ActionMasker::new(confluence_threshold),
        })
    }

    pub fn model(&self) -> &RecurrentPolicyValueModel {
        &self.model
    }

    /// Decide at `bar` for a flat account
    pub fn decide(&self, market: &MarketFeatures, bar: usize) -> Result<Decision> {
        self.decide_with_account(market, bar, &AccountSnapshot::default())
    }

    /// Decide at `bar` given the current account state.
    ///
    /// Masked conditions never error; they return HOLD with the mask reason.
    pub fn decide_with_account(
        &self,
        market: &MarketFeatures,
        bar: usize,
        account: &AccountSnapshot,
    ) -> Result<Decision> {
        let bar = bar.min(market.len().saturating_sub(1));
        let mask = self.masker.compute_mask(market.structure(bar));

        // first bar with real structural features
        if bar + 1 < MIN_HISTORY {
            return Ok(Self::hold(bar, MaskReason::InsufficientData.as_str(), 0.0, mask));
        }

        let window = build_window(market, bar, self.model.sequence_length, account);
        let mut heads = self.model.heads(&window)?;
        heads.apply_mask(&mask);
        let output = RecurrentPolicyValueModel::deterministic_output(&heads);

        let reason = if output.action.direction.is_trade() {
            MaskReason::Ok.as_str()
        } else if mask.reason != MaskReason::Ok {
            mask.reason.as_str()
        } else {
            "policy_hold"
        };
        debug!(bar, direction = %output.action.direction, reason, "decision");

        let (action, suggestion) = if output.action.direction.is_trade() {
            let direction = output.action.direction;
            let suggestion = market.suggest(bar, direction, mask.confluence(direction));
            (output.action, Some(suggestion))
        } else {
            (HybridAction::hold(), None)
        };
        Ok(Decision {
            bar,
            action,
            reason: reason.to_string(),
            value: output.value,
            probabilities: heads.direction_probs(),
            mask,
            suggestion,
        })
    }

    /// Decisions for every bar in `range`
    pub fn decide_range(
        &self,
        market: &MarketFeatures,
        range: std::ops::Range<usize>,
    ) -> Result<Vec<Decision>> {
        range.map(|bar| self.decide(market, bar)).collect()
    }

    fn hold(bar: usize, reason: &str, value: f64, mask: ActionMask) -> Decision {
        let mut probabilities = [0.0; NUM_DIRECTIONS];
        probabilities[Direction::Hold.to_index()] = 1.0;
        Decision {
            bar,
            action: HybridAction::hold(),
            reason: reason.to_string(),
            value,
            probabilities,
            mask,
            suggestion: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::config::ModelConfig;
    use crate::rl::environment::{generate_candles, MarketConfig};
    use crate::rl::features::StructuralFeatures;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn engine() -> InferenceEngine {
        let config = ModelConfig {
            sequence_length: 8,
            hidden_size: 4,
            ..ModelConfig::default()
        };
        let model = RecurrentPolicyValueModel::new(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        InferenceEngine::new(model, 0.5).unwrap()
    }

    fn market() -> MarketFeatures {
        let candles = generate_candles(&MarketConfig::default(), 160, &mut StdRng::seed_from_u64(2));
        MarketFeatures::new(candles).unwrap()
    }

    #[test]
    fn test_early_bars_hold_with_reason() {
        let decision = engine().decide(&market(), 10).unwrap();
        assert_eq!(decision.action, HybridAction::hold());
        assert_eq!(decision.reason, "insufficient_data");
    }

    #[test]
    fn test_first_tradable_bar_matches_feature_warmup() {
        let engine = engine();
        let market = market();
        let before = engine.decide(&market, MIN_HISTORY - 2).unwrap();
        assert_eq!(before.reason, "insufficient_data");
        assert_eq!(before.value, 0.0);

        let first = engine.decide(&market, MIN_HISTORY - 1).unwrap();
        assert_ne!(first.value, 0.0);
        let neutral = StructuralFeatures::neutral(market.candle(MIN_HISTORY - 1).close);
        assert_ne!(*market.structure(MIN_HISTORY - 1), neutral);
    }

    #[test]
    fn test_decisions_respect_mask() {
        let engine = engine();
        let market = market();
        for decision in engine.decide_range(&market, 60..160).unwrap() {
            assert!(decision.mask.allows(decision.action.direction));
            if decision.is_trade() {
                assert_eq!(decision.reason, "ok");
                assert!(decision.suggestion.is_some());
            } else {
                assert!(!decision.reason.is_empty());
                assert!(decision.suggestion.is_none());
            }
            if !decision.mask.can_trade_long {
                assert_eq!(decision.probabilities[Direction::Long.to_index()], 0.0);
            }
            let total: f64 = decision.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let engine = engine();
        let market = market();
        assert_eq!(engine.decide(&market, 120).unwrap(), engine.decide(&market, 120).unwrap());
    }

    #[test]
    fn test_rejects_wrong_feature_size() {
        let config = ModelConfig {
            feature_size: 5,
            hidden_size: 2,
            sequence_length: 2,
        };
        let model = RecurrentPolicyValueModel::new(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(InferenceEngine::new(model, 0.5).unwrap_err().is_validation());
    }
}
