//! Action Masking
//!
//! Legality gate computed from structural features and per-direction
//! confluence.

use serde::{Deserialize, Serialize};

use crate::rl::core::action::{Direction, HybridAction};
use crate::rl::core::reward::confluence_score;
use crate::rl::features::StructuralFeatures;

/// Why trading is (not) permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskReason {
    Ok,
    LowConfluence,
    ExtremeVolatility,
    InsufficientData,
    UnfavorableConditions,
}

impl MaskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskReason::Ok => "ok",
            MaskReason::LowConfluence => "low_confluence",
            MaskReason::ExtremeVolatility => "extreme_volatility",
            MaskReason::InsufficientData => "insufficient_data",
            MaskReason::UnfavorableConditions => "unfavorable_conditions",
        }
    }
}

impl std::fmt::Display for MaskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionMask {
    pub can_trade_long: bool,
    pub can_trade_short: bool,
    pub long_confluence: f64,
    pub short_confluence: f64,
    pub reason: MaskReason,
}

impl ActionMask {
    pub fn allows(&self, direction: Direction) -> bool {
        match direction {
            Direction::Hold => true,
            Direction::Long => self.can_trade_long,
            Direction::Short => self.can_trade_short,
        }
    }

    pub fn confluence(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Hold => 0.0,
            Direction::Long => self.long_confluence,
            Direction::Short => self.short_confluence,
        }
    }
}

/// Pure legality gate
#[derive(Debug, Clone, Copy)]
pub struct ActionMasker {
    confluence_threshold: f64,
}

impl Default for ActionMasker {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl ActionMasker {
    pub fn new(confluence_threshold: f64) -> Self {
        Self {
            confluence_threshold,
        }
    }

    /// A direction is tradable iff its confluence clears the threshold, the
    /// volatility tier is not extreme and the structure is complete.
    pub fn compute_mask(&self, features: &StructuralFeatures) -> ActionMask {
        let long_confluence = confluence_score(features, Direction::Long);
        let short_confluence = confluence_score(features, Direction::Short);
        let calm = features.vol_regime <= 1;
        let complete = features.is_complete();
        let gate = |c: f64| c >= self.confluence_threshold && calm && complete;

        let can_trade_long = gate(long_confluence);
        let can_trade_short = gate(short_confluence);

        let reason = if can_trade_long || can_trade_short {
            MaskReason::Ok
        } else if calm && complete && long_confluence.max(short_confluence).is_finite() {
            MaskReason::LowConfluence
        } else if !calm {
            MaskReason::ExtremeVolatility
        } else if !complete {
            MaskReason::InsufficientData
        } else {
            MaskReason::UnfavorableConditions
        };

        ActionMask {
            can_trade_long,
            can_trade_short,
            long_confluence,
            short_confluence,
            reason,
        }
    }
}

/// Force a disallowed action to HOLD; reports whether it overrode
pub fn override_masked_action(action: &HybridAction, mask: &ActionMask) -> (HybridAction, bool) {
    if mask.allows(action.direction) {
        (*action, false)
    } else {
        (action.as_hold(), true)
    }
}

/// Set disallowed direction logits to -inf; HOLD always stays selectable
pub fn mask_actor_logits(logits: &mut [f64; 3], mask: &ActionMask) {
    if !mask.can_trade_long {
        logits[Direction::Long.to_index()] = f64::NEG_INFINITY;
    }
    if !mask.can_trade_short {
        logits[Direction::Short.to_index()] = f64::NEG_INFINITY;
    }
    let hold = Direction::Hold.to_index();
    if !logits[hold].is_finite() {
        logits[hold] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::features::{MarketPhase, RegimeMix};

    fn strong_long() -> StructuralFeatures {
        let mut f = StructuralFeatures::neutral(100.0);
        f.atr = 2.0;
        f.regime = RegimeMix::dominant(MarketPhase::Advancing);
        f.dist_to_support = Some(0.2);
        f.dist_to_resistance = Some(4.0);
        f.support_strength = 1.0;
        f.resistance_strength = 1.0;
        f
    }

    #[test]
    fn test_strong_setup_is_tradable() {
        let mask = ActionMasker::default().compute_mask(&strong_long());
        assert!(mask.can_trade_long);
        assert!(!mask.can_trade_short);
        assert_eq!(mask.reason, MaskReason::Ok);
    }

    #[test]
    fn test_extreme_volatility_blocks_both_directions() {
        let mut f = strong_long();
        f.vol_regime = 2;
        let mask = ActionMasker::new(0.0).compute_mask(&f);
        assert!(!mask.can_trade_long && !mask.can_trade_short);
        assert_eq!(mask.reason, MaskReason::ExtremeVolatility);
        assert_eq!(mask.reason.as_str(), "extreme_volatility");
    }

    #[test]
    fn test_low_confluence_reason() {
        let mask = ActionMasker::new(0.99).compute_mask(&strong_long());
        assert_eq!(mask.reason, MaskReason::LowConfluence);
    }

    #[test]
    fn test_missing_levels_are_insufficient_data() {
        let mut f = strong_long();
        f.dist_to_resistance = None;
        let mask = ActionMasker::new(0.0).compute_mask(&f);
        assert!(!mask.can_trade_long);
        assert_eq!(mask.reason, MaskReason::InsufficientData);
    }

    #[test]
    fn test_override_and_logit_masking() {
        let mut f = strong_long();
        f.vol_regime = 2;
        let mask = ActionMasker::default().compute_mask(&f);

        let short = HybridAction::new(Direction::Short, 0.1, 1.0, 0.7);
        let (action, overridden) = override_masked_action(&short, &mask);
        assert!(overridden);
        assert_eq!(action.direction, Direction::Hold);
        assert_eq!(action.size, short.size);

        let hold = HybridAction::hold();
        assert!(!override_masked_action(&hold, &mask).1);

        let mut logits = [f64::NEG_INFINITY, 2.0, 3.0];
        mask_actor_logits(&mut logits, &mask);
        assert_eq!(logits, [0.0, f64::NEG_INFINITY, f64::NEG_INFINITY]);
    }
}
