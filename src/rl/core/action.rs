//! Action Space
//!
//! Hybrid action: a discrete direction plus continuous order parameters.

use serde::{Deserialize, Serialize};

/// Number of discrete directions
pub const NUM_DIRECTIONS: usize = 3;

/// Bounds of the take-profit offset
pub const TP_OFFSET_RANGE: (f64, f64) = (-0.5, 0.5);

/// Bounds of the stop tightness multiplier
pub const SL_TIGHT_RANGE: (f64, f64) = (0.5, 2.0);

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Direction {
    /// Stay flat
    #[default]
    Hold = 0,
    /// Open a long position
    Long = 1,
    /// Open a short position
    Short = 2,
}

impl Direction {
    /// Convert from action index
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Hold),
            1 => Some(Self::Long),
            2 => Some(Self::Short),
            _ => None,
        }
    }

    /// Convert to action index
    pub fn to_index(self) -> usize {
        self as usize
    }

    /// Get all possible directions
    pub fn all() -> &'static [Direction] {
        &[Self::Hold, Self::Long, Self::Short]
    }

    /// +1 for long, -1 for short, 0 for hold
    pub fn sign(self) -> f64 {
        match self {
            Self::Hold => 0.0,
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn is_trade(self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hold => write!(f, "HOLD"),
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// One decision consumed by the environment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridAction {
    pub direction: Direction,
    /// Shift of the take-profit target in ATR units, in [-0.5, 0.5]
    pub tp_offset: f64,
    /// Stop distance multiplier, in [0.5, 2.0]
    pub sl_tight: f64,
    /// Fraction of the per-trade risk budget, in [0, 1]
    pub size: f64,
}

impl Default for HybridAction {
    fn default() -> Self {
        Self::hold()
    }
}

impl HybridAction {
    /// Create a new action with every field clamped to its domain
    pub fn new(direction: Direction, tp_offset: f64, sl_tight: f64, size: f64) -> Self {
        Self {
            direction,
            tp_offset: tp_offset.clamp(TP_OFFSET_RANGE.0, TP_OFFSET_RANGE.1),
            sl_tight: sl_tight.clamp(SL_TIGHT_RANGE.0, SL_TIGHT_RANGE.1),
            size: size.clamp(0.0, 1.0),
        }
    }

    /// Create a hold action
    pub fn hold() -> Self {
        Self {
            direction: Direction::Hold,
            tp_offset: 0.0,
            sl_tight: 1.0,
            size: 0.0,
        }
    }

    /// Same parameters with the direction forced to HOLD
    pub fn as_hold(&self) -> Self {
        Self {
            direction: Direction::Hold,
            ..*self
        }
    }
}

/// Action as sampled by the policy, before the size sigmoid.
///
/// PPO re-evaluates log-probabilities at exactly these values, so the
/// experience buffer stores this rather than the squashed action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawAction {
    pub direction: Direction,
    pub tp_offset: f64,
    pub sl_tight: f64,
    /// Pre-sigmoid size sample
    pub size_raw: f64,
}

impl RawAction {
    /// Squash into the environment's action domain
    pub fn to_hybrid(&self) -> HybridAction {
        HybridAction::new(
            self.direction,
            self.tp_offset,
            self.sl_tight,
            sigmoid(self.size_raw),
        )
    }
}

/// Logistic sigmoid
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        for direction in Direction::all() {
            let index = direction.to_index();
            let recovered = Direction::from_index(index).unwrap();
            assert_eq!(*direction, recovered);
        }
        assert!(Direction::from_index(3).is_none());
    }

    #[test]
    fn test_hybrid_action_clamping() {
        let action = HybridAction::new(Direction::Long, 0.9, 0.1, 1.5);
        assert_eq!(action.tp_offset, 0.5);
        assert_eq!(action.sl_tight, 0.5);
        assert_eq!(action.size, 1.0);
    }

    #[test]
    fn test_raw_to_hybrid_applies_sigmoid() {
        let raw = RawAction {
            direction: Direction::Short,
            tp_offset: 0.1,
            sl_tight: 1.2,
            size_raw: 0.0,
        };
        let action = raw.to_hybrid();
        assert!((action.size - 0.5).abs() < 1e-12);
        assert_eq!(action.direction, Direction::Short);
    }

    #[test]
    fn test_sigmoid_is_stable_for_large_inputs() {
        assert!(sigmoid(-800.0).is_finite());
        assert!((sigmoid(800.0) - 1.0).abs() < 1e-12);
    }
}
