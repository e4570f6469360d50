//! Parameter groups
//!
//! The model's weights are addressed through a closed set of groups, each a
//! single dense layer. Gradients and optimizer moments are keyed by group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::linear::Linear;
use crate::error::EngineError;
use crate::rl::core::action::NUM_DIRECTIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamGroup {
    /// Fused gate matrix, 4H x (F + H)
    Lstm,
    ActorDirection,
    ActorTpMean,
    ActorTpLogStd,
    ActorSlMean,
    ActorSlLogStd,
    ActorSizeMean,
    ActorSizeLogStd,
    Critic,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 9] = [
        ParamGroup::Lstm,
        ParamGroup::ActorDirection,
        ParamGroup::ActorTpMean,
        ParamGroup::ActorTpLogStd,
        ParamGroup::ActorSlMean,
        ParamGroup::ActorSlLogStd,
        ParamGroup::ActorSizeMean,
        ParamGroup::ActorSizeLogStd,
        ParamGroup::Critic,
    ];

    /// The seven actor heads
    pub const ACTOR_HEADS: [ParamGroup; 7] = [
        ParamGroup::ActorDirection,
        ParamGroup::ActorTpMean,
        ParamGroup::ActorTpLogStd,
        ParamGroup::ActorSlMean,
        ParamGroup::ActorSlLogStd,
        ParamGroup::ActorSizeMean,
        ParamGroup::ActorSizeLogStd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamGroup::Lstm => "lstm",
            ParamGroup::ActorDirection => "actor_direction",
            ParamGroup::ActorTpMean => "actor_tp_mean",
            ParamGroup::ActorTpLogStd => "actor_tp_log_std",
            ParamGroup::ActorSlMean => "actor_sl_mean",
            ParamGroup::ActorSlLogStd => "actor_sl_log_std",
            ParamGroup::ActorSizeMean => "actor_size_mean",
            ParamGroup::ActorSizeLogStd => "actor_size_log_std",
            ParamGroup::Critic => "critic",
        }
    }

    /// (rows, cols) of the group's weight matrix
    pub fn shape(self, feature_size: usize, hidden_size: usize) -> (usize, usize) {
        match self {
            ParamGroup::Lstm => (4 * hidden_size, feature_size + hidden_size),
            ParamGroup::ActorDirection => (NUM_DIRECTIONS, hidden_size),
            _ => (1, hidden_size),
        }
    }

    pub fn is_actor(self) -> bool {
        !matches!(self, ParamGroup::Lstm | ParamGroup::Critic)
    }
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamGroup {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamGroup::ALL
            .iter()
            .copied()
            .find(|g| g.name() == s)
            .ok_or_else(|| EngineError::UnknownParamGroup(s.to_string()))
    }
}

/// Read access to parameter groups
pub trait ParamSource: Sync {
    fn group(&self, group: ParamGroup) -> &Linear;
}

/// A parameter source with one group replaced by a private copy.
///
/// Finite-difference workers perturb `replacement` while every other group is
/// read from the shared base.
pub struct PerturbedParams<'a, P: ParamSource + ?Sized> {
    base: &'a P,
    replaced: ParamGroup,
    replacement: &'a Linear,
}

impl<'a, P: ParamSource + ?Sized> PerturbedParams<'a, P> {
    pub fn new(base: &'a P, replaced: ParamGroup, replacement: &'a Linear) -> Self {
        Self {
            base,
            replaced,
            replacement,
        }
    }
}

impl<P: ParamSource + ?Sized> ParamSource for PerturbedParams<'_, P> {
    fn group(&self, group: ParamGroup) -> &Linear {
        if group == self.replaced {
            self.replacement
        } else {
            self.base.group(group)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_names() {
        for group in ParamGroup::ALL {
            assert_eq!(group.name().parse::<ParamGroup>().unwrap(), group);
        }
        let err = "actor_leverage".parse::<ParamGroup>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_shapes() {
        assert_eq!(ParamGroup::Lstm.shape(33, 32), (128, 65));
        assert_eq!(ParamGroup::ActorDirection.shape(33, 32), (3, 32));
        assert_eq!(ParamGroup::Critic.shape(33, 32), (1, 32));
        assert_eq!(ParamGroup::ACTOR_HEADS.len(), 7);
        assert!(ParamGroup::ACTOR_HEADS.iter().all(|g| g.is_actor()));
    }
}
