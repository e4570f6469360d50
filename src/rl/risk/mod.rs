//! Risk Management
//!
//! Hard risk limits with cooldowns, and the structural action mask.

pub mod limits;
pub mod mask;

pub use limits::{
    BreachResponse, RiskLimitManager, RiskLimits, RiskSnapshot, RiskViolation, Severity,
    SizeCheck, ViolationKind, MAX_DRAWDOWN_LIMIT,
};
pub use mask::{mask_actor_logits, override_masked_action, ActionMask, ActionMasker, MaskReason};
