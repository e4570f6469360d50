//! Experience Memory
//!
//! Rollout storage for on-policy PPO updates.

pub mod experience_buffer;

pub use experience_buffer::{Experience, ExperienceBuffer};
