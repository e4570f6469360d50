//! RL Algorithms
//!
//! PPO with finite-difference gradients and an Adam optimizer.

pub mod adam;
pub mod gradients;
pub mod ppo;

pub use adam::{clip_l2, Adam};
pub use gradients::{stride_indices, GradientEstimator, Gradients};
pub use ppo::{compute_gae, explained_variance, normalize_advantages, PPOTrainer, TrainingMetrics};
