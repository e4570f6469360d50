//! Strategy Integration
//!
//! Connects a trained model to bar-by-bar trading decisions.

pub mod inference;

pub use inference::{Decision, InferenceEngine};
