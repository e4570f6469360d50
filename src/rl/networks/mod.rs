//! Neural Network Architectures
//!
//! Plain-`f64` recurrent actor-critic: dense layers, an LSTM layer and the
//! policy-value model, with weights addressed by parameter group.

pub mod linear;
pub mod lstm;
pub mod model;
pub mod params;

pub use linear::Linear;
pub use lstm::{lstm_forward, lstm_step, LstmState};
pub use model::{
    evaluate_action, heads_from_hidden, log_softmax, policy_heads, sample_normal, Evaluation,
    Gaussian, LogProbs, PolicyHeads, PolicyOutput, RecurrentPolicyValueModel, LOG_STD_MAX,
    LOG_STD_MIN,
};
pub use params::{ParamGroup, ParamSource, PerturbedParams};
