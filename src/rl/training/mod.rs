//! Training Infrastructure
//!
//! Training loops, checkpointing, and evaluation utilities.

pub mod checkpointing;
pub mod trainer;

pub use checkpointing::{episode_name, timestamped_name, CheckpointMetadata, Checkpointer};
pub use trainer::{
    evaluate_model, run_episode, summarize_results, EpisodeResult, StopReason, TrainingControl,
    TrainingLoop, TrainingReport, TrainingSummary,
};
