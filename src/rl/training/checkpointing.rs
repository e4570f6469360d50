//! Model Checkpointing
//!
//! Save and load model weights as JSON, with a metadata sidecar per file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::rl::networks::RecurrentPolicyValueModel;

const MODEL_EXT: &str = "json";
const META_SUFFIX: &str = ".meta.json";

/// Sidecar written next to every checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Training run that produced the checkpoint
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Episodes completed when the checkpoint was taken
    pub episodes: usize,
    pub hidden_size: usize,
    pub sequence_length: usize,
    pub feature_size: usize,
}

impl CheckpointMetadata {
    pub fn new(run_id: Uuid, episodes: usize, model: &RecurrentPolicyValueModel) -> Self {
        Self {
            run_id,
            created_at: Utc::now(),
            episodes,
            hidden_size: model.hidden_size,
            sequence_length: model.sequence_length,
            feature_size: model.feature_size,
        }
    }
}

/// Checkpointer for saving and loading models
pub struct Checkpointer {
    /// Directory for checkpoints
    checkpoint_dir: PathBuf,
    /// Maximum checkpoints to keep
    max_checkpoints: usize,
}

impl Checkpointer {
    /// Create a new checkpointer, creating the directory if needed
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P, max_checkpoints: usize) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir)?;
        Ok(Self {
            checkpoint_dir,
            max_checkpoints: max_checkpoints.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Get checkpoint path for a given name
    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{}.{}", name, MODEL_EXT))
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{}{}", name, META_SUFFIX))
    }

    /// Save a model and its metadata, then prune old checkpoints
    pub fn save(
        &self,
        model: &RecurrentPolicyValueModel,
        metadata: &CheckpointMetadata,
        name: &str,
    ) -> Result<PathBuf> {
        let path = self.checkpoint_path(name);
        model.save(&path)?;
        fs::write(self.metadata_path(name), serde_json::to_string_pretty(metadata)?)?;

        info!(path = %path.display(), episodes = metadata.episodes, "saved checkpoint");
        self.cleanup_old_checkpoints();
        Ok(path)
    }

    /// Load a model by checkpoint name
    pub fn load(&self, name: &str) -> Result<RecurrentPolicyValueModel> {
        let path = self.checkpoint_path(name);
        if !path.exists() {
            return Err(EngineError::Validation(format!(
                "checkpoint not found: {}",
                path.display()
            )));
        }
        RecurrentPolicyValueModel::load(&path)
    }

    /// Load the metadata sidecar, if one was written
    pub fn load_metadata(&self, name: &str) -> Result<Option<CheckpointMetadata>> {
        let path = self.metadata_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// List available checkpoints, oldest name first
    pub fn list_checkpoints(&self) -> Vec<String> {
        let mut checkpoints = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.checkpoint_dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.ends_with(META_SUFFIX) {
                        continue;
                    }
                    if let Some(stem) = name.strip_suffix(".json") {
                        checkpoints.push(stem.to_string());
                    }
                }
            }
        }

        checkpoints.sort();
        checkpoints
    }

    /// Get latest checkpoint name
    pub fn latest_checkpoint(&self) -> Option<String> {
        self.list_checkpoints().into_iter().last()
    }

    /// Cleanup old checkpoints keeping only max_checkpoints
    fn cleanup_old_checkpoints(&self) {
        let checkpoints = self.list_checkpoints();

        if checkpoints.len() <= self.max_checkpoints {
            return;
        }

        let to_remove = checkpoints.len() - self.max_checkpoints;
        for name in checkpoints.into_iter().take(to_remove) {
            let path = self.checkpoint_path(&name);
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove old checkpoint {:?}: {}", path, e);
                continue;
            }
            let meta = self.metadata_path(&name);
            if meta.exists() {
                if let Err(e) = fs::remove_file(&meta) {
                    warn!("Failed to remove checkpoint metadata {:?}: {}", meta, e);
                }
            }
            info!("Removed old checkpoint: {}", name);
        }
    }

    /// Check if a checkpoint exists
    pub fn exists(&self, name: &str) -> bool {
        self.checkpoint_path(name).exists()
    }
}

/// Generate a checkpoint name with timestamp
pub fn timestamped_name(prefix: &str) -> String {
    let now = Utc::now();
    format!("{}_{}", prefix, now.format("%Y%m%d_%H%M%S"))
}

/// Generate a checkpoint name with episode number
pub fn episode_name(prefix: &str, episode: usize) -> String {
    format!("{}_ep{:06}", prefix, episode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::config::ModelConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::env::temp_dir;

    fn scratch(name: &str) -> PathBuf {
        let dir = temp_dir().join(format!("ppo_ckpt_{}_{}", name, Uuid::new_v4()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn model() -> RecurrentPolicyValueModel {
        let config = ModelConfig {
            feature_size: 3,
            hidden_size: 2,
            sequence_length: 2,
        };
        RecurrentPolicyValueModel::new(&config, &mut StdRng::seed_from_u64(4)).unwrap()
    }

    #[test]
    fn test_checkpoint_path() {
        let checkpointer = Checkpointer::new(scratch("path"), 5).unwrap();
        let path = checkpointer.checkpoint_path("model_v1");

        assert!(path.to_string_lossy().contains("model_v1.json"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = scratch("roundtrip");
        let checkpointer = Checkpointer::new(&dir, 5).unwrap();
        let model = model();
        let run_id = Uuid::new_v4();
        let meta = CheckpointMetadata::new(run_id, 10, &model);

        checkpointer.save(&model, &meta, "ppo_ep000010").unwrap();
        assert!(checkpointer.exists("ppo_ep000010"));
        assert_eq!(checkpointer.list_checkpoints(), vec!["ppo_ep000010".to_string()]);

        let loaded = checkpointer.load("ppo_ep000010").unwrap();
        assert_eq!(loaded, model);
        let loaded_meta = checkpointer.load_metadata("ppo_ep000010").unwrap().unwrap();
        assert_eq!(loaded_meta.run_id, run_id);
        assert_eq!(loaded_meta.episodes, 10);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = scratch("cleanup");
        let checkpointer = Checkpointer::new(&dir, 2).unwrap();
        let model = model();
        let meta = CheckpointMetadata::new(Uuid::new_v4(), 0, &model);
        for ep in 1..=4 {
            checkpointer.save(&model, &meta, &episode_name("ppo", ep)).unwrap();
        }

        assert_eq!(
            checkpointer.list_checkpoints(),
            vec!["ppo_ep000003".to_string(), "ppo_ep000004".to_string()]
        );
        assert_eq!(checkpointer.latest_checkpoint().as_deref(), Some("ppo_ep000004"));
        assert!(checkpointer.load_metadata("ppo_ep000001").unwrap().is_none());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_checkpoint() {
        let checkpointer = Checkpointer::new(scratch("missing"), 5).unwrap();
        assert!(checkpointer.load("nope").unwrap_err().is_validation());
    }

    #[test]
    fn test_timestamped_name() {
        let name = timestamped_name("ppo");
        assert!(name.starts_with("ppo_"));
        assert!(name.len() > 10);
    }

    #[test]
    fn test_episode_name() {
        let name = episode_name("ppo", 100);
        assert_eq!(name, "ppo_ep000100");
    }
}
