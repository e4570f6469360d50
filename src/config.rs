use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::rl::config::RLConfig;
use crate::rl::environment::MarketConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Environment, model, reward and trainer settings
    pub rl: RLConfig,
    pub data: DataConfig,
    pub logging: LoggingConfig,
}

/// Where candles come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// JSON candle file; synthetic data is generated when unset
    pub candles_path: Option<String>,
    /// Bars to generate when no file is given
    pub synthetic_bars: usize,
    /// Generator settings for synthetic data
    pub synthetic: MarketConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            candles_path: None,
            synthetic_bars: 2_000,
            synthetic: MarketConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for daily rolling log files; stdout only when unset
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PPO_TRADER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PPO_TRADER__RL__PPO__GAMMA, etc.)
            .add_source(
                Environment::with_prefix("PPO_TRADER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.rl.validate()?;
        if self.data.candles_path.is_none() && self.data.synthetic_bars < self.rl.environment.required_bars() {
            return Err(crate::error::EngineError::InvalidConfiguration(format!(
                "data.synthetic_bars ({}) is below the {} bars an episode needs",
                self.data.synthetic_bars,
                self.rl.environment.required_bars()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_without_files() {
        let dir = std::env::temp_dir().join(format!("ppo_cfg_empty_{}", uuid::Uuid::new_v4()));
        let config = AppConfig::load_from(&dir).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rl.ppo.batch_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("ppo_cfg_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("default.toml"),
            "[rl.ppo]\ngamma = 0.9\n\n[rl.training]\nepisodes = 3\n\n[logging]\njson = true\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&dir).unwrap();
        assert!((config.rl.ppo.gamma - 0.9).abs() < 1e-12);
        assert_eq!(config.rl.training.episodes, 3);
        assert_eq!(config.rl.ppo.ppo_epochs, 4);
        assert!(config.logging.json);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_too_few_synthetic_bars() {
        let mut config = AppConfig::default();
        config.data.synthetic_bars = 100;
        assert!(config.validate().unwrap_err().is_configuration());
    }
}
