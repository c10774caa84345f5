//! Application configuration
//!
//! Loaded from `<config dir>/lightcontrol/config.toml`, or the path in
//! `LIGHTCONTROL_CONFIG`. Missing files are created with defaults; broken
//! files fall back to defaults so the application always starts.

use crate::mqtt::config::MqttConfig;
use crate::toggle::controller_handle::ControllerSettings;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_ENV: &str = "LIGHTCONTROL_CONFIG";
const CONFIG_DIR: &str = "lightcontrol";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub controller: ControllerSettings,
}

impl Config {
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the config, writing defaults first if the file does not exist
    pub async fn load_or_default(path: &Path) -> Config {
        match Self::ensure_default_config(path).await {
            Ok(()) => {}
            Err(e) => warn!("Could not write default config: {}", e),
        }

        match Self::load(path).await {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Using default config: {}", e);
                Config::default()
            }
        }
    }

    pub async fn load(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))
    }

    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config exists: {}", e))?
        {
            debug!("Config {} already exists", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;

        info!("Wrote default config to {}", path.display());
        Ok(())
    }
}
