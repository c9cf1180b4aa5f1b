pub mod bluetooth_config;
pub mod log_config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::bluetooth_config::BluetoothConfig;
use crate::config::log_config::LogConfig;

const CONFIG_DIR_NAME: &str = "ble-device-manager";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bluetooth: BluetoothConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// `<platform config dir>/ble-device-manager/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("No configuration directory on this platform")?;
        Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads the config from the default location.
    pub async fn load_default() -> Result<Self> {
        Self::load_config(&Self::default_path()?).await
    }

    /// Loads the config from a configuration file, falling back to defaults
    /// when the file does not exist.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", file_path))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("Invalid config file {:?}", file_path))?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            fs::create_dir_all(config_dir)
                .await
                .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}
