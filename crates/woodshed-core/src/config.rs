//! YAML configuration persistence.
//!
//! Generic load/save helpers plus the application config they usually
//! carry. Loading is deliberately forgiving: a missing or unparsable file
//! yields defaults with a warning instead of refusing to start.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::engine::GovernorConfig;

/// Everything the player persists between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Device selection and buffer settings
    pub audio: AudioConfig,
    /// Feedback governor tuning
    pub governor: GovernorConfig,
}

/// `$XDG_CONFIG_HOME/woodshed/config.yaml` (or the platform equivalent)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("woodshed")
        .join("config.yaml")
}

/// Load a config, returning defaults if the file is missing or invalid.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("no config at {:?}, using defaults", path);
        return T::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save a config as YAML, creating parent directories as needed.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("serializing config")?;
    std::fs::write(path, yaml).with_context(|| format!("writing config to {:?}", path))?;
    Ok(())
}
