//! Session configuration (`config.json`).
//!
//! The daemon has no session identity, so the calling session ships its
//! config directory path with each start request and the daemon reloads
//! this file from there. The control tool reads the same file to evaluate
//! autoload entries; the daemon itself never acts on them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// File name within the session config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file \"{0}\" does not exist")]
    Missing(String),
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The user session's global configuration object.
///
/// Unrecognized fields round-trip untouched so that a newer GUI writing
/// extra settings does not lose them to an older daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// device name -> preset name to start automatically. Consumed by the
    /// calling tool's `autoload` command, not by the daemon.
    #[serde(default)]
    pub autoload: HashMap<String, String>,

    #[serde(flatten)]
    pub other: HashMap<String, serde_json::Value>,
}

impl SessionConfig {
    /// Load from `<config_dir>/config.json`.
    pub fn load_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&config_dir.join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved session config to {}", path.display());
        Ok(())
    }

    /// Register a preset to autoload for a device.
    pub fn set_autoload_preset(&mut self, device: &str, preset: &str) {
        self.autoload.insert(device.to_string(), preset.to_string());
    }

    /// `(device, preset)` pairs in stable order.
    pub fn iterate_autoload_presets(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .autoload
            .iter()
            .map(|(d, p)| (d.clone(), p.clone()))
            .collect();
        entries.sort();
        entries
    }
}
