//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the identity backend URL, the last principal that logged
//! in and the remember-me preference.
//!
//! Configuration is stored at `~/.config/tokenkeep/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/profile directory paths
const APP_NAME: &str = "tokenkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default identity backend base URL
const DEFAULT_BACKEND_URL: &str = "https://id.tokenkeep.dev";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub last_principal: Option<String>,
    pub remember_me: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the encrypted credential blob, attempt records and
    /// offline verifiers
    pub fn profile_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// The identity backend base URL, falling back to the default service
    pub fn base_url(&self) -> String {
        self.backend_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
    }
}
