// Configuration management for the Tincan CLI
//
// Cross-platform config stored in:
// - macOS: ~/.config/tincan/config.json
// - Linux: ~/.config/tincan/config.json
// - Windows: %APPDATA%\tincan\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name shown to nearby peers
    pub display_name: String,

    /// Storage path override; defaults to the platform data directory
    pub storage_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_name: whoami(),
            storage_path: None,
        }
    }
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "tincan-user".to_string())
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("tincan");
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("tincan");
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;
        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Resolved storage path for the core database.
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("storage")),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "display_name" => self.display_name = value.to_string(),
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.save()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "display_name" => Some(self.display_name.clone()),
            "storage_path" => Some(self.storage_path.clone().unwrap_or_default()),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(&'static str, String)> {
        vec![
            ("display_name", self.display_name.clone()),
            (
                "storage_path",
                self.storage_path.clone().unwrap_or_else(|| "(default)".to_string()),
            ),
        ]
    }
}
