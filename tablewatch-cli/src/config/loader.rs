use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tablewatch_core::WatchConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<WatchConfig> {
        Self::load_from_paths(&[Self::user_config_path(), Self::project_config_path()])
    }

    /// Merge the files that exist, later paths overriding earlier ones per key
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<WatchConfig> {
        let mut layers = Vec::new();
        for path in paths.iter().filter(|p| p.exists()) {
            layers.push(Self::read_layer(path)?);
        }
        Ok(WatchConfig::from_layers(layers)?)
    }

    /// Get user config path
    pub fn user_config_path() -> PathBuf {
        tablewatch_paths::config_file()
    }

    /// Get project config path
    /// Can be overridden with TABLEWATCH_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("TABLEWATCH_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".tablewatch/config.toml")
        }
    }

    fn read_layer(path: &Path) -> Result<toml::Value> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config in {}", path.display()))
    }
}
