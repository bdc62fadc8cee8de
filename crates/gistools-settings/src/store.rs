//! Configuration persistence

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::{AppConfig, ConnectionSettings, FieldConfig, config_file, ensure_parent_dir};

/// Load/save of the persisted configuration
pub trait ConfigStore: Send + Sync {
    /// Load the configuration; a missing or blank file yields the defaults
    fn load(&self) -> Result<AppConfig>;

    /// Replace the stored configuration
    fn save(&self, config: &AppConfig) -> Result<()>;

    fn load_field_configs(&self) -> Result<Vec<FieldConfig>> {
        Ok(self.load()?.field_configs)
    }

    /// Replace the full list of field configs, keeping the other sections
    fn save_field_configs(&self, records: &[FieldConfig]) -> Result<()> {
        let mut config = self.load()?;
        config.field_configs = records.to_vec();
        self.save(&config)
    }

    fn load_connection(&self) -> Result<ConnectionSettings> {
        Ok(self.load()?.connection)
    }

    fn save_connection(&self, connection: &ConnectionSettings) -> Result<()> {
        let mut config = self.load()?;
        config.connection = connection.clone();
        self.save(&config)
    }
}

/// JSON file store; saves go through a temp file and a rename
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location (`<config dir>/gistools/config.json`)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(config_file()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            tracing::debug!(path = ?self.path, "config file not found, using defaults");
            return Ok(AppConfig::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config from {:?}", self.path))?;
        if content.trim().is_empty() {
            return Ok(AppConfig::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON at {:?}", self.path))
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        ensure_parent_dir(&self.path)?;
        let content = serde_json::to_string_pretty(config)?;
        let temp = self.temp_path();
        std::fs::write(&temp, content)
            .with_context(|| format!("Failed to write config to {:?}", temp))?;
        std::fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to replace config at {:?}", self.path))?;
        tracing::debug!(
            path = ?self.path,
            field_configs = config.field_configs.len(),
            "config saved"
        );
        Ok(())
    }
}
