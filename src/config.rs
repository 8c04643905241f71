//! Configuration
//!
//! Grid, session and logging settings with TOML persistence.

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_LOG_FILTER, DEFAULT_MAILBOX_BATCH, DEFAULT_PAGE_SIZE,
    DEFAULT_REPLAY_BUFFER, DEFAULT_SIZE_ESTIMATE, DEFAULT_SIZE_ESTIMATE_INCREASE,
};
use crate::error::{Error, Result};
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    /// Paging and hierarchy settings applied to every grid
    pub grid: GridConfig,
    /// Session actor settings
    pub session: SessionConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Paging and caching policy of a grid's data communicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GridConfig {
    /// Rows per fetch page; also the buffer kept on each side of the viewport
    pub page_size: usize,
    /// Initial assumed size for providers that cannot count
    pub size_estimate: usize,
    /// Step by which the assumed size grows when the viewport nears its end
    pub size_estimate_increase: usize,
    /// Eager child fetch on expand
    pub preload: PreloadConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            size_estimate: DEFAULT_SIZE_ESTIMATE,
            size_estimate_increase: DEFAULT_SIZE_ESTIMATE_INCREASE,
            preload: PreloadConfig::default(),
        }
    }
}

impl GridConfig {
    /// Clamp values that would stall paging
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.size_estimate = self.size_estimate.max(1);
        self.size_estimate_increase = self.size_estimate_increase.max(1);
        if self.preload.max_rows == 0 {
            self.preload.max_rows = self.page_size;
        }
        self
    }
}

/// Preload policy: how many children to fetch right away when a node near
/// the viewport is expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PreloadConfig {
    pub enabled: bool,
    /// Upper bound of eagerly fetched children; the viewport length caps it further
    pub max_rows: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rows: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Session actor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessionConfig {
    /// Batches kept per component for `Resync`
    pub replay_buffer: usize,
    /// Maximum mailbox messages coalesced into one turn
    pub mailbox_batch: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            replay_buffer: DEFAULT_REPLAY_BUFFER,
            mailbox_batch: DEFAULT_MAILBOX_BATCH,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` directive, combined with `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(value: &str) -> Result<Self> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: AppConfig = toml::from_str(value)?;
        config.grid = config.grid.normalized();
        config.session.mailbox_batch = config.session.mailbox_batch.max(1);
        Ok(config)
    }

    /// Render as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Platform configuration directory
///
/// - **Linux**: `~/.config/treegrid/`
/// - **macOS**: `~/Library/Application Support/dev.treegrid.treegrid/`
/// - **Windows**: `C:\Users\<User>\AppData\Roaming\treegrid\treegrid\config\`
pub fn config_dir() -> Result<PathBuf> {
    let Some(project_dirs) = ProjectDirs::from("dev", "treegrid", "treegrid") else {
        return Err(Error::invalid_state("Could not determine project directories"));
    };
    Ok(project_dirs.config_dir().to_path_buf())
}

/// Default config file path
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file; a missing file yields defaults
pub fn load_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        debug!("Config file {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    let value = fs::read_to_string(path)?;
    let config = AppConfig::from_toml(&value)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load configuration from the platform config directory
pub fn load_or_default() -> Result<AppConfig> {
    load_from(&default_config_path()?)
}

/// Save configuration, creating parent directories as needed
pub fn save_to(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config.to_toml()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = AppConfig::from_toml("   \n").expect("parse");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.grid.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let config = AppConfig::from_toml("[grid]\npage_size = 10\n").expect("parse");
        assert_eq!(config.grid.page_size, 10);
        assert_eq!(config.grid.size_estimate, DEFAULT_SIZE_ESTIMATE);
        assert_eq!(config.session.replay_buffer, DEFAULT_REPLAY_BUFFER);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_zero_values_are_normalized() {
        let config = AppConfig::from_toml(
            "[grid]\npage_size = 0\nsize_estimate = 0\n[grid.preload]\nmax_rows = 0\n",
        )
        .expect("parse");
        assert_eq!(config.grid.page_size, 1);
        assert_eq!(config.grid.size_estimate, 1);
        assert_eq!(config.grid.preload.max_rows, 1);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let result = AppConfig::from_toml("[grid\npage_size = ");
        assert!(matches!(result, Err(Error::TomlDe { .. })));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("treegrid-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join(CONFIG_FILE_NAME);
        let mut config = AppConfig::default();
        config.grid.page_size = 7;
        config.logging.filter = "debug".to_string();

        save_to(&path, &config).expect("save");
        let loaded = load_from(&path).expect("load");
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("treegrid-missing-{}.toml", uuid::Uuid::new_v4()));
        let config = load_from(&path).expect("load");
        assert_eq!(config, AppConfig::default());
    }
}
