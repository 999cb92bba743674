// Backend settings
// Pool defaults, export paging and log filter, persisted as JSON in the app config dir

use crate::db::config::PoolConfig;
use crate::db::error::DbError;
use crate::export::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_LOG_FILTER: &str = "info,querydeck_lib=debug";

const SETTINGS_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to get app config directory")]
    ConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings: {0}")]
    Invalid(String),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

impl From<SettingsError> for DbError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Invalid(m) => DbError::ValidationError(m),
            other => DbError::IoError(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Applied to connections that carry no pool section
    pub default_pool: PoolConfig,
    /// Rows per page when exporting a whole table
    pub export_page_size: i64,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_pool: PoolConfig::default(),
            export_page_size: DEFAULT_PAGE_SIZE,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> SettingsResult<()> {
        self.default_pool
            .validate()
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        if self.export_page_size <= 0 {
            return Err(SettingsError::Invalid(
                "export_page_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings file location plus the loaded values
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the platform config dir
    pub fn open_default() -> SettingsResult<Self> {
        Ok(Self::new(get_default_settings_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read settings, creating the file with defaults on first run.
    /// A malformed file is left alone and defaults are used.
    pub fn load(&self) -> SettingsResult<AppSettings> {
        if !self.path.exists() {
            let settings = AppSettings::default();
            self.save(&settings)?;
            return Ok(settings);
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let parsed = serde_json::from_str::<AppSettings>(&raw)
            .map_err(SettingsError::from)
            .and_then(|s| s.validate().map(|_| s));
        match parsed {
            Ok(settings) => Ok(settings),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "settings file unreadable, using defaults"
                );
                Ok(AppSettings::default())
            }
        }
    }

    pub fn save(&self, settings: &AppSettings) -> SettingsResult<()> {
        settings.validate()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(settings)?)?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

pub fn get_default_settings_path() -> SettingsResult<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "querydeck", "querydeck")
        .ok_or(SettingsError::ConfigDir)?;
    Ok(proj_dirs.config_dir().join(SETTINGS_FILE))
}
