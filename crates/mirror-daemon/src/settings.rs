//! Persisted daemon settings.
//!
//! Stored in `.mirror/settings.json` within the vault directory. Keys missing
//! from the file fall back to their defaults, so older files keep loading.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Directory for mirror state inside the vault
pub const SETTINGS_DIR: &str = ".mirror";
/// Settings file name inside `SETTINGS_DIR`
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// User-editable settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Deployment URL; empty disables syncing
    pub convex_url: String,
}

/// Settings backed by a JSON file.
pub struct SettingsStore {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory copy.
    settings: Settings,
}

impl SettingsStore {
    /// Open the settings of the vault at `vault_path`, loading them if present.
    pub fn open(vault_path: &Path) -> Result<Self> {
        let path = vault_path.join(SETTINGS_DIR).join(SETTINGS_FILE);
        let mut store = Self {
            path,
            settings: Settings::default(),
        };
        store.settings = store.load()?;
        Ok(store)
    }

    /// Load settings from disk, merged over the defaults.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!("No settings at {:?}, using defaults", self.path);
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(&self.path).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Save current settings to disk.
    pub fn save(&self) -> Result<()> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = serde_json::to_string_pretty(&self.settings).map_err(|source| {
            SettingsError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, contents).map_err(io_err)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn convex_url(&self) -> &str {
        &self.settings.convex_url
    }

    /// Update the URL and persist it.
    pub fn set_convex_url(&mut self, url: &str) -> Result<()> {
        self.settings.convex_url = url.trim().to_string();
        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
