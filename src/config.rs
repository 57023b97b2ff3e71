//! Installation config loading and persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::CoreError;
use crate::integrity::IntegrityMode;

/// Minimum page size the HTTP surface promises.
pub const MIN_PAGE_SIZE: usize = 32;

/// Which record keeper / state pairing an installation runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Filesystem event log with an in-memory projection rebuilt on open.
    #[default]
    Fs,
    /// SQLite event log and SQLite projection.
    Sqlite,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub integrity: IntegrityMode,
    pub listen_addr: String,
    pub page_size: usize,
    /// Signing key location for signature mode. Defaults to
    /// `keys.json` in the storage root.
    pub key_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Fs,
            integrity: IntegrityMode::Chain,
            listen_addr: "127.0.0.1:8420".to_string(),
            page_size: 64,
            key_file: None,
        }
    }
}

impl Config {
    /// Effective page size, clamped to the promised minimum.
    pub fn effective_page_size(&self) -> usize {
        if self.page_size < MIN_PAGE_SIZE {
            tracing::warn!(
                configured = self.page_size,
                minimum = MIN_PAGE_SIZE,
                "page_size below minimum, clamping"
            );
            MIN_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

pub fn load(path: &Path) -> Result<Config, CoreError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        CoreError::Storage(format!("failed to read {}: {err}", path.display()))
    })?;
    toml::from_str(&contents).map_err(|err| {
        CoreError::Storage(format!("failed to parse {}: {err}", path.display()))
    })
}

pub fn load_or_init(path: &Path) -> Config {
    if path.exists() {
        match load(path) {
            Ok(config) => return config,
            Err(err) => {
                tracing::warn!("config load failed, using defaults: {err}");
                return Config::default();
            }
        }
    }

    let config = Config::default();
    if let Err(err) = write_config(path, &config) {
        tracing::warn!("failed to write default config: {err}");
    }
    config
}

pub fn write_config(path: &Path, config: &Config) -> Result<(), CoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| CoreError::Storage("config path has no parent directory".to_string()))?;
    fs::create_dir_all(dir)
        .map_err(|err| CoreError::Storage(format!("failed to create {}: {err}", dir.display())))?;

    let contents = toml::to_string_pretty(config)
        .map_err(|err| CoreError::Storage(format!("failed to render config: {err}")))?;

    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|err| {
        CoreError::Storage(format!("failed to create temp file in {}: {err}", dir.display()))
    })?;
    fs::write(temp.path(), contents.as_bytes())
        .map_err(|err| CoreError::Storage(format!("failed to write config: {err}")))?;
    temp.persist(path).map_err(|err| {
        CoreError::Storage(format!("failed to persist {}: {err}", path.display()))
    })?;
    Ok(())
}
