//! Registry: the per-installation collection of datasets.
//!
//! Datasets are independent namespaces sharing one storage root and one
//! configuration. The registry wires each dataset's backends together
//! according to the configured flavor and hands out shared handles.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::{Backend, Config};
use crate::core::CoreError;
use crate::dataset::{rebuild_state, Dataset};
use crate::depot::FsDepot;
use crate::integrity::{IntegrityMode, KeyPair, Linker};
use crate::keeper::{FsRecordKeeper, RecordKeeper, SqliteRecordKeeper};
use crate::paths;
use crate::state::{SqliteState, State};
use crate::Result;

pub struct Registry {
    root: PathBuf,
    config: Config,
    datasets: RwLock<BTreeMap<String, Arc<Dataset>>>,
}

impl Registry {
    /// Open an installation root, loading every dataset found under it.
    pub fn open(root: &Path) -> Result<Self> {
        let config = crate::config::load_or_init(&paths::config_path(root));
        let registry = Self {
            root: root.to_path_buf(),
            config,
            datasets: RwLock::new(BTreeMap::new()),
        };

        let datasets_dir = paths::datasets_dir(root);
        if datasets_dir.exists() {
            let entries = fs::read_dir(&datasets_dir).map_err(|err| {
                CoreError::Storage(format!("failed to scan {}: {err}", datasets_dir.display()))
            })?;
            for entry in entries {
                let entry = entry.map_err(|err| CoreError::Storage(err.to_string()))?;
                if !entry.path().is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let dataset = registry.open_dataset(&name)?;
                registry
                    .datasets
                    .write()
                    .unwrap_or_else(|err| err.into_inner())
                    .insert(name, Arc::new(dataset));
            }
        }

        Ok(registry)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn list(&self) -> Vec<String> {
        self.datasets
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn dataset(&self, name: &str) -> Result<Arc<Dataset>> {
        self.datasets
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found("dataset", name).into())
    }

    /// Create a dataset and record `creator` as its first owner.
    pub fn create_dataset(&self, name: &str, creator: &str) -> Result<Arc<Dataset>> {
        validate_dataset_name(name)?;
        {
            let datasets = self.datasets.read().unwrap_or_else(|err| err.into_inner());
            if datasets.contains_key(name) {
                return Err(CoreError::validation(
                    "dataset-exists",
                    format!("dataset `{name}` already exists"),
                )
                .into());
            }
        }

        let dir = paths::dataset_dir(&self.root, name);
        fs::create_dir_all(&dir).map_err(|err| {
            CoreError::Storage(format!("failed to create {}: {err}", dir.display()))
        })?;

        let dataset = self.open_dataset(name)?;
        dataset.add_owner(creator, creator)?;

        let dataset = Arc::new(dataset);
        let mut datasets = self.datasets.write().unwrap_or_else(|err| err.into_inner());
        if datasets.contains_key(name) {
            return Err(CoreError::Conflict.into());
        }
        datasets.insert(name.to_string(), dataset.clone());
        tracing::info!(dataset = name, owner = creator, "dataset created");
        Ok(dataset)
    }

    fn open_dataset(&self, name: &str) -> Result<Dataset> {
        let dir = paths::dataset_dir(&self.root, name);
        let depot = Box::new(FsDepot::open(&paths::depot_dir(&dir))?);
        let linker = self.linker()?;
        let page_size = self.config.effective_page_size();

        let (keeper, state): (Box<dyn RecordKeeper>, Box<dyn State>) = match self.config.backend {
            Backend::Fs => {
                let keeper = FsRecordKeeper::open(&paths::keeper_dir(&dir))?;
                let state = rebuild_state(&keeper, self.config.integrity)?;
                (Box::new(keeper), Box::new(state))
            }
            Backend::Sqlite => {
                let keeper = SqliteRecordKeeper::open(&paths::keeper_db_path(&dir))?;
                let state = SqliteState::open(&paths::state_db_path(&dir))?;
                (Box::new(keeper), Box::new(state))
            }
        };

        Ok(Dataset::new(name, keeper, depot, state, linker, page_size))
    }

    fn linker(&self) -> Result<Linker> {
        match self.config.integrity {
            IntegrityMode::Chain => Ok(Linker::Chain),
            IntegrityMode::Signature => {
                let key_path = self
                    .config
                    .key_file
                    .clone()
                    .unwrap_or_else(|| paths::keys_path(&self.root));
                let keypair = if key_path.exists() {
                    KeyPair::load(&key_path)?
                } else {
                    let keypair = KeyPair::generate();
                    keypair.save(&key_path)?;
                    tracing::info!(path = %key_path.display(), "generated signing keypair");
                    keypair
                };
                Ok(Linker::Signature(keypair))
            }
        }
    }
}

fn validate_dataset_name(name: &str) -> std::result::Result<(), CoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(CoreError::validation(
            "name",
            "dataset name must be 1..=64 characters",
        ));
    }
    if name.starts_with('.') {
        return Err(CoreError::validation(
            "name",
            "dataset name cannot start with a dot",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(CoreError::validation(
            "name",
            "dataset name may only contain letters, digits, `.`, `_`, and `-`",
        ));
    }
    Ok(())
}
