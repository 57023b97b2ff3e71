//! Installation directory layout.
//!
//! ```text
//! <root>/
//!   corral.toml          installation config
//!   users.db             API-key accounts
//!   keys.json            Ed25519 keypair (signature mode only)
//!   datasets/<name>/
//!     keeper/            fs backend: events.log + events.idx
//!     keeper.db          sqlite backend
//!     state.db           sqlite backend
//!     depot/             blob store (both backends)
//! ```

use std::path::{Path, PathBuf};

pub fn config_path(root: &Path) -> PathBuf {
    root.join("corral.toml")
}

pub fn users_db_path(root: &Path) -> PathBuf {
    root.join("users.db")
}

pub fn keys_path(root: &Path) -> PathBuf {
    root.join("keys.json")
}

pub fn datasets_dir(root: &Path) -> PathBuf {
    root.join("datasets")
}

pub fn dataset_dir(root: &Path, name: &str) -> PathBuf {
    datasets_dir(root).join(name)
}

pub fn keeper_dir(dataset: &Path) -> PathBuf {
    dataset.join("keeper")
}

pub fn keeper_db_path(dataset: &Path) -> PathBuf {
    dataset.join("keeper.db")
}

pub fn state_db_path(dataset: &Path) -> PathBuf {
    dataset.join("state.db")
}

pub fn depot_dir(dataset: &Path) -> PathBuf {
    dataset.join("depot")
}
