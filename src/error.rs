//! Crate-level convenience error.
//!
//! A thin wrapper over the capability errors; each keeps its own bounded
//! enum and nothing is swallowed on the way up.

use thiserror::Error;

use crate::core::CoreError;
use crate::dataset::RebuildError;
use crate::depot::DepotError;
use crate::keeper::KeeperError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Keeper(#[from] KeeperError),

    #[error(transparent)]
    Depot(#[from] DepotError),

    #[error(transparent)]
    Rebuild(#[from] RebuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
