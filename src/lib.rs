#![forbid(unsafe_code)]

//! corral: a self-hosted backend for constructing and versioning
//! annotated datasets.
//!
//! Every mutation is an event in an append-only, hash-chained log; blobs
//! live in a content-addressed depot; queryable state is a projection
//! rebuilt from the log. Untrusted contributors propose events, owners
//! accept or reject them.

pub mod config;
pub mod core;
pub mod dataset;
pub mod depot;
pub mod error;
pub mod integrity;
pub mod keeper;
mod paths;
pub mod registry;
pub mod server;
pub mod state;
pub mod telemetry;

pub use error::{Error, Result};

pub use crate::config::{Backend, Config};
pub use crate::core::{
    sha256_bytes, to_canon_json_bytes, AnnotationRecord, ContentDigest, CoreError, Event,
    EventKind, HashType, Identifier, ObjectRecord, ReviewStatus, SchemaRecord, Status, Token,
};
pub use crate::dataset::{BlobInput, Dataset};
pub use crate::depot::{Depot, DepotError, FsDepot, MemoryDepot};
pub use crate::integrity::{IntegrityMode, KeyPair, Linker};
pub use crate::keeper::{
    FsRecordKeeper, KeeperError, MemoryRecordKeeper, RecordKeeper, SqliteRecordKeeper,
    Verification,
};
pub use crate::registry::Registry;
pub use crate::state::{MemoryState, SqliteState, State, StateView};
