//! Depot: the content-addressed blob store.
//!
//! Blobs are keyed by (entity UUID, version), immutable once written, and
//! verified against their SHA-256 digest on both write and read. Writing
//! the same identifier with the same content is a no-op, which is what
//! makes replays and repairs idempotent.

mod fs;
mod mem;

pub use fs::FsDepot;
pub use mem::MemoryDepot;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{ContentDigest, Identifier};

#[derive(Debug, Error)]
pub enum DepotError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },
    #[error("digest mismatch for {id}: expected {expected}, got {got}")]
    DigestMismatch {
        id: Identifier,
        expected: ContentDigest,
        got: ContentDigest,
    },
    #[error("{id} already stored with different content")]
    Exists { id: Identifier },
    #[error("{id} not in depot")]
    NotFound { id: Identifier },
}

/// Blob storage contract.
pub trait Depot: Send + Sync {
    /// Store bytes for an identifier. The bytes must hash to `expected`;
    /// an existing blob with the same digest makes this a no-op, and an
    /// existing blob with a different digest is refused.
    fn write(
        &mut self,
        id: &Identifier,
        bytes: &[u8],
        expected: &ContentDigest,
    ) -> Result<(), DepotError>;

    /// Read and verify a blob.
    fn read(&self, id: &Identifier) -> Result<Vec<u8>, DepotError>;

    fn exists(&self, id: &Identifier) -> Result<bool, DepotError>;

    /// Remove a blob. Used by repair tooling, never by the event pipeline.
    fn purge(&mut self, id: &Identifier) -> Result<(), DepotError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::sha256_bytes;
    use uuid::Uuid;

    /// Shared contract tests run against every backend.
    pub(crate) fn exercise_depot(depot: &mut dyn Depot) {
        let id = Identifier::new(Uuid::new_v4(), 0);
        let bytes = b"blob contents";
        let digest = sha256_bytes(bytes);

        assert!(!depot.exists(&id).unwrap());
        assert!(matches!(
            depot.read(&id),
            Err(DepotError::NotFound { .. })
        ));

        // Declared digest must match the bytes.
        let wrong = sha256_bytes(b"other");
        assert!(matches!(
            depot.write(&id, bytes, &wrong),
            Err(DepotError::DigestMismatch { .. })
        ));
        assert!(!depot.exists(&id).unwrap());

        depot.write(&id, bytes, &digest).unwrap();
        assert!(depot.exists(&id).unwrap());
        assert_eq!(depot.read(&id).unwrap(), bytes);

        // Same content again is a no-op; different content is refused.
        depot.write(&id, bytes, &digest).unwrap();
        let other = b"different";
        assert!(matches!(
            depot.write(&id, other, &sha256_bytes(other)),
            Err(DepotError::Exists { .. })
        ));

        depot.purge(&id).unwrap();
        assert!(!depot.exists(&id).unwrap());
    }
}
