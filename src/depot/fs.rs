//! Filesystem depot: `depot/<uuid>/<version>` plus a digest sidecar.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::{sha256_bytes, ContentDigest, Identifier};

use super::{Depot, DepotError};

const SIDECAR_SUFFIX: &str = "digest";

pub struct FsDepot {
    root: PathBuf,
}

impl FsDepot {
    pub fn open(root: &Path) -> Result<Self, DepotError> {
        fs::create_dir_all(root).map_err(|source| DepotError::Io {
            path: Some(root.to_path_buf()),
            source,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn blob_path(&self, id: &Identifier) -> PathBuf {
        self.root.join(id.uuid.to_string()).join(id.version.to_string())
    }

    fn sidecar_path(&self, id: &Identifier) -> PathBuf {
        self.root
            .join(id.uuid.to_string())
            .join(format!("{}.{SIDECAR_SUFFIX}", id.version))
    }

    fn io_err(path: &Path, source: std::io::Error) -> DepotError {
        DepotError::Io {
            path: Some(path.to_path_buf()),
            source,
        }
    }

    fn stored_digest(&self, id: &Identifier) -> Result<ContentDigest, DepotError> {
        let sidecar = self.sidecar_path(id);
        let raw = fs::read_to_string(&sidecar).map_err(|e| Self::io_err(&sidecar, e))?;
        ContentDigest::parse(raw.trim())
            .map_err(|_| DepotError::NotFound { id: *id })
    }

    /// Atomic write: temp file in the target directory, then rename.
    fn persist(path: &Path, bytes: &[u8]) -> Result<(), DepotError> {
        let dir = path.parent().ok_or_else(|| DepotError::Io {
            path: Some(path.to_path_buf()),
            source: std::io::Error::other("blob path has no parent"),
        })?;
        let mut temp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| Self::io_err(dir, e))?;
        temp.write_all(bytes).map_err(|e| Self::io_err(path, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Self::io_err(path, e))?;
        temp.persist(path).map_err(|e| Self::io_err(path, e.error))?;
        Ok(())
    }
}

impl Depot for FsDepot {
    fn write(
        &mut self,
        id: &Identifier,
        bytes: &[u8],
        expected: &ContentDigest,
    ) -> Result<(), DepotError> {
        let got = sha256_bytes(bytes);
        if got != *expected {
            return Err(DepotError::DigestMismatch {
                id: *id,
                expected: *expected,
                got,
            });
        }

        let blob = self.blob_path(id);
        if blob.exists() {
            let stored = self.stored_digest(id)?;
            if stored == got {
                return Ok(());
            }
            return Err(DepotError::Exists { id: *id });
        }

        if let Some(dir) = blob.parent() {
            fs::create_dir_all(dir).map_err(|e| Self::io_err(dir, e))?;
        }

        // Sidecar first so a verified blob is never missing its digest.
        Self::persist(&self.sidecar_path(id), got.to_hex().as_bytes())?;
        Self::persist(&blob, bytes)?;
        Ok(())
    }

    fn read(&self, id: &Identifier) -> Result<Vec<u8>, DepotError> {
        let blob = self.blob_path(id);
        if !blob.exists() {
            return Err(DepotError::NotFound { id: *id });
        }
        let bytes = fs::read(&blob).map_err(|e| Self::io_err(&blob, e))?;
        let expected = self.stored_digest(id)?;
        let got = sha256_bytes(&bytes);
        if got != expected {
            return Err(DepotError::DigestMismatch {
                id: *id,
                expected,
                got,
            });
        }
        Ok(bytes)
    }

    fn exists(&self, id: &Identifier) -> Result<bool, DepotError> {
        Ok(self.blob_path(id).exists())
    }

    fn purge(&mut self, id: &Identifier) -> Result<(), DepotError> {
        let blob = self.blob_path(id);
        if !blob.exists() {
            return Err(DepotError::NotFound { id: *id });
        }
        fs::remove_file(&blob).map_err(|e| Self::io_err(&blob, e))?;
        let sidecar = self.sidecar_path(id);
        if sidecar.exists() {
            fs::remove_file(&sidecar).map_err(|e| Self::io_err(&sidecar, e))?;
        }
        Ok(())
    }
}
