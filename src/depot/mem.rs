//! In-memory depot for tests.

use std::collections::HashMap;

use crate::core::{sha256_bytes, ContentDigest, Identifier};

use super::{Depot, DepotError};

#[derive(Default)]
pub struct MemoryDepot {
    blobs: HashMap<Identifier, (ContentDigest, Vec<u8>)>,
}

impl MemoryDepot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Depot for MemoryDepot {
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
        if let Some((stored, _)) = self.blobs.get(id) {
            if *stored == got {
                return Ok(());
            }
            return Err(DepotError::Exists { id: *id });
        }
        self.blobs.insert(*id, (got, bytes.to_vec()));
        Ok(())
    }

    fn read(&self, id: &Identifier) -> Result<Vec<u8>, DepotError> {
        self.blobs
            .get(id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or(DepotError::NotFound { id: *id })
    }

    fn exists(&self, id: &Identifier) -> Result<bool, DepotError> {
        Ok(self.blobs.contains_key(id))
    }

    fn purge(&mut self, id: &Identifier) -> Result<(), DepotError> {
        self.blobs
            .remove(id)
            .map(|_| ())
            .ok_or(DepotError::NotFound { id: *id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot::tests::exercise_depot;

    #[test]
    fn memory_depot_passes_contract() {
        let mut depot = MemoryDepot::new();
        exercise_depot(&mut depot);
    }
}
