//! In-memory record keeper for tests and ephemeral installations.

use std::collections::HashMap;

use uuid::Uuid;

use crate::core::{Event, Token};

use super::{require_token, KeeperError, RecordKeeper};

#[derive(Default)]
pub struct MemoryRecordKeeper {
    events: Vec<Event>,
    by_uuid: HashMap<Uuid, usize>,
}

impl MemoryRecordKeeper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordKeeper for MemoryRecordKeeper {
    fn append(&mut self, event: &Event) -> Result<Token, KeeperError> {
        let token = require_token(event)?;
        if self.by_uuid.contains_key(&event.uuid) {
            return Err(KeeperError::EventExists { uuid: event.uuid });
        }
        self.by_uuid.insert(event.uuid, self.events.len());
        self.events.push(event.clone());
        Ok(token)
    }

    fn read(&self, uuid: &Uuid) -> Result<Event, KeeperError> {
        self.by_uuid
            .get(uuid)
            .map(|&idx| self.events[idx].clone())
            .ok_or(KeeperError::NotFound { uuid: *uuid })
    }

    fn exists(&self, uuid: &Uuid) -> Result<bool, KeeperError> {
        Ok(self.by_uuid.contains_key(uuid))
    }

    fn at(&self, seq: u64) -> Result<Event, KeeperError> {
        self.events
            .get(seq as usize)
            .cloned()
            .ok_or(KeeperError::SeqOutOfRange {
                seq,
                len: self.events.len() as u64,
            })
    }

    fn len(&self) -> Result<u64, KeeperError> {
        Ok(self.events.len() as u64)
    }

    fn tail(&self) -> Result<Option<Event>, KeeperError> {
        Ok(self.events.last().cloned())
    }

    fn next(&self, after: Option<&Uuid>, limit: usize) -> Result<Vec<Event>, KeeperError> {
        let start = match after {
            None => 0,
            Some(uuid) => {
                self.by_uuid
                    .get(uuid)
                    .copied()
                    .ok_or(KeeperError::UnknownAfter { uuid: *uuid })?
                    + 1
            }
        };
        Ok(self.events.iter().skip(start).take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::tests::exercise_keeper;

    #[test]
    fn memory_keeper_passes_contract() {
        let mut keeper = MemoryRecordKeeper::new();
        exercise_keeper(&mut keeper);
    }
}
