//! Record keeper: the append-only, totally-ordered event log.
//!
//! Three backends share one contract: a filesystem log of crc32c-framed
//! canonical JSON events, an embedded SQLite table, and an in-memory log
//! for tests. Appended events are immutable; sequence position is the only
//! notion of time the core trusts.

mod frame;
mod fs;
mod mem;
mod sqlite;

pub use fs::FsRecordKeeper;
pub use mem::MemoryRecordKeeper;
pub use sqlite::SqliteRecordKeeper;

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::core::{CanonJsonError, Event, Token};
use crate::integrity::{check_event, IntegrityMode};

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("event encode failed: {0}")]
    Encode(#[from] CanonJsonError),
    #[error("event at seq {seq:?} failed to decode: {reason}")]
    Decode { seq: Option<u64>, reason: String },
    #[error("frame magic mismatch (got {got:#x})")]
    FrameMagicMismatch { got: u32 },
    #[error("frame length invalid: {reason}")]
    FrameLengthInvalid { reason: String },
    #[error("frame crc mismatch (expected {expected:#x}, got {got:#x})")]
    FrameCrcMismatch { expected: u32, got: u32 },
    #[error("event {uuid} already appended")]
    EventExists { uuid: Uuid },
    #[error("event {uuid} not in log")]
    NotFound { uuid: Uuid },
    #[error("seq {seq} out of range (log has {len} events)")]
    SeqOutOfRange { seq: u64, len: u64 },
    #[error("event {uuid} has no integrity token")]
    TokenMissing { uuid: Uuid },
    #[error("pagination cursor {uuid} not in log")]
    UnknownAfter { uuid: Uuid },
}

impl KeeperError {
    /// Whether this error means the stored bytes are damaged, as opposed
    /// to a backend/environment failure.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            KeeperError::Decode { .. }
                | KeeperError::FrameMagicMismatch { .. }
                | KeeperError::FrameLengthInvalid { .. }
                | KeeperError::FrameCrcMismatch { .. }
        )
    }
}

/// Outcome of an offline integrity walk over the full log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    Clean,
    /// Tampering detected at this sequence number; everything from here
    /// on is untrusted.
    TamperedAt(u64),
}

/// Append-only event log contract.
pub trait RecordKeeper: Send + Sync {
    /// Append a tokenized event and return its token. Fails if the event
    /// UUID is already present or the token is missing.
    fn append(&mut self, event: &Event) -> Result<Token, KeeperError>;

    fn read(&self, uuid: &Uuid) -> Result<Event, KeeperError>;

    fn exists(&self, uuid: &Uuid) -> Result<bool, KeeperError>;

    /// Event at a 0-based sequence position.
    fn at(&self, seq: u64) -> Result<Event, KeeperError>;

    fn len(&self) -> Result<u64, KeeperError>;

    fn is_empty(&self) -> Result<bool, KeeperError> {
        Ok(self.len()? == 0)
    }

    /// Most recently appended event, if any.
    fn tail(&self) -> Result<Option<Event>, KeeperError>;

    /// Page of events strictly after `after` (from the start when `None`).
    /// An `after` cursor that is not in the log is an error.
    fn next(&self, after: Option<&Uuid>, limit: usize) -> Result<Vec<Event>, KeeperError>;

    /// Re-derive every token and report the first sequence position that
    /// diverges. Damaged frames count as tampering at their position.
    fn verify(&self, mode: IntegrityMode) -> Result<Verification, KeeperError> {
        let len = self.len()?;
        let mut prev: Option<Token> = None;
        for seq in 0..len {
            let event = match self.at(seq) {
                Ok(event) => event,
                Err(err) if err.is_corruption() => return Ok(Verification::TamperedAt(seq)),
                Err(err) => return Err(err),
            };
            if check_event(mode, &event, prev.as_ref()).is_err() {
                return Ok(Verification::TamperedAt(seq));
            }
            prev = event.integrity;
        }
        Ok(Verification::Clean)
    }
}

fn require_token(event: &Event) -> Result<Token, KeeperError> {
    event
        .integrity
        .clone()
        .ok_or(KeeperError::TokenMissing { uuid: event.uuid })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{sha256_bytes, EventKind, HashType, ObjectRecord};
    use crate::integrity::Linker;

    /// Build a chained event ready for append.
    pub(crate) fn chained_event(prev: Option<&Token>, name: &str) -> Event {
        let bytes = name.as_bytes();
        let mut event = Event::new(
            "alice",
            EventKind::object_create(ObjectRecord {
                uuid: Uuid::new_v4(),
                version: 0,
                name: name.to_string(),
                format: "text/plain".to_string(),
                size: bytes.len() as u64,
                hash_type: HashType::Sha256,
                hash: sha256_bytes(bytes),
            }),
        );
        Linker::Chain.attach(&mut event, prev).unwrap();
        event
    }

    /// Shared contract tests run against every backend.
    pub(crate) fn exercise_keeper(keeper: &mut dyn RecordKeeper) {
        assert!(keeper.is_empty().unwrap());
        assert!(keeper.tail().unwrap().is_none());

        let mut events = Vec::new();
        let mut prev: Option<Token> = None;
        for i in 0..5 {
            let event = chained_event(prev.as_ref(), &format!("obj-{i}.txt"));
            let token = keeper.append(&event).unwrap();
            assert_eq!(Some(&token), event.integrity.as_ref());
            prev = event.integrity.clone();
            events.push(event);
        }

        assert_eq!(keeper.len().unwrap(), 5);
        assert_eq!(keeper.tail().unwrap().unwrap(), events[4]);
        assert_eq!(keeper.at(2).unwrap(), events[2]);
        assert!(matches!(
            keeper.at(5),
            Err(KeeperError::SeqOutOfRange { seq: 5, len: 5 })
        ));

        for event in &events {
            assert!(keeper.exists(&event.uuid).unwrap());
            assert_eq!(&keeper.read(&event.uuid).unwrap(), event);
        }
        assert!(!keeper.exists(&Uuid::new_v4()).unwrap());

        // Duplicate appends are refused.
        assert!(matches!(
            keeper.append(&events[0]),
            Err(KeeperError::EventExists { .. })
        ));

        // Pagination from the start, then from a cursor.
        let first_page = keeper.next(None, 3).unwrap();
        assert_eq!(first_page, events[..3]);
        let second_page = keeper.next(Some(&events[2].uuid), 10).unwrap();
        assert_eq!(second_page, events[3..]);
        assert!(matches!(
            keeper.next(Some(&Uuid::new_v4()), 10),
            Err(KeeperError::UnknownAfter { .. })
        ));

        assert_eq!(
            keeper.verify(IntegrityMode::Chain).unwrap(),
            Verification::Clean
        );
    }
}
