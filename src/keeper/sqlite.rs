//! SQLite record keeper: one `events` table, append is `INSERT`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::core::{Event, Token};

use super::{require_token, KeeperError, RecordKeeper};

const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct SqliteRecordKeeper {
    conn: Mutex<Connection>,
}

impl SqliteRecordKeeper {
    pub fn open(path: &Path) -> Result<Self, KeeperError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                author TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                payload BLOB NOT NULL,
                integrity BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_uuid ON events(uuid);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn decode_row(payload: Vec<u8>, seq: Option<u64>) -> Result<Event, KeeperError> {
        Event::decode(&payload).map_err(|err| KeeperError::Decode {
            seq,
            reason: err.to_string(),
        })
    }

    fn seq_of(&self, uuid: &Uuid) -> Result<Option<i64>, KeeperError> {
        let conn = self.conn();
        let seq = conn
            .query_row(
                "SELECT seq FROM events WHERE uuid = ?1",
                params![uuid.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }
}

impl RecordKeeper for SqliteRecordKeeper {
    fn append(&mut self, event: &Event) -> Result<Token, KeeperError> {
        let token = require_token(event)?;
        if self.seq_of(&event.uuid)?.is_some() {
            return Err(KeeperError::EventExists { uuid: event.uuid });
        }

        let payload = event.encoded_bytes()?;
        self.conn().execute(
            "INSERT INTO events (uuid, type, author, timestamp, payload, integrity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.uuid.to_string(),
                event.kind.type_name(),
                event.author,
                event.timestamp,
                payload,
                token.as_bytes(),
            ],
        )?;
        Ok(token)
    }

    fn read(&self, uuid: &Uuid) -> Result<Event, KeeperError> {
        let payload: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT payload FROM events WHERE uuid = ?1",
                params![uuid.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let payload = payload.ok_or(KeeperError::NotFound { uuid: *uuid })?;
        Self::decode_row(payload, None)
    }

    fn exists(&self, uuid: &Uuid) -> Result<bool, KeeperError> {
        Ok(self.seq_of(uuid)?.is_some())
    }

    fn at(&self, seq: u64) -> Result<Event, KeeperError> {
        let payload: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT payload FROM events ORDER BY seq LIMIT 1 OFFSET ?1",
                params![seq as i64],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(payload) => Self::decode_row(payload, Some(seq)),
            None => Err(KeeperError::SeqOutOfRange {
                seq,
                len: self.len()?,
            }),
        }
    }

    fn len(&self) -> Result<u64, KeeperError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn tail(&self) -> Result<Option<Event>, KeeperError> {
        let payload: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT payload FROM events ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| Self::decode_row(p, None)).transpose()
    }

    fn next(&self, after: Option<&Uuid>, limit: usize) -> Result<Vec<Event>, KeeperError> {
        let min_seq = match after {
            None => 0i64,
            Some(uuid) => self
                .seq_of(uuid)?
                .ok_or(KeeperError::UnknownAfter { uuid: *uuid })?,
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payload FROM events WHERE seq > ?1 ORDER BY seq LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![min_seq, limit as i64], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;

        let mut events = Vec::new();
        for payload in rows {
            events.push(Self::decode_row(payload?, None)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::tests::exercise_keeper;

    #[test]
    fn sqlite_keeper_passes_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut keeper = SqliteRecordKeeper::open(&dir.path().join("keeper.db")).unwrap();
        exercise_keeper(&mut keeper);
    }

    #[test]
    fn sqlite_keeper_reopens_with_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.db");
        let uuid;
        {
            let mut keeper = SqliteRecordKeeper::open(&path).unwrap();
            let event = crate::keeper::tests::chained_event(None, "obj");
            uuid = event.uuid;
            keeper.append(&event).unwrap();
        }
        let keeper = SqliteRecordKeeper::open(&path).unwrap();
        assert_eq!(keeper.len().unwrap(), 1);
        assert!(keeper.exists(&uuid).unwrap());
    }
}
