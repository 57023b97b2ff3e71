//! Filesystem record keeper: one append-only log file plus an offset index.
//!
//! `events.log` holds crc32c-framed canonical JSON events in append order.
//! `events.idx` maps positions to (uuid, offset, len) so reads never scan;
//! it is advisory and rebuilt from the log whenever it is missing, damaged,
//! or behind.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::core::Event;

use super::frame::{decode_frame, encode_frame, FrameReader};
use super::{require_token, KeeperError, RecordKeeper};
use std::collections::HashMap;

const LOG_FILE: &str = "events.log";
const INDEX_FILE: &str = "events.idx";
const INDEX_MAGIC: &[u8; 4] = b"CRIX";
const INDEX_ENTRY_LEN: usize = 16 + 8 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct IndexEntry {
    uuid: Uuid,
    offset: u64,
    len: u32,
}

impl IndexEntry {
    fn encode(&self) -> [u8; INDEX_ENTRY_LEN] {
        let mut buf = [0u8; INDEX_ENTRY_LEN];
        buf[..16].copy_from_slice(self.uuid.as_bytes());
        buf[16..24].copy_from_slice(&self.offset.to_le_bytes());
        buf[24..28].copy_from_slice(&self.len.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[..16]);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&buf[16..24]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[24..28]);
        Self {
            uuid: Uuid::from_bytes(uuid),
            offset: u64::from_le_bytes(offset),
            len: u32::from_le_bytes(len),
        }
    }
}

pub struct FsRecordKeeper {
    log_path: PathBuf,
    index_path: PathBuf,
    log: File,
    log_len: u64,
    entries: Vec<IndexEntry>,
    by_uuid: HashMap<Uuid, u64>,
}

impl FsRecordKeeper {
    /// Open (or create) the log under `dir`.
    pub fn open(dir: &Path) -> Result<Self, KeeperError> {
        std::fs::create_dir_all(dir).map_err(|source| KeeperError::Io {
            path: Some(dir.to_path_buf()),
            source,
        })?;

        let log_path = dir.join(LOG_FILE);
        let index_path = dir.join(INDEX_FILE);

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&log_path)
            .map_err(|source| KeeperError::Io {
                path: Some(log_path.clone()),
                source,
            })?;
        let log_len = log
            .metadata()
            .map_err(|source| KeeperError::Io {
                path: Some(log_path.clone()),
                source,
            })?
            .len();

        let entries = match load_index(&index_path, log_len) {
            Some(entries) => entries,
            None => {
                let entries = scan_log(&log_path)?;
                write_index(&index_path, &entries)?;
                entries
            }
        };

        let mut by_uuid = HashMap::with_capacity(entries.len());
        for (seq, entry) in entries.iter().enumerate() {
            by_uuid.insert(entry.uuid, seq as u64);
        }

        Ok(Self {
            log_path,
            index_path,
            log,
            log_len,
            entries,
            by_uuid,
        })
    }

    fn io_err(&self, source: std::io::Error) -> KeeperError {
        KeeperError::Io {
            path: Some(self.log_path.clone()),
            source,
        }
    }

    fn read_at(&self, seq: u64) -> Result<Event, KeeperError> {
        let len = self.entries.len() as u64;
        let entry = self
            .entries
            .get(seq as usize)
            .copied()
            .ok_or(KeeperError::SeqOutOfRange { seq, len })?;

        let mut file = File::open(&self.log_path).map_err(|e| self.io_err(e))?;
        file.seek(SeekFrom::Start(entry.offset))
            .map_err(|e| self.io_err(e))?;
        let mut buf = vec![0u8; entry.len as usize];
        file.read_exact(&mut buf).map_err(|e| self.io_err(e))?;

        let body = decode_frame(&buf)?;
        Event::decode(&body).map_err(|err| KeeperError::Decode {
            seq: Some(seq),
            reason: err.to_string(),
        })
    }
}

impl RecordKeeper for FsRecordKeeper {
    fn append(&mut self, event: &Event) -> Result<crate::core::Token, KeeperError> {
        let token = require_token(event)?;
        if self.by_uuid.contains_key(&event.uuid) {
            return Err(KeeperError::EventExists { uuid: event.uuid });
        }

        let body = event.encoded_bytes()?;
        let frame = encode_frame(&body)?;

        self.log.write_all(&frame).map_err(|e| self.io_err(e))?;
        self.log.sync_all().map_err(|e| self.io_err(e))?;

        let entry = IndexEntry {
            uuid: event.uuid,
            offset: self.log_len,
            len: frame.len() as u32,
        };
        self.log_len += frame.len() as u64;
        self.by_uuid.insert(entry.uuid, self.entries.len() as u64);
        self.entries.push(entry);
        append_index_entry(&self.index_path, &entry);

        Ok(token)
    }

    fn read(&self, uuid: &Uuid) -> Result<Event, KeeperError> {
        let seq = *self
            .by_uuid
            .get(uuid)
            .ok_or(KeeperError::NotFound { uuid: *uuid })?;
        self.read_at(seq)
    }

    fn exists(&self, uuid: &Uuid) -> Result<bool, KeeperError> {
        Ok(self.by_uuid.contains_key(uuid))
    }

    fn at(&self, seq: u64) -> Result<Event, KeeperError> {
        self.read_at(seq)
    }

    fn len(&self) -> Result<u64, KeeperError> {
        Ok(self.entries.len() as u64)
    }

    fn tail(&self) -> Result<Option<Event>, KeeperError> {
        match self.entries.len() {
            0 => Ok(None),
            n => self.read_at(n as u64 - 1).map(Some),
        }
    }

    fn next(&self, after: Option<&Uuid>, limit: usize) -> Result<Vec<Event>, KeeperError> {
        let start = match after {
            None => 0,
            Some(uuid) => {
                *self
                    .by_uuid
                    .get(uuid)
                    .ok_or(KeeperError::UnknownAfter { uuid: *uuid })?
                    + 1
            }
        };
        let end = (start + limit as u64).min(self.entries.len() as u64);
        (start..end).map(|seq| self.read_at(seq)).collect()
    }
}

fn load_index(index_path: &Path, log_len: u64) -> Option<Vec<IndexEntry>> {
    let bytes = std::fs::read(index_path).ok()?;
    if bytes.len() < INDEX_MAGIC.len() || &bytes[..INDEX_MAGIC.len()] != INDEX_MAGIC {
        return None;
    }
    let body = &bytes[INDEX_MAGIC.len()..];
    if body.len() % INDEX_ENTRY_LEN != 0 {
        return None;
    }

    let entries: Vec<IndexEntry> = body.chunks(INDEX_ENTRY_LEN).map(IndexEntry::decode).collect();

    // The index is trustworthy only if it accounts for the whole log.
    let covered: u64 = entries.iter().map(|e| e.len as u64).sum();
    if covered != log_len {
        return None;
    }
    let mut expected_offset = 0u64;
    for entry in &entries {
        if entry.offset != expected_offset {
            return None;
        }
        expected_offset += entry.len as u64;
    }
    Some(entries)
}

fn scan_log(log_path: &Path) -> Result<Vec<IndexEntry>, KeeperError> {
    let file = File::open(log_path).map_err(|source| KeeperError::Io {
        path: Some(log_path.to_path_buf()),
        source,
    })?;
    let mut reader = FrameReader::new(file);
    let mut entries = Vec::new();
    while let Some(frame) = reader.read_next()? {
        let event = Event::decode(&frame.body).map_err(|err| KeeperError::Decode {
            seq: Some(entries.len() as u64),
            reason: err.to_string(),
        })?;
        entries.push(IndexEntry {
            uuid: event.uuid,
            offset: frame.offset,
            len: frame.len,
        });
    }
    Ok(entries)
}

fn write_index(index_path: &Path, entries: &[IndexEntry]) -> Result<(), KeeperError> {
    let mut buf = Vec::with_capacity(INDEX_MAGIC.len() + entries.len() * INDEX_ENTRY_LEN);
    buf.extend_from_slice(INDEX_MAGIC);
    for entry in entries {
        buf.extend_from_slice(&entry.encode());
    }
    std::fs::write(index_path, buf).map_err(|source| KeeperError::Io {
        path: Some(index_path.to_path_buf()),
        source,
    })
}

/// Best effort: a stale or short index is rebuilt on next open.
fn append_index_entry(index_path: &Path, entry: &IndexEntry) {
    let result = OpenOptions::new()
        .append(true)
        .open(index_path)
        .and_then(|mut file| file.write_all(&entry.encode()));
    if let Err(err) = result {
        tracing::warn!(path = %index_path.display(), %err, "index append failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::IntegrityMode;
    use crate::keeper::tests::{chained_event, exercise_keeper};
    use crate::keeper::Verification;

    #[test]
    fn fs_keeper_passes_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut keeper = FsRecordKeeper::open(dir.path()).unwrap();
        exercise_keeper(&mut keeper);
    }

    #[test]
    fn fs_keeper_reopens_with_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut uuids = Vec::new();
        {
            let mut keeper = FsRecordKeeper::open(dir.path()).unwrap();
            let mut prev = None;
            for i in 0..3 {
                let event = chained_event(prev.as_ref(), &format!("obj-{i}"));
                keeper.append(&event).unwrap();
                uuids.push(event.uuid);
                prev = event.integrity.clone();
            }
        }

        let keeper = FsRecordKeeper::open(dir.path()).unwrap();
        assert_eq!(keeper.len().unwrap(), 3);
        for uuid in &uuids {
            assert!(keeper.exists(uuid).unwrap());
        }
    }

    #[test]
    fn fs_keeper_rebuilds_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut keeper = FsRecordKeeper::open(dir.path()).unwrap();
            let event = chained_event(None, "obj");
            keeper.append(&event).unwrap();
        }
        std::fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();

        let keeper = FsRecordKeeper::open(dir.path()).unwrap();
        assert_eq!(keeper.len().unwrap(), 1);
        assert!(dir.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn fs_keeper_detects_payload_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut keeper = FsRecordKeeper::open(dir.path()).unwrap();
        let mut prev = None;
        for i in 0..5 {
            let event = chained_event(prev.as_ref(), &format!("obj-{i}"));
            keeper.append(&event).unwrap();
            prev = event.integrity.clone();
        }

        // Overwrite part of event #3's payload in place, same length.
        let entry = keeper.entries[3];
        let mut file = OpenOptions::new()
            .write(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        file.seek(SeekFrom::Start(entry.offset + 40)).unwrap();
        file.write_all(b"XXXX").unwrap();

        assert_eq!(
            keeper.verify(IntegrityMode::Chain).unwrap(),
            Verification::TamperedAt(3)
        );
    }
}
