//! Event framing for the filesystem log (magic + length + crc32c).

use std::io::Read;

use crc32c::crc32c;

use super::KeeperError;

const FRAME_MAGIC: u32 = 0x4352_4C31; // "CRL1"
pub(crate) const FRAME_HEADER_LEN: usize = 12;

/// Events carry digests, never blob bytes, so frames stay small.
pub(crate) const MAX_EVENT_BYTES: usize = 1024 * 1024;

pub(crate) fn encode_frame(body: &[u8]) -> Result<Vec<u8>, KeeperError> {
    if body.is_empty() {
        return Err(KeeperError::FrameLengthInvalid {
            reason: "frame body cannot be empty".to_string(),
        });
    }
    if body.len() > MAX_EVENT_BYTES {
        return Err(KeeperError::FrameLengthInvalid {
            reason: format!("event body {} exceeds {MAX_EVENT_BYTES} bytes", body.len()),
        });
    }

    let length = body.len() as u32;
    let crc = crc32c(body);

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Decode one complete frame from a buffer of exactly frame length.
pub(crate) fn decode_frame(buf: &[u8]) -> Result<Vec<u8>, KeeperError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(KeeperError::FrameLengthInvalid {
            reason: "frame truncated".to_string(),
        });
    }

    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != FRAME_MAGIC {
        return Err(KeeperError::FrameMagicMismatch { got: magic });
    }

    let length = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if length == 0 || length > MAX_EVENT_BYTES {
        return Err(KeeperError::FrameLengthInvalid {
            reason: format!("frame length {length} out of range"),
        });
    }
    if buf.len() != FRAME_HEADER_LEN + length {
        return Err(KeeperError::FrameLengthInvalid {
            reason: format!(
                "frame buffer is {} bytes, header says {}",
                buf.len(),
                FRAME_HEADER_LEN + length
            ),
        });
    }

    let expected_crc = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let body = &buf[FRAME_HEADER_LEN..];
    let actual_crc = crc32c(body);
    if actual_crc != expected_crc {
        return Err(KeeperError::FrameCrcMismatch {
            expected: expected_crc,
            got: actual_crc,
        });
    }

    Ok(body.to_vec())
}

/// Streaming reader used to rebuild the offset index by scanning the log.
pub(crate) struct FrameReader<R> {
    reader: R,
    offset: u64,
}

pub(crate) struct ScannedFrame {
    pub offset: u64,
    pub len: u32,
    pub body: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Next frame, or `None` at a clean end of log.
    pub fn read_next(&mut self) -> Result<Option<ScannedFrame>, KeeperError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut read = 0usize;
        while read < header.len() {
            let n = self
                .reader
                .read(&mut header[read..])
                .map_err(|source| KeeperError::Io { path: None, source })?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(KeeperError::FrameLengthInvalid {
                    reason: "log ends mid-header".to_string(),
                });
            }
            read += n;
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != FRAME_MAGIC {
            return Err(KeeperError::FrameMagicMismatch { got: magic });
        }
        let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if length == 0 || length > MAX_EVENT_BYTES {
            return Err(KeeperError::FrameLengthInvalid {
                reason: format!("frame length {length} out of range"),
            });
        }
        let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .map_err(|source| KeeperError::Io { path: None, source })?;

        let actual_crc = crc32c(&body);
        if actual_crc != expected_crc {
            return Err(KeeperError::FrameCrcMismatch {
                expected: expected_crc,
                got: actual_crc,
            });
        }

        let frame = ScannedFrame {
            offset: self.offset,
            len: (FRAME_HEADER_LEN + length) as u32,
            body,
        };
        self.offset += frame.len as u64;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrip_validates_crc() {
        let frame = encode_frame(b"event body").unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), b"event body");
    }

    #[test]
    fn frame_crc_mismatch_fails() {
        let mut frame = encode_frame(b"event body").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            decode_frame(&frame),
            Err(KeeperError::FrameCrcMismatch { .. })
        ));
    }

    #[test]
    fn reader_scans_consecutive_frames() {
        let mut log = Vec::new();
        log.extend(encode_frame(b"first").unwrap());
        log.extend(encode_frame(b"second").unwrap());

        let mut reader = FrameReader::new(Cursor::new(log));
        let first = reader.read_next().unwrap().unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(first.body, b"first");
        let second = reader.read_next().unwrap().unwrap();
        assert_eq!(second.offset, first.len as u64);
        assert_eq!(second.body, b"second");
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn reader_rejects_truncated_tail() {
        let mut log = encode_frame(b"only").unwrap();
        log.truncate(log.len() - 2);
        let mut reader = FrameReader::new(Cursor::new(log));
        assert!(reader.read_next().is_err());
    }
}
