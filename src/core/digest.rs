//! Content digests and the hash-algorithm tag.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use super::error::CoreError;

/// Hash algorithm tag carried on entity records. The only supported
/// algorithm is SHA-256, wire value `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashType {
    Sha256,
}

impl HashType {
    pub fn code(self) -> u8 {
        match self {
            HashType::Sha256 => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, CoreError> {
        match code {
            1 => Ok(HashType::Sha256),
            other => Err(CoreError::Validation {
                reason: "hash-type",
                detail: format!("unknown hash type {other}"),
            }),
        }
    }
}

impl Serialize for HashType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for HashType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        HashType::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// A SHA-256 digest, rendered as lowercase hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let bytes = hex_decode(raw).ok_or_else(|| CoreError::Validation {
            reason: "digest",
            detail: format!("digest `{raw}` is not 64 lowercase hex characters"),
        })?;
        if bytes.len() != 32 {
            return Err(CoreError::Validation {
                reason: "digest",
                detail: format!("digest `{raw}` has length {}, expected 64", raw.len()),
            });
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&bytes);
        Ok(Self(buf))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ContentDigest::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Hash a byte slice with SHA-256.
pub fn sha256_bytes(data: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    ContentDigest(buf)
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Decode lowercase hex. Returns `None` on odd length, uppercase, or
/// non-hex input.
pub fn hex_decode(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(raw.len() / 2);
    let bytes = raw.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = hex_nibble(pair[0])?;
        let lo = hex_nibble(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Some(out)
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256("abc")
        let digest = sha256_bytes(b"abc");
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_roundtrips_through_hex() {
        let digest = sha256_bytes(b"roundtrip");
        let parsed = ContentDigest::parse(&digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn digest_parse_rejects_bad_input() {
        assert!(ContentDigest::parse("abc").is_err());
        assert!(ContentDigest::parse(&"G".repeat(64)).is_err());
        assert!(ContentDigest::parse(&"AB".repeat(32)).is_err());
    }

    #[test]
    fn hash_type_codes_are_stable() {
        assert_eq!(HashType::Sha256.code(), 1);
        assert!(HashType::from_code(2).is_err());
    }
}
