//! Integrity tokens: hash chaining and Ed25519 signatures.
//!
//! Hash-chain mode binds each event to its predecessor so any rewrite of
//! the log is detectable from that point forward. Signature mode produces
//! independently verifiable events for future federation; within one
//! installation events are still ordered by append position.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::core::{hex_decode, hex_encode, CoreError, Event, Token};

/// Which token scheme an installation runs. Fixed at init time; mixing
/// modes within one log is not supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityMode {
    #[default]
    Chain,
    Signature,
}

/// Ed25519 key material for signature mode.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

#[derive(Serialize, Deserialize)]
struct KeyPairFile {
    signing_key: String,
    verify_key: String,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    pub fn verify_key_hex(&self) -> String {
        hex_encode(self.signing.verifying_key().as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            CoreError::integrity("keys", format!("failed to read {}: {err}", path.display()))
        })?;
        let file: KeyPairFile = serde_json::from_str(&raw).map_err(|err| {
            CoreError::integrity("keys", format!("failed to parse {}: {err}", path.display()))
        })?;
        let bytes = hex_decode(&file.signing_key)
            .filter(|b| b.len() == 32)
            .ok_or_else(|| CoreError::integrity("keys", "signing key is not 64 hex characters"))?;
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes);
        Ok(Self {
            signing: SigningKey::from_bytes(&secret),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let file = KeyPairFile {
            signing_key: hex_encode(&self.signing.to_bytes()),
            verify_key: self.verify_key_hex(),
        };
        let raw = serde_json::to_string_pretty(&file)
            .map_err(|err| CoreError::integrity("keys", err.to_string()))?;
        fs::write(path, raw).map_err(|err| {
            CoreError::integrity("keys", format!("failed to write {}: {err}", path.display()))
        })
    }
}

/// Attaches integrity tokens to outbound events.
pub enum Linker {
    Chain,
    Signature(KeyPair),
}

impl Linker {
    pub fn mode(&self) -> IntegrityMode {
        match self {
            Linker::Chain => IntegrityMode::Chain,
            Linker::Signature(_) => IntegrityMode::Signature,
        }
    }

    /// Compute and set the token for `event`, given the tail event's token
    /// (`None` for the first event in a log).
    ///
    /// In signature mode the author field is rewritten to the verifying
    /// key, since that is what verification resolves authors against.
    pub fn attach(&self, event: &mut Event, prev: Option<&Token>) -> Result<(), CoreError> {
        match self {
            Linker::Chain => {
                let token = chain_token(event, prev)?;
                event.integrity = Some(token);
            }
            Linker::Signature(keypair) => {
                event.author = keypair.verify_key_hex();
                let bytes = event.canonical_bytes()?;
                let signature = keypair.signing.sign(&bytes);
                event.integrity = Some(Token(signature.to_bytes().to_vec()));
            }
        }
        Ok(())
    }
}

fn chain_token(event: &Event, prev: Option<&Token>) -> Result<Token, CoreError> {
    let bytes = event.canonical_bytes()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    if let Some(prev) = prev {
        hasher.update(prev.as_bytes());
    }
    Ok(Token(hasher.finalize().to_vec()))
}

/// Verify one event's token against its predecessor's.
pub fn check_event(mode: IntegrityMode, event: &Event, prev: Option<&Token>) -> Result<(), CoreError> {
    let token = event
        .integrity
        .as_ref()
        .ok_or_else(|| CoreError::integrity("token", format!("event {} has no token", event.uuid)))?;

    match mode {
        IntegrityMode::Chain => {
            let expected = chain_token(event, prev)?;
            if expected != *token {
                return Err(CoreError::integrity(
                    "chain",
                    format!("event {} diverges from the hash chain", event.uuid),
                ));
            }
        }
        IntegrityMode::Signature => {
            let key_bytes = hex_decode(&event.author)
                .filter(|b| b.len() == 32)
                .ok_or_else(|| {
                    CoreError::integrity(
                        "signature",
                        format!("event {} author is not a verifying key", event.uuid),
                    )
                })?;
            let mut buf = [0u8; 32];
            buf.copy_from_slice(&key_bytes);
            let key = VerifyingKey::from_bytes(&buf).map_err(|err| {
                CoreError::integrity("signature", format!("bad verifying key: {err}"))
            })?;

            let sig_bytes: [u8; 64] = token.as_bytes().try_into().map_err(|_| {
                CoreError::integrity(
                    "signature",
                    format!("event {} token is not a 64-byte signature", event.uuid),
                )
            })?;
            let signature = Signature::from_bytes(&sig_bytes);
            let bytes = event.canonical_bytes()?;
            key.verify(&bytes, &signature).map_err(|_| {
                CoreError::integrity(
                    "signature",
                    format!("event {} signature failed to verify", event.uuid),
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{sha256_bytes, EventKind, HashType, ObjectRecord};
    use uuid::Uuid;

    fn sample_event(author: &str) -> Event {
        let bytes = b"payload";
        Event::new(
            author,
            EventKind::object_create(ObjectRecord {
                uuid: Uuid::new_v4(),
                version: 0,
                name: "obj.bin".to_string(),
                format: "application/octet-stream".to_string(),
                size: bytes.len() as u64,
                hash_type: HashType::Sha256,
                hash: sha256_bytes(bytes),
            }),
        )
    }

    #[test]
    fn chain_token_matches_definition() {
        let mut first = sample_event("alice");
        Linker::Chain.attach(&mut first, None).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(first.canonical_bytes().unwrap());
        assert_eq!(
            first.integrity.as_ref().unwrap().as_bytes(),
            hasher.finalize().as_slice()
        );

        let mut second = sample_event("alice");
        let prev = first.integrity.clone().unwrap();
        Linker::Chain.attach(&mut second, Some(&prev)).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(second.canonical_bytes().unwrap());
        hasher.update(prev.as_bytes());
        assert_eq!(
            second.integrity.as_ref().unwrap().as_bytes(),
            hasher.finalize().as_slice()
        );
    }

    #[test]
    fn chain_check_detects_divergence() {
        let mut event = sample_event("alice");
        Linker::Chain.attach(&mut event, None).unwrap();
        check_event(IntegrityMode::Chain, &event, None).unwrap();

        event.author = "mallory".to_string();
        let err = check_event(IntegrityMode::Chain, &event, None).unwrap_err();
        assert_eq!(err.reason(), Some("chain"));
    }

    #[test]
    fn signature_roundtrip_and_tamper() {
        let keypair = KeyPair::generate();
        let linker = Linker::Signature(keypair);
        let mut event = sample_event("ignored");
        linker.attach(&mut event, None).unwrap();

        check_event(IntegrityMode::Signature, &event, None).unwrap();

        event.timestamp = "1999-01-01T00:00:00.000000Z".to_string();
        let err = check_event(IntegrityMode::Signature, &event, None).unwrap_err();
        assert_eq!(err.reason(), Some("signature"));
    }

    #[test]
    fn keypair_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let keypair = KeyPair::generate();
        keypair.save(&path).unwrap();
        let loaded = KeyPair::load(&path).unwrap();
        assert_eq!(keypair.verify_key_hex(), loaded.verify_key_hex());
    }
}
