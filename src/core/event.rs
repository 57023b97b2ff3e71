//! Event model: the closed sum of everything that can happen to a dataset.
//!
//! Every mutation is captured as an [`Event`]; current state is derived by
//! replaying them. The wire form is flat JSON with a `type` tag; canonical
//! serialization excludes the `integrity` field so the token can bind the
//! rest of the event.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use super::digest::{hex_decode, hex_encode, ContentDigest, HashType};
use super::error::CoreError;
use super::id::Identifier;
use super::json_canon::{canon_value_bytes, CanonJsonError};
use super::time::timestamp_now;

/// Numeric action code carried on create/update payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
}

impl Action {
    fn code(self) -> u8 {
        match self {
            Action::Create => 1,
            Action::Update => 2,
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(Action::Create),
            2 => Ok(Action::Update),
            other => Err(serde::de::Error::custom(format!(
                "unknown action code {other}"
            ))),
        }
    }
}

/// Numeric action code carried on owner events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerAction {
    Add,
    Remove,
}

impl OwnerAction {
    fn code(self) -> u8 {
        match self {
            OwnerAction::Add => 1,
            OwnerAction::Remove => 2,
        }
    }
}

impl Serialize for OwnerAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for OwnerAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(OwnerAction::Add),
            2 => Ok(OwnerAction::Remove),
            other => Err(serde::de::Error::custom(format!(
                "unknown owner action code {other}"
            ))),
        }
    }
}

/// One revision of an object: an arbitrary binary file held in the depot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub uuid: Uuid,
    pub version: u64,
    pub name: String,
    pub format: String,
    pub size: u64,
    pub hash_type: HashType,
    pub hash: ContentDigest,
}

impl ObjectRecord {
    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.uuid, self.version)
    }
}

/// MIME type every schema revision is stored under.
pub const SCHEMA_FORMAT: &str = "application/schema+json";

/// Prefix required on every schema name.
pub const SCHEMA_NAME_PREFIX: &str = "schema-";

/// One revision of a JSON Schema governing annotation shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub uuid: Uuid,
    pub version: u64,
    pub name: String,
    pub format: String,
    pub size: u64,
    pub hash_type: HashType,
    pub hash: ContentDigest,
}

impl SchemaRecord {
    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.uuid, self.version)
    }
}

/// One revision of an annotation: a schema-validated JSON blob linked to
/// one or more object revisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub uuid: Uuid,
    pub version: u64,
    pub schema: Identifier,
    pub size: u64,
    pub hash_type: HashType,
    pub hash: ContentDigest,
}

impl AnnotationRecord {
    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.uuid, self.version)
    }
}

/// Per-event integrity token: a chain hash or an Ed25519 signature,
/// depending on the installation's integrity mode. Hex on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(pub Vec<u8>);

impl Token {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        hex_decode(raw)
            .map(Token)
            .ok_or_else(|| CoreError::integrity("token", format!("token `{raw}` is not hex")))
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", self.to_hex())
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Token::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Event payload variants. The `type` tag on the wire uses the long-form
/// event names so logs written by older installations parse unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "OwnerAddEvent")]
    OwnerAdd { owner: String, owner_action: OwnerAction },
    #[serde(rename = "OwnerRemoveEvent")]
    OwnerRemove { owner: String, owner_action: OwnerAction },
    #[serde(rename = "ObjectCreateEvent")]
    ObjectCreate { object: ObjectRecord, action: Action },
    #[serde(rename = "ObjectUpdateEvent")]
    ObjectUpdate { object: ObjectRecord, action: Action },
    #[serde(rename = "ObjectDeleteEvent")]
    ObjectDelete { object_identifier: Identifier },
    #[serde(rename = "SchemaCreateEvent")]
    SchemaCreate { schema: SchemaRecord, action: Action },
    #[serde(rename = "SchemaUpdateEvent")]
    SchemaUpdate { schema: SchemaRecord, action: Action },
    #[serde(rename = "SchemaDeprecateEvent")]
    SchemaDeprecate { schema_identifier: Identifier },
    #[serde(rename = "AnnotationCreateEvent")]
    AnnotationCreate {
        annotation: AnnotationRecord,
        object_identifiers: Vec<Identifier>,
        action: Action,
    },
    #[serde(rename = "AnnotationUpdateEvent")]
    AnnotationUpdate { annotation: AnnotationRecord, action: Action },
    #[serde(rename = "AnnotationDeleteEvent")]
    AnnotationDelete { annotation_identifier: Identifier },
    #[serde(rename = "ReviewAcceptEvent")]
    ReviewAccept { event_uuid: Uuid },
    #[serde(rename = "ReviewRejectEvent")]
    ReviewReject { event_uuid: Uuid },
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::OwnerAdd { .. } => "OwnerAddEvent",
            EventKind::OwnerRemove { .. } => "OwnerRemoveEvent",
            EventKind::ObjectCreate { .. } => "ObjectCreateEvent",
            EventKind::ObjectUpdate { .. } => "ObjectUpdateEvent",
            EventKind::ObjectDelete { .. } => "ObjectDeleteEvent",
            EventKind::SchemaCreate { .. } => "SchemaCreateEvent",
            EventKind::SchemaUpdate { .. } => "SchemaUpdateEvent",
            EventKind::SchemaDeprecate { .. } => "SchemaDeprecateEvent",
            EventKind::AnnotationCreate { .. } => "AnnotationCreateEvent",
            EventKind::AnnotationUpdate { .. } => "AnnotationUpdateEvent",
            EventKind::AnnotationDelete { .. } => "AnnotationDeleteEvent",
            EventKind::ReviewAccept { .. } => "ReviewAcceptEvent",
            EventKind::ReviewReject { .. } => "ReviewRejectEvent",
        }
    }

    /// Review events may only target non-review events.
    pub fn is_review(&self) -> bool {
        matches!(
            self,
            EventKind::ReviewAccept { .. } | EventKind::ReviewReject { .. }
        )
    }

    /// Owner events take effect on append and are never reviewed.
    pub fn is_reviewable(&self) -> bool {
        !self.is_review()
            && !matches!(
                self,
                EventKind::OwnerAdd { .. } | EventKind::OwnerRemove { .. }
            )
    }

    pub fn owner_add(owner: impl Into<String>) -> Self {
        EventKind::OwnerAdd {
            owner: owner.into(),
            owner_action: OwnerAction::Add,
        }
    }

    pub fn owner_remove(owner: impl Into<String>) -> Self {
        EventKind::OwnerRemove {
            owner: owner.into(),
            owner_action: OwnerAction::Remove,
        }
    }

    pub fn object_create(object: ObjectRecord) -> Self {
        EventKind::ObjectCreate {
            object,
            action: Action::Create,
        }
    }

    pub fn object_update(object: ObjectRecord) -> Self {
        EventKind::ObjectUpdate {
            object,
            action: Action::Update,
        }
    }

    pub fn schema_create(schema: SchemaRecord) -> Self {
        EventKind::SchemaCreate {
            schema,
            action: Action::Create,
        }
    }

    pub fn schema_update(schema: SchemaRecord) -> Self {
        EventKind::SchemaUpdate {
            schema,
            action: Action::Update,
        }
    }

    pub fn annotation_create(
        annotation: AnnotationRecord,
        object_identifiers: Vec<Identifier>,
    ) -> Self {
        EventKind::AnnotationCreate {
            annotation,
            object_identifiers,
            action: Action::Create,
        }
    }

    pub fn annotation_update(annotation: AnnotationRecord) -> Self {
        EventKind::AnnotationUpdate {
            annotation,
            action: Action::Update,
        }
    }
}

/// Event envelope. Author attribution depends on the integrity mode:
/// a username under hash chaining, a verifying key under signatures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uuid: Uuid,
    pub author: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Token>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// A freshly-minted event with a new UUID and the current wall clock.
    /// The integrity token is attached later, just before append.
    pub fn new(author: impl Into<String>, kind: EventKind) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            author: author.into(),
            timestamp: timestamp_now(),
            integrity: None,
            kind,
        }
    }

    /// Canonical serialization of this event with the `integrity` field
    /// removed. This is the byte string tokens are computed over.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CanonJsonError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("integrity");
        }
        canon_value_bytes(value)
    }

    /// Full canonical serialization, including the token. This is the form
    /// record keepers persist.
    pub fn encoded_bytes(&self) -> Result<Vec<u8>, CanonJsonError> {
        let value = serde_json::to_value(self)?;
        canon_value_bytes(value)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes).map_err(|err| {
            CoreError::integrity("decode", format!("event body failed to parse: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::sha256_bytes;

    pub(crate) fn sample_object(uuid: Uuid, version: u64) -> ObjectRecord {
        let bytes = b"sample bytes";
        ObjectRecord {
            uuid,
            version,
            name: "obj.txt".to_string(),
            format: "text/plain".to_string(),
            size: bytes.len() as u64,
            hash_type: HashType::Sha256,
            hash: sha256_bytes(bytes),
        }
    }

    #[test]
    fn event_wire_form_is_flat_with_type_tag() {
        let uuid = Uuid::from_bytes([3u8; 16]);
        let event = Event::new("alice", EventKind::object_create(sample_object(uuid, 0)));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "ObjectCreateEvent");
        assert_eq!(value["author"], "alice");
        assert_eq!(value["action"], 1);
        assert_eq!(value["object"]["version"], 0);
        assert!(value.get("integrity").is_none());
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn event_roundtrips_through_encoded_bytes() {
        let uuid = Uuid::from_bytes([4u8; 16]);
        let mut event = Event::new("bob", EventKind::object_create(sample_object(uuid, 0)));
        event.integrity = Some(Token(vec![0xab; 32]));

        let bytes = event.encoded_bytes().unwrap();
        let decoded = Event::decode(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn canonical_bytes_exclude_integrity() {
        let uuid = Uuid::from_bytes([5u8; 16]);
        let mut event = Event::new("carol", EventKind::ReviewAccept { event_uuid: uuid });
        let before = event.canonical_bytes().unwrap();
        event.integrity = Some(Token(vec![1, 2, 3]));
        let after = event.canonical_bytes().unwrap();
        assert_eq!(before, after);
        assert!(!String::from_utf8(before).unwrap().contains("integrity"));
    }

    #[test]
    fn owner_events_carry_numeric_action() {
        let event = Event::new("alice", EventKind::owner_add("bob"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "OwnerAddEvent");
        assert_eq!(value["owner"], "bob");
        assert_eq!(value["owner_action"], 1);
    }

    #[test]
    fn review_and_owner_events_are_not_reviewable() {
        let target = Uuid::new_v4();
        assert!(!EventKind::ReviewAccept { event_uuid: target }.is_reviewable());
        assert!(!EventKind::owner_add("x").is_reviewable());
        let obj = sample_object(Uuid::new_v4(), 0);
        assert!(EventKind::object_create(obj).is_reviewable());
    }
}
