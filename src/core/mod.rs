//! Core domain model: identifiers, digests, events, statuses, and the
//! canonical JSON encoding that integrity tokens are computed over.

mod digest;
mod error;
mod event;
mod id;
mod json_canon;
mod schema;
mod status;
mod time;

pub use digest::{hex_decode, hex_encode, sha256_bytes, ContentDigest, HashType};
pub use error::CoreError;
pub use event::{
    Action, AnnotationRecord, Event, EventKind, ObjectRecord, OwnerAction, SchemaRecord, Token,
    SCHEMA_FORMAT, SCHEMA_NAME_PREFIX,
};
pub use id::Identifier;
pub use json_canon::{canon_value_bytes, to_canon_json_bytes, CanonJsonError};
pub use schema::CompiledSchema;
pub use status::{ReviewStatus, Status};
pub use time::{format_timestamp, timestamp_now};
