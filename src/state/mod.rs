//! State: the queryable projection derived from the event log.
//!
//! A projection holds no authority of its own; it is rebuilt from the
//! record keeper at any time and two backends replaying the same log must
//! produce byte-identical snapshots. Validation runs once, in
//! [`gate::validate`], against the read half of the contract.

pub mod gate;
mod mem;
mod sqlite;

pub use mem::MemoryState;
pub use sqlite::SqliteState;

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::core::{
    AnnotationRecord, CoreError, Event, Identifier, ObjectRecord, ReviewStatus, SchemaRecord,
    Status,
};

/// Listing entry for objects and annotations: a UUID and how many versions
/// it has (versions are dense, so this is `max_version + 1`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityInfo {
    pub uuid: Uuid,
    pub versions: u64,
}

/// Listing entry for schemas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaInfo {
    pub name: String,
    pub uuid: Uuid,
    pub versions: u64,
}

/// What accepting a reviewable event does to the projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetAction {
    ObjectWrite(Identifier),
    ObjectDelete(Identifier),
    SchemaWrite(Identifier),
    SchemaDeprecate(Identifier),
    AnnotationWrite(Identifier),
    AnnotationDelete(Identifier),
}

/// Review bookkeeping for one logged event. `action` is `None` for owner
/// and review events, which are not themselves reviewable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReviewRecord {
    pub action: Option<TargetAction>,
    pub status: ReviewStatus,
}

/// Read half of the state contract. Everything the validation gate and the
/// query paths need; implementations must not mutate.
pub trait StateView {
    fn owners(&self) -> Result<Vec<String>, CoreError>;

    fn object_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError>;
    fn object_record(&self, id: &Identifier) -> Result<Option<ObjectRecord>, CoreError>;
    fn object_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError>;
    fn list_objects(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<EntityInfo>, CoreError>;
    fn objects_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<Identifier>, CoreError>;

    /// Resolve a schema name to the UUID that currently owns it (the most
    /// recently created schema under that name with a live version).
    fn resolve_schema(&self, name: &str) -> Result<Option<Uuid>, CoreError>;
    /// Whether any schema version under this name is pending or accepted.
    fn schema_name_active(&self, name: &str) -> Result<bool, CoreError>;
    fn schema_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError>;
    fn schema_record(&self, id: &Identifier) -> Result<Option<SchemaRecord>, CoreError>;
    fn schema_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError>;
    fn list_schemas(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<SchemaInfo>, CoreError>;
    fn schemas_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<(Identifier, String)>, CoreError>;

    fn annotation_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError>;
    fn annotation_record(&self, id: &Identifier) -> Result<Option<AnnotationRecord>, CoreError>;
    fn annotation_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError>;
    fn list_annotations(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<EntityInfo>, CoreError>;
    fn annotations_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<Identifier>, CoreError>;

    /// Object identifiers an annotation was linked to at creation.
    fn annotation_objects(&self, uuid: &Uuid) -> Result<Vec<Identifier>, CoreError>;
    /// Annotation UUIDs linked to an object revision.
    fn object_annotations(&self, id: &Identifier) -> Result<Vec<Uuid>, CoreError>;

    /// Event UUIDs that touched an entity revision, in append order.
    fn entity_events(&self, id: &Identifier) -> Result<Vec<Uuid>, CoreError>;

    fn review_record(&self, event_uuid: &Uuid) -> Result<Option<ReviewRecord>, CoreError>;

    /// Deterministic full dump of the projection, for replay comparison.
    fn snapshot(&self) -> Result<Snapshot, CoreError>;
}

/// Full state contract: the read half plus event application.
pub trait State: StateView + Send + Sync {
    /// Fold one event into the projection. Callers must have validated the
    /// event first; `apply` trusts its input.
    fn apply(&mut self, event: &Event) -> Result<(), CoreError>;
}

/// Canonical dump of a projection. Two backends that replayed the same log
/// serialize to identical canonical JSON.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub owners: Vec<String>,
    pub objects: BTreeMap<String, Vec<ObjectRecord>>,
    pub object_status: BTreeMap<String, Status>,
    pub schemas: BTreeMap<String, Vec<SchemaRecord>>,
    pub schema_status: BTreeMap<String, Status>,
    pub annotations: BTreeMap<String, Vec<AnnotationRecord>>,
    pub annotation_status: BTreeMap<String, Status>,
    pub annotation_objects: BTreeMap<String, Vec<Identifier>>,
    pub entity_events: BTreeMap<String, Vec<String>>,
    pub reviews: BTreeMap<String, ReviewStatus>,
}

impl Snapshot {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(crate::core::to_canon_json_bytes(self)?)
    }
}

/// Paginate a sorted list of UUID-keyed entries. `after` is exclusive and
/// must name a known key.
pub(crate) fn paginate_entries<T>(
    entries: Vec<(Uuid, T)>,
    after: Option<&Uuid>,
    limit: usize,
) -> Result<Vec<T>, CoreError> {
    let start = match after {
        None => 0,
        Some(cursor) => {
            // Last occurrence: a cursor UUID may span several versions.
            let pos = entries.iter().rposition(|(uuid, _)| uuid == cursor);
            match pos {
                Some(pos) => pos + 1,
                None => {
                    return Err(CoreError::validation(
                        "after",
                        format!("unknown pagination cursor {cursor}"),
                    ))
                }
            }
        }
    };
    Ok(entries
        .into_iter()
        .skip(start)
        .take(limit)
        .map(|(_, value)| value)
        .collect())
}
