//! Dataset: the mutation pipeline and query surface over one event log.
//!
//! All mutations run under the dataset's write lock in a fixed order:
//! recompute digests, assign versions, validate against the projection,
//! attach the integrity token, then append → depot write → apply. Failure
//! after the append quarantines the event (log-present, bytes-missing)
//! until a repair supplies the bytes.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use uuid::Uuid;

use crate::core::{
    sha256_bytes, AnnotationRecord, CompiledSchema, ContentDigest, CoreError, Event, EventKind,
    HashType, Identifier, ObjectRecord, SchemaRecord, Token, SCHEMA_FORMAT,
};
use crate::depot::{Depot, DepotError};
use crate::integrity::{check_event, IntegrityMode, Linker};
use crate::keeper::{RecordKeeper, Verification};
use crate::state::{gate, EntityInfo, MemoryState, SchemaInfo, Snapshot, State};
use crate::Result;

/// Replay found a token that does not verify; the projection is only
/// trustworthy up to (not including) this sequence position.
#[derive(Debug, Error)]
#[error("event log verification failed at seq {first_bad_seq}; rebuild refused")]
pub struct RebuildError {
    pub first_bad_seq: u64,
}

/// Inbound blob bytes plus whatever the caller declared about them.
/// Declared values that disagree with the bytes are integrity errors and
/// nothing is appended.
pub struct BlobInput {
    pub bytes: Vec<u8>,
    pub declared_hash: Option<ContentDigest>,
    pub declared_size: Option<u64>,
}

impl BlobInput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            declared_hash: None,
            declared_size: None,
        }
    }

    fn checked_digest(&self) -> std::result::Result<(ContentDigest, u64), CoreError> {
        let digest = sha256_bytes(&self.bytes);
        if let Some(declared) = &self.declared_hash {
            if *declared != digest {
                return Err(CoreError::integrity(
                    "digest",
                    format!("declared hash {declared}, bytes hash to {digest}"),
                ));
            }
        }
        let size = self.bytes.len() as u64;
        if let Some(declared) = self.declared_size {
            if declared != size {
                return Err(CoreError::integrity(
                    "size",
                    format!("declared size {declared}, got {size} bytes"),
                ));
            }
        }
        Ok((digest, size))
    }
}

/// Full detail of one object revision.
pub struct ObjectDetail {
    pub object: ObjectRecord,
    pub bytes: Vec<u8>,
    pub events: Vec<Uuid>,
    pub annotations: Vec<Uuid>,
}

/// Full detail of one annotation revision.
pub struct AnnotationDetail {
    pub annotation: AnnotationRecord,
    pub bytes: Vec<u8>,
    pub events: Vec<Uuid>,
    pub objects: Vec<Identifier>,
}

struct Inner {
    keeper: Box<dyn RecordKeeper>,
    depot: Box<dyn Depot>,
    state: Box<dyn State>,
    linker: Linker,
    page_size: usize,
    /// Events appended whose depot write failed. Their effects are not
    /// promoted until a repair supplies the bytes.
    quarantine: HashMap<Uuid, Event>,
}

pub struct Dataset {
    name: String,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset").field("name", &self.name).finish()
    }
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        keeper: Box<dyn RecordKeeper>,
        depot: Box<dyn Depot>,
        state: Box<dyn State>,
        linker: Linker,
        page_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                keeper,
                depot,
                state,
                linker,
                page_size,
                quarantine: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|err| err.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|err| err.into_inner())
    }

    // ----- owners ---------------------------------------------------------

    pub fn owners(&self) -> Result<Vec<String>> {
        Ok(self.read().state.owners()?)
    }

    pub fn is_owner(&self, user: &str) -> Result<bool> {
        Ok(self.owners()?.iter().any(|o| o == user))
    }

    pub fn add_owner(&self, author: &str, owner: &str) -> Result<()> {
        let mut inner = self.write();
        let event = Event::new(author, EventKind::owner_add(owner));
        commit(&mut inner, event, None)?;
        Ok(())
    }

    pub fn remove_owner(&self, author: &str, owner: &str) -> Result<()> {
        let mut inner = self.write();
        let event = Event::new(author, EventKind::owner_remove(owner));
        commit(&mut inner, event, None)?;
        Ok(())
    }

    // ----- objects --------------------------------------------------------

    pub fn create_object(
        &self,
        author: &str,
        name: &str,
        format: &str,
        blob: BlobInput,
    ) -> Result<Identifier> {
        let (hash, size) = blob.checked_digest()?;
        let mut inner = self.write();
        let record = ObjectRecord {
            uuid: Uuid::new_v4(),
            version: 0,
            name: name.to_string(),
            format: format.to_string(),
            size,
            hash_type: HashType::Sha256,
            hash,
        };
        let id = record.identifier();
        let event = Event::new(author, EventKind::object_create(record));
        commit(&mut inner, event, Some((id, &blob.bytes, hash)))?;
        Ok(id)
    }

    pub fn update_object(
        &self,
        author: &str,
        uuid: Uuid,
        name: &str,
        format: &str,
        blob: BlobInput,
    ) -> Result<Identifier> {
        let (hash, size) = blob.checked_digest()?;
        let mut inner = self.write();
        let max = inner
            .state
            .object_max_version(&uuid)?
            .ok_or_else(|| CoreError::not_found("object", uuid.to_string()))?;
        let record = ObjectRecord {
            uuid,
            version: max + 1,
            name: name.to_string(),
            format: format.to_string(),
            size,
            hash_type: HashType::Sha256,
            hash,
        };
        let id = record.identifier();
        let event = Event::new(author, EventKind::object_update(record));
        commit(&mut inner, event, Some((id, &blob.bytes, hash)))?;
        Ok(id)
    }

    pub fn delete_object(&self, author: &str, id: Identifier) -> Result<()> {
        let mut inner = self.write();
        let event = Event::new(
            author,
            EventKind::ObjectDelete {
                object_identifier: id,
            },
        );
        commit(&mut inner, event, None)?;
        Ok(())
    }

    pub fn list_objects(&self, after: Option<&Uuid>) -> Result<Vec<EntityInfo>> {
        let inner = self.read();
        Ok(inner.state.list_objects(after, inner.page_size)?)
    }

    pub fn object_info(&self, uuid: &Uuid) -> Result<EntityInfo> {
        let inner = self.read();
        let max = inner
            .state
            .object_max_version(uuid)?
            .ok_or_else(|| CoreError::not_found("object", uuid.to_string()))?;
        Ok(EntityInfo {
            uuid: *uuid,
            versions: max + 1,
        })
    }

    pub fn objects_by_status(
        &self,
        status: crate::core::Status,
        after: Option<&Uuid>,
    ) -> Result<Vec<Identifier>> {
        let inner = self.read();
        Ok(inner.state.objects_by_status(status, after, inner.page_size)?)
    }

    pub fn object_detail(&self, id: Identifier) -> Result<ObjectDetail> {
        let inner = self.read();
        let object = inner
            .state
            .object_record(&id)?
            .ok_or_else(|| CoreError::not_found("object", id.to_string()))?;
        let bytes = inner.depot.read(&id)?;
        Ok(ObjectDetail {
            object,
            bytes,
            events: inner.state.entity_events(&id)?,
            annotations: inner.state.object_annotations(&id)?,
        })
    }

    // ----- schemas --------------------------------------------------------

    pub fn create_schema(&self, author: &str, name: &str, blob: BlobInput) -> Result<SchemaInfo> {
        let (hash, size) = blob.checked_digest()?;
        CompiledSchema::compile(&blob.bytes)?;
        let mut inner = self.write();
        let record = SchemaRecord {
            uuid: Uuid::new_v4(),
            version: 0,
            name: name.to_string(),
            format: SCHEMA_FORMAT.to_string(),
            size,
            hash_type: HashType::Sha256,
            hash,
        };
        let id = record.identifier();
        let event = Event::new(author, EventKind::schema_create(record));
        commit(&mut inner, event, Some((id, &blob.bytes, hash)))?;
        Ok(SchemaInfo {
            name: name.to_string(),
            uuid: id.uuid,
            versions: 1,
        })
    }

    pub fn update_schema(&self, author: &str, name: &str, blob: BlobInput) -> Result<SchemaInfo> {
        let (hash, size) = blob.checked_digest()?;
        CompiledSchema::compile(&blob.bytes)?;
        let mut inner = self.write();
        let uuid = inner
            .state
            .resolve_schema(name)?
            .ok_or_else(|| CoreError::not_found("schema", name))?;
        let max = inner
            .state
            .schema_max_version(&uuid)?
            .ok_or_else(|| CoreError::not_found("schema", name))?;
        let record = SchemaRecord {
            uuid,
            version: max + 1,
            name: name.to_string(),
            format: SCHEMA_FORMAT.to_string(),
            size,
            hash_type: HashType::Sha256,
            hash,
        };
        let id = record.identifier();
        let event = Event::new(author, EventKind::schema_update(record));
        commit(&mut inner, event, Some((id, &blob.bytes, hash)))?;
        Ok(SchemaInfo {
            name: name.to_string(),
            uuid,
            versions: max + 2,
        })
    }

    pub fn deprecate_schema(&self, author: &str, name: &str, version: u64) -> Result<Identifier> {
        let mut inner = self.write();
        let uuid = inner
            .state
            .resolve_schema(name)?
            .ok_or_else(|| CoreError::not_found("schema", name))?;
        let id = Identifier::new(uuid, version);
        let event = Event::new(
            author,
            EventKind::SchemaDeprecate {
                schema_identifier: id,
            },
        );
        commit(&mut inner, event, None)?;
        Ok(id)
    }

    pub fn list_schemas(&self, after: Option<&Uuid>) -> Result<Vec<SchemaInfo>> {
        let inner = self.read();
        Ok(inner.state.list_schemas(after, inner.page_size)?)
    }

    pub fn schema_summary(&self, name: &str) -> Result<SchemaInfo> {
        let inner = self.read();
        let uuid = inner
            .state
            .resolve_schema(name)?
            .ok_or_else(|| CoreError::not_found("schema", name))?;
        let max = inner
            .state
            .schema_max_version(&uuid)?
            .ok_or_else(|| CoreError::not_found("schema", name))?;
        Ok(SchemaInfo {
            name: name.to_string(),
            uuid,
            versions: max + 1,
        })
    }

    pub fn schemas_by_status(
        &self,
        status: crate::core::Status,
        after: Option<&Uuid>,
    ) -> Result<Vec<(Identifier, String)>> {
        let inner = self.read();
        Ok(inner.state.schemas_by_status(status, after, inner.page_size)?)
    }

    pub fn schema_detail(&self, name: &str, version: u64) -> Result<(SchemaRecord, Vec<u8>)> {
        let inner = self.read();
        let uuid = inner
            .state
            .resolve_schema(name)?
            .ok_or_else(|| CoreError::not_found("schema", name))?;
        let id = Identifier::new(uuid, version);
        let record = inner
            .state
            .schema_record(&id)?
            .ok_or_else(|| CoreError::not_found("schema", id.to_string()))?;
        let bytes = inner.depot.read(&id)?;
        Ok((record, bytes))
    }

    // ----- annotations ----------------------------------------------------

    pub fn create_annotation(
        &self,
        author: &str,
        schema_name: &str,
        schema_version: u64,
        object_identifiers: Vec<Identifier>,
        blob: BlobInput,
    ) -> Result<Identifier> {
        let (hash, size) = blob.checked_digest()?;
        let mut inner = self.write();
        let schema_ref = resolve_schema_ref(&inner, schema_name, schema_version)?;
        check_against_schema(&inner, &schema_ref, &blob.bytes)?;

        let record = AnnotationRecord {
            uuid: Uuid::new_v4(),
            version: 0,
            schema: schema_ref,
            size,
            hash_type: HashType::Sha256,
            hash,
        };
        let id = record.identifier();
        let event = Event::new(
            author,
            EventKind::annotation_create(record, object_identifiers),
        );
        commit(&mut inner, event, Some((id, &blob.bytes, hash)))?;
        Ok(id)
    }

    pub fn update_annotation(
        &self,
        author: &str,
        uuid: Uuid,
        schema_name: &str,
        schema_version: u64,
        blob: BlobInput,
    ) -> Result<Identifier> {
        let (hash, size) = blob.checked_digest()?;
        let mut inner = self.write();
        let schema_ref = resolve_schema_ref(&inner, schema_name, schema_version)?;
        check_against_schema(&inner, &schema_ref, &blob.bytes)?;

        let max = inner
            .state
            .annotation_max_version(&uuid)?
            .ok_or_else(|| CoreError::not_found("annotation", uuid.to_string()))?;
        let record = AnnotationRecord {
            uuid,
            version: max + 1,
            schema: schema_ref,
            size,
            hash_type: HashType::Sha256,
            hash,
        };
        let id = record.identifier();
        let event = Event::new(author, EventKind::annotation_update(record));
        commit(&mut inner, event, Some((id, &blob.bytes, hash)))?;
        Ok(id)
    }

    pub fn delete_annotation(&self, author: &str, id: Identifier) -> Result<()> {
        let mut inner = self.write();
        let event = Event::new(
            author,
            EventKind::AnnotationDelete {
                annotation_identifier: id,
            },
        );
        commit(&mut inner, event, None)?;
        Ok(())
    }

    pub fn list_annotations(&self, after: Option<&Uuid>) -> Result<Vec<EntityInfo>> {
        let inner = self.read();
        Ok(inner.state.list_annotations(after, inner.page_size)?)
    }

    pub fn annotation_info(&self, uuid: &Uuid) -> Result<EntityInfo> {
        let inner = self.read();
        let max = inner
            .state
            .annotation_max_version(uuid)?
            .ok_or_else(|| CoreError::not_found("annotation", uuid.to_string()))?;
        Ok(EntityInfo {
            uuid: *uuid,
            versions: max + 1,
        })
    }

    pub fn annotations_by_status(
        &self,
        status: crate::core::Status,
        after: Option<&Uuid>,
    ) -> Result<Vec<Identifier>> {
        let inner = self.read();
        Ok(inner
            .state
            .annotations_by_status(status, after, inner.page_size)?)
    }

    pub fn annotation_detail(&self, id: Identifier) -> Result<AnnotationDetail> {
        let inner = self.read();
        let annotation = inner
            .state
            .annotation_record(&id)?
            .ok_or_else(|| CoreError::not_found("annotation", id.to_string()))?;
        let bytes = inner.depot.read(&id)?;
        Ok(AnnotationDetail {
            annotation,
            bytes,
            events: inner.state.entity_events(&id)?,
            objects: inner.state.annotation_objects(&id.uuid)?,
        })
    }

    // ----- events and review ---------------------------------------------

    pub fn events(&self, after: Option<&Uuid>) -> Result<Vec<Event>> {
        let inner = self.read();
        Ok(inner.keeper.next(after, inner.page_size)?)
    }

    pub fn event(&self, uuid: &Uuid) -> Result<Event> {
        Ok(self.read().keeper.read(uuid)?)
    }

    pub fn accept_event(&self, author: &str, event_uuid: Uuid) -> Result<()> {
        let mut inner = self.write();
        let event = Event::new(author, EventKind::ReviewAccept { event_uuid });
        commit(&mut inner, event, None)?;
        Ok(())
    }

    pub fn reject_event(&self, author: &str, event_uuid: Uuid) -> Result<()> {
        let mut inner = self.write();
        let event = Event::new(author, EventKind::ReviewReject { event_uuid });
        commit(&mut inner, event, None)?;
        Ok(())
    }

    // ----- integrity and recovery ----------------------------------------

    pub fn verify(&self) -> Result<Verification> {
        let inner = self.read();
        let mode = inner.linker.mode();
        Ok(inner.keeper.verify(mode)?)
    }

    /// Events that are in the log but whose bytes never reached the depot.
    pub fn quarantined(&self) -> Vec<Uuid> {
        let inner = self.read();
        let mut uuids: Vec<Uuid> = inner.quarantine.keys().copied().collect();
        uuids.sort();
        uuids
    }

    /// Retry the depot write for a quarantined event with caller-supplied
    /// bytes, then promote its effects.
    pub fn repair(&self, id: Identifier, bytes: &[u8]) -> Result<()> {
        let mut inner = self.write();
        let event_uuid = inner
            .quarantine
            .iter()
            .find(|(_, event)| blob_target(event) == Some(id))
            .map(|(uuid, _)| *uuid)
            .ok_or_else(|| CoreError::not_found("quarantined event", id.to_string()))?;

        let event = inner.quarantine[&event_uuid].clone();
        let (_, digest) = blob_target_digest(&event)
            .ok_or_else(|| CoreError::not_found("blob event", event_uuid.to_string()))?;
        inner.depot.write(&id, bytes, &digest)?;
        inner.state.apply(&event)?;
        inner.quarantine.remove(&event_uuid);
        tracing::info!(event = %event_uuid, %id, "quarantined event repaired");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.read().state.snapshot()?)
    }
}

fn commit(
    inner: &mut Inner,
    mut event: Event,
    blob: Option<(Identifier, &[u8], ContentDigest)>,
) -> Result<Event> {
    gate::validate(inner.state.as_ref(), &event)?;

    let prev = inner.keeper.tail()?.and_then(|tail| tail.integrity);
    inner.linker.attach(&mut event, prev.as_ref())?;
    inner.keeper.append(&event)?;

    if let Some((id, bytes, digest)) = blob {
        if let Err(err) = inner.depot.write(&id, bytes, &digest) {
            tracing::error!(
                event = %event.uuid,
                target = %id,
                error = %err,
                "depot write failed after append; event quarantined"
            );
            inner.quarantine.insert(event.uuid, event);
            return Err(err.into());
        }
    }

    inner.state.apply(&event)?;
    Ok(event)
}

fn resolve_schema_ref(
    inner: &Inner,
    name: &str,
    version: u64,
) -> std::result::Result<Identifier, CoreError> {
    let uuid = inner
        .state
        .resolve_schema(name)?
        .ok_or_else(|| CoreError::not_found("schema", name))?;
    Ok(Identifier::new(uuid, version))
}

/// Load and compile the referenced schema's bytes, then validate the
/// annotation instance. A schema that is in the log but missing from the
/// depot fails here with an integrity error, not a validation error.
fn check_against_schema(
    inner: &Inner,
    schema_ref: &Identifier,
    annotation_bytes: &[u8],
) -> std::result::Result<(), CoreError> {
    if inner.state.schema_record(schema_ref)?.is_none() {
        return Err(CoreError::not_found("schema", schema_ref.to_string()));
    }
    let schema_bytes = inner.depot.read(schema_ref).map_err(|err| match err {
        DepotError::NotFound { id } => CoreError::integrity(
            "missing-bytes",
            format!("schema {id} is in the log but its bytes are missing"),
        ),
        other => CoreError::integrity("depot", other.to_string()),
    })?;
    let compiled = CompiledSchema::compile(&schema_bytes)?;
    compiled.check(annotation_bytes)
}

fn blob_target(event: &Event) -> Option<Identifier> {
    blob_target_digest(event).map(|(id, _)| id)
}

fn blob_target_digest(event: &Event) -> Option<(Identifier, ContentDigest)> {
    match &event.kind {
        EventKind::ObjectCreate { object, .. } | EventKind::ObjectUpdate { object, .. } => {
            Some((object.identifier(), object.hash))
        }
        EventKind::SchemaCreate { schema, .. } | EventKind::SchemaUpdate { schema, .. } => {
            Some((schema.identifier(), schema.hash))
        }
        EventKind::AnnotationCreate { annotation, .. }
        | EventKind::AnnotationUpdate { annotation, .. } => {
            Some((annotation.identifier(), annotation.hash))
        }
        _ => None,
    }
}

/// Rebuild a projection by replaying the log, verifying each token on the
/// way. Replay stops cold at the first divergent event; backend failures
/// propagate as what they are.
pub fn rebuild_state(keeper: &dyn RecordKeeper, mode: IntegrityMode) -> Result<MemoryState> {
    let mut state = MemoryState::new();
    let mut prev: Option<Token> = None;
    let len = keeper.len()?;
    for seq in 0..len {
        let event = match keeper.at(seq) {
            Ok(event) => event,
            Err(err) if err.is_corruption() => {
                return Err(RebuildError { first_bad_seq: seq }.into())
            }
            Err(err) => return Err(err.into()),
        };
        if check_event(mode, &event, prev.as_ref()).is_err() {
            return Err(RebuildError { first_bad_seq: seq }.into());
        }
        state.apply(&event)?;
        prev = event.integrity;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::core::Status;
    use crate::depot::MemoryDepot;
    use crate::keeper::MemoryRecordKeeper;
    use crate::state::MemoryState;
    use crate::Error;

    /// Depot wrapper that fails one write on demand, to drive the
    /// log-present, bytes-missing path.
    struct FlakyDepot {
        inner: MemoryDepot,
        fail_next: Arc<AtomicBool>,
    }

    impl Depot for FlakyDepot {
        fn write(
            &mut self,
            id: &Identifier,
            bytes: &[u8],
            expected: &ContentDigest,
        ) -> std::result::Result<(), DepotError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(DepotError::Io {
                    path: None,
                    source: std::io::Error::other("injected write failure"),
                });
            }
            self.inner.write(id, bytes, expected)
        }

        fn read(&self, id: &Identifier) -> std::result::Result<Vec<u8>, DepotError> {
            self.inner.read(id)
        }

        fn exists(&self, id: &Identifier) -> std::result::Result<bool, DepotError> {
            self.inner.exists(id)
        }

        fn purge(&mut self, id: &Identifier) -> std::result::Result<(), DepotError> {
            self.inner.purge(id)
        }
    }

    fn memory_dataset() -> Dataset {
        Dataset::new(
            "test",
            Box::new(MemoryRecordKeeper::new()),
            Box::new(MemoryDepot::new()),
            Box::new(MemoryState::new()),
            Linker::Chain,
            64,
        )
    }

    fn flaky_dataset(fail_next: Arc<AtomicBool>) -> Dataset {
        Dataset::new(
            "test",
            Box::new(MemoryRecordKeeper::new()),
            Box::new(FlakyDepot {
                inner: MemoryDepot::new(),
                fail_next,
            }),
            Box::new(MemoryState::new()),
            Linker::Chain,
            64,
        )
    }

    #[test]
    fn declared_digest_mismatch_appends_nothing() {
        let dataset = memory_dataset();
        dataset.add_owner("alice", "alice").unwrap();

        let blob = BlobInput {
            bytes: b"real content".to_vec(),
            declared_hash: Some(sha256_bytes(b"claimed content")),
            declared_size: None,
        };
        let err = dataset
            .create_object("alice", "obj.txt", "text/plain", blob)
            .unwrap_err();
        match err {
            Error::Core(CoreError::Integrity { reason, .. }) => assert_eq!(reason, "digest"),
            other => panic!("unexpected error {other:?}"),
        }

        // Only the owner event is in the log.
        assert_eq!(dataset.events(None).unwrap().len(), 1);
        assert!(dataset.list_objects(None).unwrap().is_empty());
    }

    #[test]
    fn declared_size_mismatch_appends_nothing() {
        let dataset = memory_dataset();
        let blob = BlobInput {
            bytes: b"12345".to_vec(),
            declared_hash: None,
            declared_size: Some(99),
        };
        let err = dataset
            .create_object("alice", "obj.txt", "text/plain", blob)
            .unwrap_err();
        match err {
            Error::Core(CoreError::Integrity { reason, .. }) => assert_eq!(reason, "size"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn depot_failure_quarantines_until_repair() {
        let fail_next = Arc::new(AtomicBool::new(false));
        let dataset = flaky_dataset(fail_next.clone());
        dataset.add_owner("alice", "alice").unwrap();

        fail_next.store(true, Ordering::SeqCst);
        let err = dataset
            .create_object("alice", "obj.txt", "text/plain", BlobInput::new(b"bytes".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::Depot(DepotError::Io { .. })));

        // The append is not rolled back, but the effects are withheld.
        let events = dataset.events(None).unwrap();
        assert_eq!(events.len(), 2);
        assert!(dataset.list_objects(None).unwrap().is_empty());

        let quarantined = dataset.quarantined();
        assert_eq!(quarantined.len(), 1);
        let id = match &events[1].kind {
            EventKind::ObjectCreate { object, .. } => object.identifier(),
            other => panic!("unexpected event {other:?}"),
        };

        dataset.repair(id, b"bytes").unwrap();
        assert!(dataset.quarantined().is_empty());
        assert_eq!(dataset.list_objects(None).unwrap().len(), 1);
        assert_eq!(dataset.object_detail(id).unwrap().bytes, b"bytes".to_vec());
    }

    #[test]
    fn update_assigns_next_version_and_delete_gates_on_review() {
        let dataset = memory_dataset();
        dataset.add_owner("alice", "alice").unwrap();

        let created = dataset
            .create_object("alice", "obj.txt", "text/plain", BlobInput::new(b"v0".to_vec()))
            .unwrap();
        let updated = dataset
            .update_object(
                "alice",
                created.uuid,
                "obj.txt",
                "text/plain",
                BlobInput::new(b"v1".to_vec()),
            )
            .unwrap();
        assert_eq!(updated.version, 1);

        dataset.delete_object("alice", updated).unwrap();
        let delete_event = dataset.events(None).unwrap().pop().unwrap();
        assert_eq!(
            dataset.objects_by_status(Status::Pending, None).unwrap(),
            vec![created, updated]
        );

        dataset.accept_event("alice", delete_event.uuid).unwrap();
        assert_eq!(
            dataset.objects_by_status(Status::Deleted, None).unwrap(),
            vec![updated]
        );
    }

    #[test]
    fn annotation_requires_schema_conformance() {
        let dataset = memory_dataset();
        dataset.add_owner("alice", "alice").unwrap();

        let object = dataset
            .create_object("alice", "bird.png", "image/png", BlobInput::new(b"png".to_vec()))
            .unwrap();

        let schema_bytes =
            br#"{"type":"object","properties":{"label":{"type":"string"}},"required":["label"]}"#;
        dataset
            .create_schema("alice", "schema-label", BlobInput::new(schema_bytes.to_vec()))
            .unwrap();

        let ok = dataset.create_annotation(
            "alice",
            "schema-label",
            0,
            vec![object],
            BlobInput::new(br#"{"label":"bird"}"#.to_vec()),
        );
        assert!(ok.is_ok());

        let err = dataset
            .create_annotation(
                "alice",
                "schema-label",
                0,
                vec![object],
                BlobInput::new(br#"{"label":42}"#.to_vec()),
            )
            .unwrap_err();
        match err {
            Error::Core(CoreError::Validation { reason, .. }) => assert_eq!(reason, "schema"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
