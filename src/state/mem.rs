//! In-memory state projection.
//!
//! The companion of the filesystem record keeper: rebuilt by replaying the
//! log on open. Everything lives in ordered maps so listings and snapshots
//! are deterministic.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::core::{
    AnnotationRecord, CoreError, Event, EventKind, Identifier, ObjectRecord, ReviewStatus,
    SchemaRecord, Status,
};

use super::{
    paginate_entries, EntityInfo, ReviewRecord, SchemaInfo, Snapshot, State, StateView,
    TargetAction,
};

#[derive(Default, Debug)]
pub struct MemoryState {
    owners: Vec<String>,
    objects: BTreeMap<Uuid, Vec<ObjectRecord>>,
    object_status: BTreeMap<Identifier, Status>,
    schemas: BTreeMap<Uuid, Vec<SchemaRecord>>,
    schema_status: BTreeMap<Identifier, Status>,
    /// Schema UUIDs per name, in creation order. A name can be reused once
    /// every version of its previous holder is deprecated or rejected.
    schema_names: BTreeMap<String, Vec<Uuid>>,
    annotations: BTreeMap<Uuid, Vec<AnnotationRecord>>,
    annotation_status: BTreeMap<Identifier, Status>,
    annotation_objects: BTreeMap<Uuid, Vec<Identifier>>,
    object_annotations: BTreeMap<Identifier, Vec<Uuid>>,
    entity_events: BTreeMap<Identifier, Vec<Uuid>>,
    reviews: BTreeMap<Uuid, ReviewRecord>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn uuid_has_live_version(&self, statuses: &BTreeMap<Identifier, Status>, uuid: &Uuid) -> bool {
        statuses
            .range(Identifier::new(*uuid, 0)..=Identifier::new(*uuid, u64::MAX))
            .any(|(_, status)| status.is_live())
    }

    fn record_event(&mut self, id: Identifier, event_uuid: Uuid) {
        self.entity_events.entry(id).or_default().push(event_uuid);
    }

    fn insert_review(&mut self, event_uuid: Uuid, action: Option<TargetAction>) {
        self.reviews.insert(
            event_uuid,
            ReviewRecord {
                action,
                status: ReviewStatus::Pending,
            },
        );
    }
}

impl StateView for MemoryState {
    fn owners(&self) -> Result<Vec<String>, CoreError> {
        let mut owners = self.owners.clone();
        owners.sort();
        Ok(owners)
    }

    fn object_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError> {
        Ok(self.objects.get(uuid).map(|v| v.len() as u64 - 1))
    }

    fn object_record(&self, id: &Identifier) -> Result<Option<ObjectRecord>, CoreError> {
        Ok(self
            .objects
            .get(&id.uuid)
            .and_then(|v| v.get(id.version as usize))
            .cloned())
    }

    fn object_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError> {
        Ok(self.object_status.get(id).copied())
    }

    fn list_objects(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<EntityInfo>, CoreError> {
        let entries = self
            .objects
            .iter()
            .map(|(uuid, versions)| {
                (
                    *uuid,
                    EntityInfo {
                        uuid: *uuid,
                        versions: versions.len() as u64,
                    },
                )
            })
            .collect();
        paginate_entries(entries, after, limit)
    }

    fn objects_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<Identifier>, CoreError> {
        let entries = self
            .object_status
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| (id.uuid, *id))
            .collect();
        paginate_entries(entries, after, limit)
    }

    fn resolve_schema(&self, name: &str) -> Result<Option<Uuid>, CoreError> {
        let Some(uuids) = self.schema_names.get(name) else {
            return Ok(None);
        };
        for uuid in uuids.iter().rev() {
            if self.uuid_has_live_version(&self.schema_status, uuid) {
                return Ok(Some(*uuid));
            }
        }
        Ok(None)
    }

    fn schema_name_active(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self.resolve_schema(name)?.is_some())
    }

    fn schema_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError> {
        Ok(self.schemas.get(uuid).map(|v| v.len() as u64 - 1))
    }

    fn schema_record(&self, id: &Identifier) -> Result<Option<SchemaRecord>, CoreError> {
        Ok(self
            .schemas
            .get(&id.uuid)
            .and_then(|v| v.get(id.version as usize))
            .cloned())
    }

    fn schema_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError> {
        Ok(self.schema_status.get(id).copied())
    }

    fn list_schemas(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<SchemaInfo>, CoreError> {
        let entries = self
            .schemas
            .iter()
            .map(|(uuid, versions)| {
                (
                    *uuid,
                    SchemaInfo {
                        name: versions[0].name.clone(),
                        uuid: *uuid,
                        versions: versions.len() as u64,
                    },
                )
            })
            .collect();
        paginate_entries(entries, after, limit)
    }

    fn schemas_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<(Identifier, String)>, CoreError> {
        let entries = self
            .schema_status
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| {
                let name = self
                    .schemas
                    .get(&id.uuid)
                    .map(|v| v[0].name.clone())
                    .unwrap_or_default();
                (id.uuid, (*id, name))
            })
            .collect();
        paginate_entries(entries, after, limit)
    }

    fn annotation_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError> {
        Ok(self.annotations.get(uuid).map(|v| v.len() as u64 - 1))
    }

    fn annotation_record(&self, id: &Identifier) -> Result<Option<AnnotationRecord>, CoreError> {
        Ok(self
            .annotations
            .get(&id.uuid)
            .and_then(|v| v.get(id.version as usize))
            .cloned())
    }

    fn annotation_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError> {
        Ok(self.annotation_status.get(id).copied())
    }

    fn list_annotations(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<EntityInfo>, CoreError> {
        let entries = self
            .annotations
            .iter()
            .map(|(uuid, versions)| {
                (
                    *uuid,
                    EntityInfo {
                        uuid: *uuid,
                        versions: versions.len() as u64,
                    },
                )
            })
            .collect();
        paginate_entries(entries, after, limit)
    }

    fn annotations_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<Identifier>, CoreError> {
        let entries = self
            .annotation_status
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| (id.uuid, *id))
            .collect();
        paginate_entries(entries, after, limit)
    }

    fn annotation_objects(&self, uuid: &Uuid) -> Result<Vec<Identifier>, CoreError> {
        Ok(self.annotation_objects.get(uuid).cloned().unwrap_or_default())
    }

    fn object_annotations(&self, id: &Identifier) -> Result<Vec<Uuid>, CoreError> {
        Ok(self.object_annotations.get(id).cloned().unwrap_or_default())
    }

    fn entity_events(&self, id: &Identifier) -> Result<Vec<Uuid>, CoreError> {
        Ok(self.entity_events.get(id).cloned().unwrap_or_default())
    }

    fn review_record(&self, event_uuid: &Uuid) -> Result<Option<ReviewRecord>, CoreError> {
        Ok(self.reviews.get(event_uuid).copied())
    }

    fn snapshot(&self) -> Result<Snapshot, CoreError> {
        let mut snapshot = Snapshot {
            owners: self.owners()?,
            ..Snapshot::default()
        };
        for (uuid, records) in &self.objects {
            snapshot.objects.insert(uuid.to_string(), records.clone());
        }
        for (id, status) in &self.object_status {
            snapshot.object_status.insert(id.to_string(), *status);
        }
        for (uuid, records) in &self.schemas {
            snapshot.schemas.insert(uuid.to_string(), records.clone());
        }
        for (id, status) in &self.schema_status {
            snapshot.schema_status.insert(id.to_string(), *status);
        }
        for (uuid, records) in &self.annotations {
            snapshot
                .annotations
                .insert(uuid.to_string(), records.clone());
        }
        for (id, status) in &self.annotation_status {
            snapshot.annotation_status.insert(id.to_string(), *status);
        }
        for (uuid, links) in &self.annotation_objects {
            snapshot
                .annotation_objects
                .insert(uuid.to_string(), links.clone());
        }
        for (id, events) in &self.entity_events {
            snapshot.entity_events.insert(
                id.to_string(),
                events.iter().map(|uuid| uuid.to_string()).collect(),
            );
        }
        for (uuid, record) in &self.reviews {
            if record.action.is_some() {
                snapshot.reviews.insert(uuid.to_string(), record.status);
            }
        }
        Ok(snapshot)
    }
}

impl State for MemoryState {
    fn apply(&mut self, event: &Event) -> Result<(), CoreError> {
        match &event.kind {
            EventKind::OwnerAdd { owner, .. } => {
                self.owners.push(owner.clone());
            }
            EventKind::OwnerRemove { owner, .. } => {
                self.owners.retain(|o| o != owner);
            }
            EventKind::ObjectCreate { object, .. } | EventKind::ObjectUpdate { object, .. } => {
                let id = object.identifier();
                self.objects.entry(object.uuid).or_default().push(object.clone());
                self.object_status.insert(id, Status::Pending);
                self.record_event(id, event.uuid);
                self.insert_review(event.uuid, Some(TargetAction::ObjectWrite(id)));
            }
            EventKind::ObjectDelete { object_identifier } => {
                self.record_event(*object_identifier, event.uuid);
                self.insert_review(
                    event.uuid,
                    Some(TargetAction::ObjectDelete(*object_identifier)),
                );
            }
            EventKind::SchemaCreate { schema, .. } => {
                let id = schema.identifier();
                self.schema_names
                    .entry(schema.name.clone())
                    .or_default()
                    .push(schema.uuid);
                self.schemas.entry(schema.uuid).or_default().push(schema.clone());
                self.schema_status.insert(id, Status::Pending);
                self.record_event(id, event.uuid);
                self.insert_review(event.uuid, Some(TargetAction::SchemaWrite(id)));
            }
            EventKind::SchemaUpdate { schema, .. } => {
                let id = schema.identifier();
                self.schemas.entry(schema.uuid).or_default().push(schema.clone());
                self.schema_status.insert(id, Status::Pending);
                self.record_event(id, event.uuid);
                self.insert_review(event.uuid, Some(TargetAction::SchemaWrite(id)));
            }
            EventKind::SchemaDeprecate { schema_identifier } => {
                self.record_event(*schema_identifier, event.uuid);
                self.insert_review(
                    event.uuid,
                    Some(TargetAction::SchemaDeprecate(*schema_identifier)),
                );
            }
            EventKind::AnnotationCreate {
                annotation,
                object_identifiers,
                ..
            } => {
                let id = annotation.identifier();
                self.annotations
                    .entry(annotation.uuid)
                    .or_default()
                    .push(annotation.clone());
                self.annotation_status.insert(id, Status::Pending);
                self.annotation_objects
                    .insert(annotation.uuid, object_identifiers.clone());
                for object_id in object_identifiers {
                    self.object_annotations
                        .entry(*object_id)
                        .or_default()
                        .push(annotation.uuid);
                }
                self.record_event(id, event.uuid);
                self.insert_review(event.uuid, Some(TargetAction::AnnotationWrite(id)));
            }
            EventKind::AnnotationUpdate { annotation, .. } => {
                let id = annotation.identifier();
                self.annotations
                    .entry(annotation.uuid)
                    .or_default()
                    .push(annotation.clone());
                self.annotation_status.insert(id, Status::Pending);
                self.record_event(id, event.uuid);
                self.insert_review(event.uuid, Some(TargetAction::AnnotationWrite(id)));
            }
            EventKind::AnnotationDelete {
                annotation_identifier,
            } => {
                self.record_event(*annotation_identifier, event.uuid);
                self.insert_review(
                    event.uuid,
                    Some(TargetAction::AnnotationDelete(*annotation_identifier)),
                );
            }
            EventKind::ReviewAccept { event_uuid } => {
                self.insert_review(event.uuid, None);
                self.settle_review(event_uuid, true)?;
            }
            EventKind::ReviewReject { event_uuid } => {
                self.insert_review(event.uuid, None);
                self.settle_review(event_uuid, false)?;
            }
        }
        Ok(())
    }
}

impl MemoryState {
    fn settle_review(&mut self, target: &Uuid, accepted: bool) -> Result<(), CoreError> {
        let record = self
            .reviews
            .get_mut(target)
            .ok_or_else(|| CoreError::Storage(format!("review target {target} missing")))?;
        record.status = if accepted {
            ReviewStatus::Accepted
        } else {
            ReviewStatus::Rejected
        };
        let action = record
            .action
            .ok_or_else(|| CoreError::Storage(format!("event {target} has no review action")))?;

        match (action, accepted) {
            (TargetAction::ObjectWrite(id), true) => {
                self.object_status.insert(id, Status::Accepted);
            }
            (TargetAction::ObjectWrite(id), false) => {
                self.object_status.insert(id, Status::Rejected);
            }
            (TargetAction::ObjectDelete(id), true) => {
                self.object_status.insert(id, Status::Deleted);
            }
            (TargetAction::SchemaWrite(id), true) => {
                self.schema_status.insert(id, Status::Accepted);
            }
            (TargetAction::SchemaWrite(id), false) => {
                self.schema_status.insert(id, Status::Rejected);
            }
            (TargetAction::SchemaDeprecate(id), true) => {
                self.schema_status.insert(id, Status::Deprecated);
            }
            (TargetAction::AnnotationWrite(id), true) => {
                self.annotation_status.insert(id, Status::Accepted);
            }
            (TargetAction::AnnotationWrite(id), false) => {
                self.annotation_status.insert(id, Status::Rejected);
            }
            (TargetAction::AnnotationDelete(id), true) => {
                self.annotation_status.insert(id, Status::Deleted);
            }
            // Rejected deletes and deprecations change nothing.
            (TargetAction::ObjectDelete(_), false)
            | (TargetAction::SchemaDeprecate(_), false)
            | (TargetAction::AnnotationDelete(_), false) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{sha256_bytes, HashType};
    use crate::state::gate;

    fn object_record(uuid: Uuid, version: u64, name: &str) -> ObjectRecord {
        let bytes = name.as_bytes();
        ObjectRecord {
            uuid,
            version,
            name: name.to_string(),
            format: "text/plain".to_string(),
            size: bytes.len() as u64,
            hash_type: HashType::Sha256,
            hash: sha256_bytes(bytes),
        }
    }

    fn apply(state: &mut MemoryState, kind: EventKind) -> Event {
        let event = Event::new("alice", kind);
        gate::validate(state, &event).unwrap();
        state.apply(&event).unwrap();
        event
    }

    #[test]
    fn object_lifecycle_pending_accepted_deleted() {
        let mut state = MemoryState::new();
        let uuid = Uuid::new_v4();
        let id = Identifier::new(uuid, 0);

        let create = apply(
            &mut state,
            EventKind::object_create(object_record(uuid, 0, "obj.txt")),
        );
        assert_eq!(state.object_status(&id).unwrap(), Some(Status::Pending));

        apply(&mut state, EventKind::ReviewAccept { event_uuid: create.uuid });
        assert_eq!(state.object_status(&id).unwrap(), Some(Status::Accepted));

        let delete = apply(&mut state, EventKind::ObjectDelete { object_identifier: id });
        // Review of the delete leaves the target untouched until accepted.
        assert_eq!(state.object_status(&id).unwrap(), Some(Status::Accepted));

        apply(&mut state, EventKind::ReviewAccept { event_uuid: delete.uuid });
        assert_eq!(state.object_status(&id).unwrap(), Some(Status::Deleted));
    }

    #[test]
    fn rejected_delete_leaves_prior_status() {
        let mut state = MemoryState::new();
        let uuid = Uuid::new_v4();
        let id = Identifier::new(uuid, 0);

        apply(
            &mut state,
            EventKind::object_create(object_record(uuid, 0, "obj.txt")),
        );
        let delete = apply(&mut state, EventKind::ObjectDelete { object_identifier: id });
        apply(&mut state, EventKind::ReviewReject { event_uuid: delete.uuid });
        assert_eq!(state.object_status(&id).unwrap(), Some(Status::Pending));
    }

    #[test]
    fn review_is_terminal_once_settled() {
        let mut state = MemoryState::new();
        let uuid = Uuid::new_v4();
        let create = apply(
            &mut state,
            EventKind::object_create(object_record(uuid, 0, "obj.txt")),
        );
        apply(&mut state, EventKind::ReviewAccept { event_uuid: create.uuid });

        let reject = Event::new("alice", EventKind::ReviewReject { event_uuid: create.uuid });
        let err = gate::validate(&state, &reject).unwrap_err();
        assert_eq!(err.reason(), Some("reviewed"));
    }

    #[test]
    fn second_delete_accept_fails_on_terminal_target() {
        let mut state = MemoryState::new();
        let uuid = Uuid::new_v4();
        let id = Identifier::new(uuid, 0);
        apply(
            &mut state,
            EventKind::object_create(object_record(uuid, 0, "obj.txt")),
        );

        // Two competing delete proposals are both accepted into the log.
        let first = apply(&mut state, EventKind::ObjectDelete { object_identifier: id });
        let second = apply(&mut state, EventKind::ObjectDelete { object_identifier: id });

        apply(&mut state, EventKind::ReviewAccept { event_uuid: first.uuid });

        let accept_second = Event::new("alice", EventKind::ReviewAccept { event_uuid: second.uuid });
        let err = gate::validate(&state, &accept_second).unwrap_err();
        assert_eq!(err.reason(), Some("review-terminal"));
    }

    #[test]
    fn owner_floor_is_enforced() {
        let mut state = MemoryState::new();
        apply(&mut state, EventKind::owner_add("alice"));

        let remove = Event::new("alice", EventKind::owner_remove("alice"));
        let err = gate::validate(&state, &remove).unwrap_err();
        assert_eq!(err.reason(), Some("last-owner"));

        apply(&mut state, EventKind::owner_add("bob"));
        apply(&mut state, EventKind::owner_remove("alice"));
        assert_eq!(state.owners().unwrap(), vec!["bob".to_string()]);
    }

    #[test]
    fn versions_are_dense_and_updates_monotonic() {
        let mut state = MemoryState::new();
        let uuid = Uuid::new_v4();
        apply(
            &mut state,
            EventKind::object_create(object_record(uuid, 0, "obj.txt")),
        );

        // Version 2 before version 1 is refused.
        let skip = Event::new(
            "alice",
            EventKind::object_update(object_record(uuid, 2, "obj.txt")),
        );
        assert_eq!(
            gate::validate(&state, &skip).unwrap_err().reason(),
            Some("version")
        );

        for version in 1..=4 {
            apply(
                &mut state,
                EventKind::object_update(object_record(uuid, version, "obj.txt")),
            );
        }
        assert_eq!(state.object_max_version(&uuid).unwrap(), Some(4));
        for version in 0..=4 {
            assert!(state
                .object_status(&Identifier::new(uuid, version))
                .unwrap()
                .is_some());
        }
    }

    #[test]
    fn schema_name_reuse_after_deprecation() {
        let mut state = MemoryState::new();
        let uuid = Uuid::new_v4();
        let schema = SchemaRecord {
            uuid,
            version: 0,
            name: "schema-label".to_string(),
            format: crate::core::SCHEMA_FORMAT.to_string(),
            size: 2,
            hash_type: HashType::Sha256,
            hash: sha256_bytes(b"{}"),
        };
        apply(&mut state, EventKind::schema_create(schema.clone()));

        // Name is taken while any version is live.
        let dup = SchemaRecord {
            uuid: Uuid::new_v4(),
            ..schema.clone()
        };
        let err = gate::validate(
            &state,
            &Event::new("alice", EventKind::schema_create(dup.clone())),
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("schema-name"));

        let deprecate = apply(
            &mut state,
            EventKind::SchemaDeprecate {
                schema_identifier: Identifier::new(uuid, 0),
            },
        );
        apply(&mut state, EventKind::ReviewAccept { event_uuid: deprecate.uuid });

        assert!(!state.schema_name_active("schema-label").unwrap());
        apply(&mut state, EventKind::schema_create(dup));
    }
}
