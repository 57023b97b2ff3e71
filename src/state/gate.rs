//! Event validation gate.
//!
//! Every precondition that can be answered from the projection lives here,
//! shared by both state backends. Byte-level checks (digest recomputation,
//! JSON Schema validation) happen in the mutation pipeline, where the
//! bytes are in hand.

use crate::core::{
    AnnotationRecord, CoreError, Event, EventKind, Identifier, ObjectRecord, SchemaRecord,
    SCHEMA_FORMAT, SCHEMA_NAME_PREFIX,
};

use super::{StateView, TargetAction};

/// Validate `event` against the current projection. On success the event
/// may be appended and applied; on failure nothing may change.
pub fn validate<V: StateView + ?Sized>(view: &V, event: &Event) -> Result<(), CoreError> {
    if event.author.is_empty() {
        return Err(CoreError::validation("author", "event author is empty"));
    }

    match &event.kind {
        EventKind::OwnerAdd { owner, .. } => validate_owner_add(view, owner),
        EventKind::OwnerRemove { owner, .. } => validate_owner_remove(view, owner),
        EventKind::ObjectCreate { object, .. } => validate_object_create(view, object),
        EventKind::ObjectUpdate { object, .. } => validate_object_update(view, object),
        EventKind::ObjectDelete { object_identifier } => {
            validate_object_delete(view, object_identifier)
        }
        EventKind::SchemaCreate { schema, .. } => validate_schema_create(view, schema),
        EventKind::SchemaUpdate { schema, .. } => validate_schema_update(view, schema),
        EventKind::SchemaDeprecate { schema_identifier } => {
            validate_schema_deprecate(view, schema_identifier)
        }
        EventKind::AnnotationCreate {
            annotation,
            object_identifiers,
            ..
        } => validate_annotation_create(view, annotation, object_identifiers),
        EventKind::AnnotationUpdate { annotation, .. } => {
            validate_annotation_update(view, annotation)
        }
        EventKind::AnnotationDelete {
            annotation_identifier,
        } => validate_annotation_delete(view, annotation_identifier),
        EventKind::ReviewAccept { event_uuid } => validate_review(view, event_uuid, true),
        EventKind::ReviewReject { event_uuid } => validate_review(view, event_uuid, false),
    }
}

fn validate_owner_add<V: StateView + ?Sized>(view: &V, owner: &str) -> Result<(), CoreError> {
    if owner.is_empty() {
        return Err(CoreError::validation("owner", "owner cannot be empty"));
    }
    if view.owners()?.iter().any(|o| o == owner) {
        return Err(CoreError::validation(
            "owner-exists",
            format!("`{owner}` is already an owner"),
        ));
    }
    Ok(())
}

fn validate_owner_remove<V: StateView + ?Sized>(view: &V, owner: &str) -> Result<(), CoreError> {
    let owners = view.owners()?;
    if !owners.iter().any(|o| o == owner) {
        return Err(CoreError::validation(
            "owner",
            format!("`{owner}` is not an owner"),
        ));
    }
    if owners.len() <= 1 {
        return Err(CoreError::validation(
            "last-owner",
            "a dataset must keep at least one owner",
        ));
    }
    Ok(())
}

fn validate_object_fields(object: &ObjectRecord) -> Result<(), CoreError> {
    if object.name.is_empty() {
        return Err(CoreError::validation("name", "object name cannot be empty"));
    }
    if object.format.is_empty() {
        return Err(CoreError::validation(
            "format",
            "object format cannot be empty",
        ));
    }
    Ok(())
}

fn validate_object_create<V: StateView + ?Sized>(view: &V, object: &ObjectRecord) -> Result<(), CoreError> {
    validate_object_fields(object)?;
    if view.object_max_version(&object.uuid)?.is_some() {
        return Err(CoreError::validation(
            "uuid-exists",
            format!("object {} already exists", object.uuid),
        ));
    }
    if object.version != 0 {
        return Err(CoreError::validation(
            "version",
            "object version must be zero in a create event",
        ));
    }
    Ok(())
}

fn validate_object_update<V: StateView + ?Sized>(view: &V, object: &ObjectRecord) -> Result<(), CoreError> {
    validate_object_fields(object)?;
    let max = view
        .object_max_version(&object.uuid)?
        .ok_or_else(|| CoreError::not_found("object", object.uuid.to_string()))?;
    if object.version != max + 1 {
        return Err(CoreError::validation(
            "version",
            format!("object version should be {}", max + 1),
        ));
    }
    let head = Identifier::new(object.uuid, max);
    if let Some(status) = view.object_status(&head)? {
        if status.is_terminal() {
            return Err(CoreError::validation(
                "terminal",
                format!("object {} is {status}", object.uuid),
            ));
        }
    }
    Ok(())
}

fn validate_object_delete<V: StateView + ?Sized>(view: &V, id: &Identifier) -> Result<(), CoreError> {
    let status = view
        .object_status(id)?
        .ok_or_else(|| CoreError::not_found("object", id.to_string()))?;
    if !status.is_live() {
        return Err(CoreError::validation(
            "status",
            format!("object {id} is {status}, only pending or accepted versions can be deleted"),
        ));
    }
    Ok(())
}

fn validate_schema_fields(schema: &SchemaRecord) -> Result<(), CoreError> {
    if !schema.name.starts_with(SCHEMA_NAME_PREFIX) {
        return Err(CoreError::validation(
            "name",
            format!("schema name must begin with `{SCHEMA_NAME_PREFIX}`"),
        ));
    }
    if schema.name.len() <= SCHEMA_NAME_PREFIX.len() {
        return Err(CoreError::validation(
            "name",
            "schema name cannot be the bare prefix",
        ));
    }
    if schema.format != SCHEMA_FORMAT {
        return Err(CoreError::validation(
            "format",
            format!("schema format must be `{SCHEMA_FORMAT}`"),
        ));
    }
    Ok(())
}

fn validate_schema_create<V: StateView + ?Sized>(view: &V, schema: &SchemaRecord) -> Result<(), CoreError> {
    validate_schema_fields(schema)?;
    if view.schema_name_active(&schema.name)? {
        return Err(CoreError::validation(
            "schema-name",
            format!("schema name `{}` is already in use", schema.name),
        ));
    }
    if view.schema_max_version(&schema.uuid)?.is_some() {
        return Err(CoreError::validation(
            "uuid-exists",
            format!("schema {} already exists", schema.uuid),
        ));
    }
    if schema.version != 0 {
        return Err(CoreError::validation(
            "version",
            "schema version must be zero in a create event",
        ));
    }
    Ok(())
}

fn validate_schema_update<V: StateView + ?Sized>(view: &V, schema: &SchemaRecord) -> Result<(), CoreError> {
    validate_schema_fields(schema)?;
    let max = view
        .schema_max_version(&schema.uuid)?
        .ok_or_else(|| CoreError::not_found("schema", schema.uuid.to_string()))?;

    let head = Identifier::new(schema.uuid, max);
    let existing = view
        .schema_record(&head)?
        .ok_or_else(|| CoreError::not_found("schema", head.to_string()))?;
    if existing.name != schema.name {
        return Err(CoreError::validation(
            "name",
            "schema updates cannot rename the schema",
        ));
    }
    if schema.version != max + 1 {
        return Err(CoreError::validation(
            "version",
            format!("schema version should be {}", max + 1),
        ));
    }
    if let Some(status) = view.schema_status(&head)? {
        if status.is_terminal() {
            return Err(CoreError::validation(
                "terminal",
                format!("schema {} is {status}", schema.uuid),
            ));
        }
    }
    Ok(())
}

fn validate_schema_deprecate<V: StateView + ?Sized>(view: &V, id: &Identifier) -> Result<(), CoreError> {
    let status = view
        .schema_status(id)?
        .ok_or_else(|| CoreError::not_found("schema", id.to_string()))?;
    if status == crate::core::Status::Deprecated {
        return Err(CoreError::validation(
            "terminal",
            format!("schema {id} is already deprecated"),
        ));
    }
    Ok(())
}

fn validate_schema_ref<V: StateView + ?Sized>(view: &V, schema_ref: &Identifier) -> Result<(), CoreError> {
    let status = view
        .schema_status(schema_ref)?
        .ok_or_else(|| CoreError::not_found("schema", schema_ref.to_string()))?;
    if !status.is_live() {
        return Err(CoreError::validation(
            "schema",
            format!("schema {schema_ref} is {status} and cannot be referenced"),
        ));
    }
    Ok(())
}

fn validate_annotation_create<V: StateView + ?Sized>(
    view: &V,
    annotation: &AnnotationRecord,
    object_identifiers: &[Identifier],
) -> Result<(), CoreError> {
    if view.annotation_max_version(&annotation.uuid)?.is_some() {
        return Err(CoreError::validation(
            "uuid-exists",
            format!("annotation {} already exists", annotation.uuid),
        ));
    }
    if annotation.version != 0 {
        return Err(CoreError::validation(
            "version",
            "annotation version must be zero in a create event",
        ));
    }
    if object_identifiers.is_empty() {
        return Err(CoreError::validation(
            "objects",
            "an annotation must reference at least one object",
        ));
    }
    validate_schema_ref(view, &annotation.schema)?;
    for id in object_identifiers {
        let status = view
            .object_status(id)?
            .ok_or_else(|| CoreError::not_found("object", id.to_string()))?;
        if !status.is_live() {
            return Err(CoreError::validation(
                "status",
                format!("object {id} is {status} and cannot be annotated"),
            ));
        }
    }
    Ok(())
}

fn validate_annotation_update<V: StateView + ?Sized>(
    view: &V,
    annotation: &AnnotationRecord,
) -> Result<(), CoreError> {
    let max = view
        .annotation_max_version(&annotation.uuid)?
        .ok_or_else(|| CoreError::not_found("annotation", annotation.uuid.to_string()))?;
    if annotation.version != max + 1 {
        return Err(CoreError::validation(
            "version",
            format!("annotation version should be {}", max + 1),
        ));
    }
    let head = Identifier::new(annotation.uuid, max);
    if let Some(status) = view.annotation_status(&head)? {
        if status.is_terminal() {
            return Err(CoreError::validation(
                "terminal",
                format!("annotation {} is {status}", annotation.uuid),
            ));
        }
    }
    validate_schema_ref(view, &annotation.schema)
}

fn validate_annotation_delete<V: StateView + ?Sized>(view: &V, id: &Identifier) -> Result<(), CoreError> {
    let status = view
        .annotation_status(id)?
        .ok_or_else(|| CoreError::not_found("annotation", id.to_string()))?;
    if !status.is_live() {
        return Err(CoreError::validation(
            "status",
            format!(
                "annotation {id} is {status}, only pending or accepted versions can be deleted"
            ),
        ));
    }
    Ok(())
}

fn validate_review<V: StateView + ?Sized>(
    view: &V,
    target: &uuid::Uuid,
    accepting: bool,
) -> Result<(), CoreError> {
    let record = view.review_record(target)?.ok_or_else(|| {
        CoreError::validation("review-target", format!("event {target} is not in this dataset"))
    })?;
    let action = record.action.ok_or_else(|| {
        CoreError::validation(
            "review-target",
            format!("event {target} is not reviewable"),
        )
    })?;
    if record.status.is_terminal() {
        return Err(CoreError::validation(
            "reviewed",
            format!("event {target} was already {}", record.status),
        ));
    }

    // Accepting a delete or deprecate only works while the target revision
    // is still live; a competing proposal may have got there first.
    if accepting {
        let terminal_hit = match action {
            TargetAction::ObjectDelete(id) => {
                view.object_status(&id)?.map(|s| !s.is_live()).unwrap_or(true)
            }
            TargetAction::AnnotationDelete(id) => view
                .annotation_status(&id)?
                .map(|s| !s.is_live())
                .unwrap_or(true),
            TargetAction::SchemaDeprecate(id) => view
                .schema_status(&id)?
                .map(|s| s == crate::core::Status::Deprecated)
                .unwrap_or(true),
            _ => false,
        };
        if terminal_hit {
            return Err(CoreError::validation(
                "review-terminal",
                format!("target revision of event {target} is no longer live"),
            ));
        }
    }
    Ok(())
}
