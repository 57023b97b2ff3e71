//! SQLite state projection.
//!
//! Persistent companion of the SQLite record keeper. Every `apply` runs in
//! one transaction; queries collect ordered rows and share the pagination
//! logic with the in-memory backend so both produce identical pages.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::core::{
    AnnotationRecord, CoreError, Event, EventKind, Identifier, ObjectRecord, ReviewStatus,
    SchemaRecord, Status,
};

use super::{
    paginate_entries, EntityInfo, ReviewRecord, SchemaInfo, Snapshot, State, StateView,
    TargetAction,
};

const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct SqliteState {
    conn: Mutex<Connection>,
}

fn storage_err(err: rusqlite::Error) -> CoreError {
    CoreError::Storage(err.to_string())
}

fn encode_err(err: serde_json::Error) -> CoreError {
    CoreError::Storage(format!("record encode/decode failed: {err}"))
}

fn parse_uuid(raw: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(raw).map_err(|err| CoreError::Storage(format!("bad uuid in state db: {err}")))
}

impl SqliteState {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(storage_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS owners (
                owner TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS objects (
                uuid TEXT NOT NULL,
                version INTEGER NOT NULL,
                record TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (uuid, version)
            );
            CREATE TABLE IF NOT EXISTS schemas (
                uuid TEXT NOT NULL,
                version INTEGER NOT NULL,
                name TEXT NOT NULL,
                record TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (uuid, version)
            );
            CREATE TABLE IF NOT EXISTS schema_names (
                ord INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                uuid TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS annotations (
                uuid TEXT NOT NULL,
                version INTEGER NOT NULL,
                record TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (uuid, version)
            );
            CREATE TABLE IF NOT EXISTS annotation_objects (
                ord INTEGER PRIMARY KEY AUTOINCREMENT,
                annotation_uuid TEXT NOT NULL,
                object_uuid TEXT NOT NULL,
                object_version INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS entity_events (
                ord INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_uuid TEXT NOT NULL,
                entity_version INTEGER NOT NULL,
                event_uuid TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reviews (
                event_uuid TEXT PRIMARY KEY,
                action TEXT,
                target_uuid TEXT,
                target_version INTEGER,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schemas_name ON schemas(name);
            CREATE INDEX IF NOT EXISTS idx_schema_names_name ON schema_names(name);
            CREATE INDEX IF NOT EXISTS idx_annotation_objects_object
                ON annotation_objects(object_uuid, object_version);
            CREATE INDEX IF NOT EXISTS idx_entity_events_entity
                ON entity_events(entity_uuid, entity_version);",
        )
        .map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn max_version(&self, table: &str, uuid: &Uuid) -> Result<Option<u64>, CoreError> {
        let sql = format!("SELECT MAX(version) FROM {table} WHERE uuid = ?1");
        let max: Option<i64> = self
            .conn()
            .query_row(&sql, params![uuid.to_string()], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(max.map(|v| v as u64))
    }

    fn record_json(&self, table: &str, id: &Identifier) -> Result<Option<String>, CoreError> {
        let sql = format!("SELECT record FROM {table} WHERE uuid = ?1 AND version = ?2");
        self.conn()
            .query_row(&sql, params![id.uuid.to_string(), id.version as i64], |row| {
                row.get(0)
            })
            .optional()
            .map_err(storage_err)
    }

    fn status_of(&self, table: &str, id: &Identifier) -> Result<Option<Status>, CoreError> {
        let sql = format!("SELECT status FROM {table} WHERE uuid = ?1 AND version = ?2");
        let status: Option<String> = self
            .conn()
            .query_row(&sql, params![id.uuid.to_string(), id.version as i64], |row| {
                row.get(0)
            })
            .optional()
            .map_err(storage_err)?;
        status.map(|s| Status::parse(&s)).transpose()
    }

    fn list_infos(&self, table: &str) -> Result<Vec<(Uuid, EntityInfo)>, CoreError> {
        let sql =
            format!("SELECT uuid, COUNT(*) FROM {table} GROUP BY uuid ORDER BY uuid");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            let (uuid, versions) = row.map_err(storage_err)?;
            let uuid = parse_uuid(&uuid)?;
            entries.push((
                uuid,
                EntityInfo {
                    uuid,
                    versions: versions as u64,
                },
            ));
        }
        Ok(entries)
    }

    fn ids_by_status(
        &self,
        table: &str,
        status: Status,
    ) -> Result<Vec<(Uuid, Identifier)>, CoreError> {
        let sql = format!(
            "SELECT uuid, version FROM {table} WHERE status = ?1 ORDER BY uuid, version"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            let (uuid, version) = row.map_err(storage_err)?;
            let uuid = parse_uuid(&uuid)?;
            entries.push((uuid, Identifier::new(uuid, version as u64)));
        }
        Ok(entries)
    }

    fn uuid_has_live_version(&self, table: &str, uuid: &Uuid) -> Result<bool, CoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE uuid = ?1 AND status IN ('pending', 'accepted')"
        );
        let count: i64 = self
            .conn()
            .query_row(&sql, params![uuid.to_string()], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count > 0)
    }
}

impl StateView for SqliteState {
    fn owners(&self) -> Result<Vec<String>, CoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT owner FROM owners ORDER BY owner")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        let mut owners = Vec::new();
        for row in rows {
            owners.push(row.map_err(storage_err)?);
        }
        Ok(owners)
    }

    fn object_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError> {
        self.max_version("objects", uuid)
    }

    fn object_record(&self, id: &Identifier) -> Result<Option<ObjectRecord>, CoreError> {
        self.record_json("objects", id)?
            .map(|json| serde_json::from_str(&json).map_err(encode_err))
            .transpose()
    }

    fn object_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError> {
        self.status_of("objects", id)
    }

    fn list_objects(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<EntityInfo>, CoreError> {
        paginate_entries(self.list_infos("objects")?, after, limit)
    }

    fn objects_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<Identifier>, CoreError> {
        paginate_entries(self.ids_by_status("objects", status)?, after, limit)
    }

    fn resolve_schema(&self, name: &str) -> Result<Option<Uuid>, CoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT uuid FROM schema_names WHERE name = ?1 ORDER BY ord DESC")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        for row in rows {
            let uuid = parse_uuid(&row.map_err(storage_err)?)?;
            if self.uuid_has_live_version("schemas", &uuid)? {
                return Ok(Some(uuid));
            }
        }
        Ok(None)
    }

    fn schema_name_active(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self.resolve_schema(name)?.is_some())
    }

    fn schema_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError> {
        self.max_version("schemas", uuid)
    }

    fn schema_record(&self, id: &Identifier) -> Result<Option<SchemaRecord>, CoreError> {
        self.record_json("schemas", id)?
            .map(|json| serde_json::from_str(&json).map_err(encode_err))
            .transpose()
    }

    fn schema_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError> {
        self.status_of("schemas", id)
    }

    fn list_schemas(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<SchemaInfo>, CoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT uuid, MIN(name), COUNT(*) FROM schemas GROUP BY uuid ORDER BY uuid",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            let (uuid, name, versions) = row.map_err(storage_err)?;
            let uuid = parse_uuid(&uuid)?;
            entries.push((
                uuid,
                SchemaInfo {
                    name,
                    uuid,
                    versions: versions as u64,
                },
            ));
        }
        paginate_entries(entries, after, limit)
    }

    fn schemas_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<(Identifier, String)>, CoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT uuid, version, name FROM schemas WHERE status = ?1
                 ORDER BY uuid, version",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            let (uuid, version, name) = row.map_err(storage_err)?;
            let uuid = parse_uuid(&uuid)?;
            entries.push((uuid, (Identifier::new(uuid, version as u64), name)));
        }
        paginate_entries(entries, after, limit)
    }

    fn annotation_max_version(&self, uuid: &Uuid) -> Result<Option<u64>, CoreError> {
        self.max_version("annotations", uuid)
    }

    fn annotation_record(&self, id: &Identifier) -> Result<Option<AnnotationRecord>, CoreError> {
        self.record_json("annotations", id)?
            .map(|json| serde_json::from_str(&json).map_err(encode_err))
            .transpose()
    }

    fn annotation_status(&self, id: &Identifier) -> Result<Option<Status>, CoreError> {
        self.status_of("annotations", id)
    }

    fn list_annotations(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<EntityInfo>, CoreError> {
        paginate_entries(self.list_infos("annotations")?, after, limit)
    }

    fn annotations_by_status(
        &self,
        status: Status,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<Identifier>, CoreError> {
        paginate_entries(self.ids_by_status("annotations", status)?, after, limit)
    }

    fn annotation_objects(&self, uuid: &Uuid) -> Result<Vec<Identifier>, CoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT object_uuid, object_version FROM annotation_objects
                 WHERE annotation_uuid = ?1 ORDER BY ord",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![uuid.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(storage_err)?;
        let mut ids = Vec::new();
        for row in rows {
            let (uuid, version) = row.map_err(storage_err)?;
            ids.push(Identifier::new(parse_uuid(&uuid)?, version as u64));
        }
        Ok(ids)
    }

    fn object_annotations(&self, id: &Identifier) -> Result<Vec<Uuid>, CoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT annotation_uuid FROM annotation_objects
                 WHERE object_uuid = ?1 AND object_version = ?2 ORDER BY ord",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![id.uuid.to_string(), id.version as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(storage_err)?;
        let mut uuids = Vec::new();
        for row in rows {
            uuids.push(parse_uuid(&row.map_err(storage_err)?)?);
        }
        Ok(uuids)
    }

    fn entity_events(&self, id: &Identifier) -> Result<Vec<Uuid>, CoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT event_uuid FROM entity_events
                 WHERE entity_uuid = ?1 AND entity_version = ?2 ORDER BY ord",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![id.uuid.to_string(), id.version as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(storage_err)?;
        let mut uuids = Vec::new();
        for row in rows {
            uuids.push(parse_uuid(&row.map_err(storage_err)?)?);
        }
        Ok(uuids)
    }

    fn review_record(&self, event_uuid: &Uuid) -> Result<Option<ReviewRecord>, CoreError> {
        let row: Option<(Option<String>, Option<String>, Option<i64>, String)> = self
            .conn()
            .query_row(
                "SELECT action, target_uuid, target_version, status
                 FROM reviews WHERE event_uuid = ?1",
                params![event_uuid.to_string()],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )
            .optional()
            .map_err(storage_err)?;
        let Some((action, target_uuid, target_version, status)) = row else {
            return Ok(None);
        };
        let action = match (action, target_uuid, target_version) {
            (Some(action), Some(uuid), Some(version)) => Some(decode_action(
                &action,
                Identifier::new(parse_uuid(&uuid)?, version as u64),
            )?),
            _ => None,
        };
        Ok(Some(ReviewRecord {
            action,
            status: ReviewStatus::parse(&status)?,
        }))
    }

    fn snapshot(&self) -> Result<Snapshot, CoreError> {
        let mut snapshot = Snapshot {
            owners: self.owners()?,
            ..Snapshot::default()
        };

        for (uuid, info) in self.list_infos("objects")? {
            let mut records = Vec::new();
            for version in 0..info.versions {
                let id = Identifier::new(uuid, version);
                let record = self
                    .object_record(&id)?
                    .ok_or_else(|| CoreError::Storage(format!("object {id} missing")))?;
                records.push(record);
                if let Some(status) = self.object_status(&id)? {
                    snapshot.object_status.insert(id.to_string(), status);
                }
                let events = self.entity_events(&id)?;
                if !events.is_empty() {
                    snapshot.entity_events.insert(
                        id.to_string(),
                        events.iter().map(|uuid| uuid.to_string()).collect(),
                    );
                }
            }
            snapshot.objects.insert(uuid.to_string(), records);
        }

        for (uuid, info) in self.list_infos("schemas")? {
            let mut records = Vec::new();
            for version in 0..info.versions {
                let id = Identifier::new(uuid, version);
                let record = self
                    .schema_record(&id)?
                    .ok_or_else(|| CoreError::Storage(format!("schema {id} missing")))?;
                records.push(record);
                if let Some(status) = self.schema_status(&id)? {
                    snapshot.schema_status.insert(id.to_string(), status);
                }
                let events = self.entity_events(&id)?;
                if !events.is_empty() {
                    snapshot.entity_events.insert(
                        id.to_string(),
                        events.iter().map(|uuid| uuid.to_string()).collect(),
                    );
                }
            }
            snapshot.schemas.insert(uuid.to_string(), records);
        }

        for (uuid, info) in self.list_infos("annotations")? {
            let mut records = Vec::new();
            for version in 0..info.versions {
                let id = Identifier::new(uuid, version);
                let record = self
                    .annotation_record(&id)?
                    .ok_or_else(|| CoreError::Storage(format!("annotation {id} missing")))?;
                records.push(record);
                if let Some(status) = self.annotation_status(&id)? {
                    snapshot.annotation_status.insert(id.to_string(), status);
                }
                let events = self.entity_events(&id)?;
                if !events.is_empty() {
                    snapshot.entity_events.insert(
                        id.to_string(),
                        events.iter().map(|uuid| uuid.to_string()).collect(),
                    );
                }
            }
            snapshot.annotations.insert(uuid.to_string(), records);
            let links = self.annotation_objects(&uuid)?;
            if !links.is_empty() {
                snapshot.annotation_objects.insert(uuid.to_string(), links);
            }
        }

        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT event_uuid, status FROM reviews WHERE action IS NOT NULL")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_err)?;
        for row in rows {
            let (uuid, status) = row.map_err(storage_err)?;
            snapshot.reviews.insert(uuid, ReviewStatus::parse(&status)?);
        }

        Ok(snapshot)
    }
}

fn encode_action(action: &TargetAction) -> (&'static str, Identifier) {
    match action {
        TargetAction::ObjectWrite(id) => ("object-write", *id),
        TargetAction::ObjectDelete(id) => ("object-delete", *id),
        TargetAction::SchemaWrite(id) => ("schema-write", *id),
        TargetAction::SchemaDeprecate(id) => ("schema-deprecate", *id),
        TargetAction::AnnotationWrite(id) => ("annotation-write", *id),
        TargetAction::AnnotationDelete(id) => ("annotation-delete", *id),
    }
}

fn decode_action(raw: &str, id: Identifier) -> Result<TargetAction, CoreError> {
    match raw {
        "object-write" => Ok(TargetAction::ObjectWrite(id)),
        "object-delete" => Ok(TargetAction::ObjectDelete(id)),
        "schema-write" => Ok(TargetAction::SchemaWrite(id)),
        "schema-deprecate" => Ok(TargetAction::SchemaDeprecate(id)),
        "annotation-write" => Ok(TargetAction::AnnotationWrite(id)),
        "annotation-delete" => Ok(TargetAction::AnnotationDelete(id)),
        other => Err(CoreError::Storage(format!("unknown review action `{other}`"))),
    }
}

impl State for SqliteState {
    fn apply(&mut self, event: &Event) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(storage_err)?;

        {
            let insert_review =
                |tx: &rusqlite::Transaction<'_>, action: Option<TargetAction>| -> Result<(), CoreError> {
                    let (name, target) = match &action {
                        Some(action) => {
                            let (name, id) = encode_action(action);
                            (Some(name), Some(id))
                        }
                        None => (None, None),
                    };
                    tx.execute(
                        "INSERT INTO reviews (event_uuid, action, target_uuid, target_version, status)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            event.uuid.to_string(),
                            name,
                            target.map(|id| id.uuid.to_string()),
                            target.map(|id| id.version as i64),
                            ReviewStatus::Pending.as_str(),
                        ],
                    )
                    .map_err(storage_err)?;
                    Ok(())
                };

            let record_event = |tx: &rusqlite::Transaction<'_>, id: Identifier| -> Result<(), CoreError> {
                tx.execute(
                    "INSERT INTO entity_events (entity_uuid, entity_version, event_uuid)
                     VALUES (?1, ?2, ?3)",
                    params![id.uuid.to_string(), id.version as i64, event.uuid.to_string()],
                )
                .map_err(storage_err)?;
                Ok(())
            };

            match &event.kind {
                EventKind::OwnerAdd { owner, .. } => {
                    tx.execute("INSERT INTO owners (owner) VALUES (?1)", params![owner])
                        .map_err(storage_err)?;
                }
                EventKind::OwnerRemove { owner, .. } => {
                    tx.execute("DELETE FROM owners WHERE owner = ?1", params![owner])
                        .map_err(storage_err)?;
                }
                EventKind::ObjectCreate { object, .. } | EventKind::ObjectUpdate { object, .. } => {
                    let id = object.identifier();
                    tx.execute(
                        "INSERT INTO objects (uuid, version, record, status)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            id.uuid.to_string(),
                            id.version as i64,
                            serde_json::to_string(object).map_err(encode_err)?,
                            Status::Pending.as_str(),
                        ],
                    )
                    .map_err(storage_err)?;
                    record_event(&tx, id)?;
                    insert_review(&tx, Some(TargetAction::ObjectWrite(id)))?;
                }
                EventKind::ObjectDelete { object_identifier } => {
                    record_event(&tx, *object_identifier)?;
                    insert_review(&tx, Some(TargetAction::ObjectDelete(*object_identifier)))?;
                }
                EventKind::SchemaCreate { schema, .. } => {
                    let id = schema.identifier();
                    tx.execute(
                        "INSERT INTO schema_names (name, uuid) VALUES (?1, ?2)",
                        params![schema.name, id.uuid.to_string()],
                    )
                    .map_err(storage_err)?;
                    tx.execute(
                        "INSERT INTO schemas (uuid, version, name, record, status)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            id.uuid.to_string(),
                            id.version as i64,
                            schema.name,
                            serde_json::to_string(schema).map_err(encode_err)?,
                            Status::Pending.as_str(),
                        ],
                    )
                    .map_err(storage_err)?;
                    record_event(&tx, id)?;
                    insert_review(&tx, Some(TargetAction::SchemaWrite(id)))?;
                }
                EventKind::SchemaUpdate { schema, .. } => {
                    let id = schema.identifier();
                    tx.execute(
                        "INSERT INTO schemas (uuid, version, name, record, status)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            id.uuid.to_string(),
                            id.version as i64,
                            schema.name,
                            serde_json::to_string(schema).map_err(encode_err)?,
                            Status::Pending.as_str(),
                        ],
                    )
                    .map_err(storage_err)?;
                    record_event(&tx, id)?;
                    insert_review(&tx, Some(TargetAction::SchemaWrite(id)))?;
                }
                EventKind::SchemaDeprecate { schema_identifier } => {
                    record_event(&tx, *schema_identifier)?;
                    insert_review(&tx, Some(TargetAction::SchemaDeprecate(*schema_identifier)))?;
                }
                EventKind::AnnotationCreate {
                    annotation,
                    object_identifiers,
                    ..
                } => {
                    let id = annotation.identifier();
                    tx.execute(
                        "INSERT INTO annotations (uuid, version, record, status)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            id.uuid.to_string(),
                            id.version as i64,
                            serde_json::to_string(annotation).map_err(encode_err)?,
                            Status::Pending.as_str(),
                        ],
                    )
                    .map_err(storage_err)?;
                    for object_id in object_identifiers {
                        tx.execute(
                            "INSERT INTO annotation_objects
                             (annotation_uuid, object_uuid, object_version)
                             VALUES (?1, ?2, ?3)",
                            params![
                                id.uuid.to_string(),
                                object_id.uuid.to_string(),
                                object_id.version as i64,
                            ],
                        )
                        .map_err(storage_err)?;
                    }
                    record_event(&tx, id)?;
                    insert_review(&tx, Some(TargetAction::AnnotationWrite(id)))?;
                }
                EventKind::AnnotationUpdate { annotation, .. } => {
                    let id = annotation.identifier();
                    tx.execute(
                        "INSERT INTO annotations (uuid, version, record, status)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            id.uuid.to_string(),
                            id.version as i64,
                            serde_json::to_string(annotation).map_err(encode_err)?,
                            Status::Pending.as_str(),
                        ],
                    )
                    .map_err(storage_err)?;
                    record_event(&tx, id)?;
                    insert_review(&tx, Some(TargetAction::AnnotationWrite(id)))?;
                }
                EventKind::AnnotationDelete {
                    annotation_identifier,
                } => {
                    record_event(&tx, *annotation_identifier)?;
                    insert_review(
                        &tx,
                        Some(TargetAction::AnnotationDelete(*annotation_identifier)),
                    )?;
                }
                EventKind::ReviewAccept { event_uuid } => {
                    insert_review(&tx, None)?;
                    settle_review(&tx, event_uuid, true)?;
                }
                EventKind::ReviewReject { event_uuid } => {
                    insert_review(&tx, None)?;
                    settle_review(&tx, event_uuid, false)?;
                }
            }
        }

        tx.commit().map_err(storage_err)
    }
}

fn settle_review(
    tx: &rusqlite::Transaction<'_>,
    target: &Uuid,
    accepted: bool,
) -> Result<(), CoreError> {
    let review_status = if accepted {
        ReviewStatus::Accepted
    } else {
        ReviewStatus::Rejected
    };
    tx.execute(
        "UPDATE reviews SET status = ?1 WHERE event_uuid = ?2",
        params![review_status.as_str(), target.to_string()],
    )
    .map_err(storage_err)?;

    let (action, uuid, version): (String, String, i64) = tx
        .query_row(
            "SELECT action, target_uuid, target_version FROM reviews WHERE event_uuid = ?1",
            params![target.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(storage_err)?;
    let id = Identifier::new(parse_uuid(&uuid)?, version as u64);
    let action = decode_action(&action, id)?;

    let (table, status) = match (action, accepted) {
        (TargetAction::ObjectWrite(_), true) => ("objects", Status::Accepted),
        (TargetAction::ObjectWrite(_), false) => ("objects", Status::Rejected),
        (TargetAction::ObjectDelete(_), true) => ("objects", Status::Deleted),
        (TargetAction::SchemaWrite(_), true) => ("schemas", Status::Accepted),
        (TargetAction::SchemaWrite(_), false) => ("schemas", Status::Rejected),
        (TargetAction::SchemaDeprecate(_), true) => ("schemas", Status::Deprecated),
        (TargetAction::AnnotationWrite(_), true) => ("annotations", Status::Accepted),
        (TargetAction::AnnotationWrite(_), false) => ("annotations", Status::Rejected),
        (TargetAction::AnnotationDelete(_), true) => ("annotations", Status::Deleted),
        // Rejected deletes and deprecations change nothing.
        (TargetAction::ObjectDelete(_), false)
        | (TargetAction::SchemaDeprecate(_), false)
        | (TargetAction::AnnotationDelete(_), false) => return Ok(()),
    };

    let sql = format!("UPDATE {table} SET status = ?1 WHERE uuid = ?2 AND version = ?3");
    tx.execute(
        &sql,
        params![status.as_str(), id.uuid.to_string(), id.version as i64],
    )
    .map_err(storage_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{sha256_bytes, HashType};
    use crate::state::gate;

    fn open_state() -> (tempfile::TempDir, SqliteState) {
        let dir = tempfile::tempdir().unwrap();
        let state = SqliteState::open(&dir.path().join("state.db")).unwrap();
        (dir, state)
    }

    fn apply(state: &mut SqliteState, kind: EventKind) -> Event {
        let event = Event::new("alice", kind);
        gate::validate(state, &event).unwrap();
        state.apply(&event).unwrap();
        event
    }

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

    #[test]
    fn sqlite_state_tracks_object_lifecycle() {
        let (_dir, mut state) = open_state();
        let uuid = Uuid::new_v4();
        let id = Identifier::new(uuid, 0);

        let create = apply(&mut state, EventKind::object_create(object_record(uuid, 0, "a")));
        assert_eq!(state.object_status(&id).unwrap(), Some(Status::Pending));
        assert_eq!(state.entity_events(&id).unwrap(), vec![create.uuid]);

        apply(&mut state, EventKind::ReviewAccept { event_uuid: create.uuid });
        assert_eq!(state.object_status(&id).unwrap(), Some(Status::Accepted));
        assert_eq!(
            state.objects_by_status(Status::Accepted, None, 64).unwrap(),
            vec![id]
        );
    }

    #[test]
    fn sqlite_state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let uuid = Uuid::new_v4();
        {
            let mut state = SqliteState::open(&path).unwrap();
            apply(&mut state, EventKind::owner_add("alice"));
            apply(&mut state, EventKind::object_create(object_record(uuid, 0, "a")));
        }
        let state = SqliteState::open(&path).unwrap();
        assert_eq!(state.owners().unwrap(), vec!["alice".to_string()]);
        assert_eq!(state.object_max_version(&uuid).unwrap(), Some(0));
    }

    #[test]
    fn sqlite_annotation_links_both_directions() {
        let (_dir, mut state) = open_state();
        apply(&mut state, EventKind::owner_add("alice"));

        let object_uuid = Uuid::new_v4();
        let object_id = Identifier::new(object_uuid, 0);
        apply(
            &mut state,
            EventKind::object_create(object_record(object_uuid, 0, "a")),
        );

        let schema_uuid = Uuid::new_v4();
        let schema = SchemaRecord {
            uuid: schema_uuid,
            version: 0,
            name: "schema-label".to_string(),
            format: crate::core::SCHEMA_FORMAT.to_string(),
            size: 2,
            hash_type: HashType::Sha256,
            hash: sha256_bytes(b"{}"),
        };
        apply(&mut state, EventKind::schema_create(schema));

        let annotation_uuid = Uuid::new_v4();
        let annotation = AnnotationRecord {
            uuid: annotation_uuid,
            version: 0,
            schema: Identifier::new(schema_uuid, 0),
            size: 2,
            hash_type: HashType::Sha256,
            hash: sha256_bytes(b"{}"),
        };
        apply(
            &mut state,
            EventKind::annotation_create(annotation, vec![object_id]),
        );

        assert_eq!(
            state.annotation_objects(&annotation_uuid).unwrap(),
            vec![object_id]
        );
        assert_eq!(
            state.object_annotations(&object_id).unwrap(),
            vec![annotation_uuid]
        );
    }
}
