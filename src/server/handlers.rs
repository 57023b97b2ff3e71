//! Route handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::{ContentDigest, Event, Identifier, Status};
use crate::dataset::{BlobInput, Dataset};
use crate::state::{EntityInfo, SchemaInfo};

use super::auth::AuthUser;
use super::error::ApiError;
use super::AppState;

// ----- request bodies -----------------------------------------------------

#[derive(Deserialize)]
pub struct CreateDatasetBody {
    name: String,
}

#[derive(Deserialize)]
pub struct CreateSchemaBody {
    name: String,
    schema: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
pub struct UpdateSchemaBody {
    schema: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
pub struct ObjectBody {
    name: String,
    mimetype: String,
    object: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
pub struct SchemaRefBody {
    name: String,
    version: u64,
}

#[derive(Deserialize)]
pub struct CreateAnnotationBody {
    schema: SchemaRefBody,
    object_identifiers: Vec<Identifier>,
    annotation: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
pub struct UpdateAnnotationBody {
    schema: SchemaRefBody,
    annotation: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
pub struct AfterQuery {
    #[serde(default)]
    after: Option<Uuid>,
}

// ----- shared helpers -----------------------------------------------------

/// Run a synchronous core operation on the blocking pool.
async fn run<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| ApiError::internal(format!("blocking task failed: {err}")))?
        .map_err(ApiError::from)
}

fn dataset(state: &AppState, name: &str) -> Result<Arc<Dataset>, ApiError> {
    state.registry.dataset(name).map_err(ApiError::from)
}

fn require_owner(dataset: &Dataset, user: &str) -> Result<(), ApiError> {
    if dataset.is_owner(user).map_err(ApiError::from)? {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn blob_input(
    field: &str,
    raw: &str,
    hash: Option<String>,
    size: Option<u64>,
) -> Result<BlobInput, ApiError> {
    let bytes = BASE64
        .decode(raw)
        .map_err(|err| ApiError::bad_request("base64", format!("`{field}` is not base64: {err}")))?;
    let declared_hash = hash
        .map(|raw| ContentDigest::parse(&raw))
        .transpose()
        .map_err(|err| ApiError::bad_request("digest", err.to_string()))?;
    Ok(BlobInput {
        bytes,
        declared_hash,
        declared_size: size,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::bad_request("uuid", format!("`{raw}` is not a uuid")))
}

/// Statuses addressable on object and annotation listing routes.
fn entity_status(key: &str) -> Option<Status> {
    match key {
        "pending" => Some(Status::Pending),
        "accepted" => Some(Status::Accepted),
        "rejected" => Some(Status::Rejected),
        "deleted" => Some(Status::Deleted),
        _ => None,
    }
}

/// Statuses addressable on schema listing routes.
fn schema_status(key: &str) -> Option<Status> {
    match key {
        "pending" => Some(Status::Pending),
        "accepted" => Some(Status::Accepted),
        "rejected" => Some(Status::Rejected),
        "deprecated" => Some(Status::Deprecated),
        _ => None,
    }
}

fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

fn identifier_json(id: &Identifier) -> Value {
    json!({ "uuid": id.uuid, "version": id.version })
}

// ----- datasets -----------------------------------------------------------

pub async fn create_dataset(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<CreateDatasetBody>,
) -> Result<Json<Value>, ApiError> {
    let registry = state.registry.clone();
    let name = body.name.clone();
    run(move || registry.create_dataset(&name, &user).map(|_| ())).await?;
    Ok(Json(json!({ "dataset": body.name })))
}

pub async fn list_datasets(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "datasets": state.registry.list() }))
}

// ----- schemas ------------------------------------------------------------

pub async fn create_schema(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<CreateSchemaBody>,
) -> Result<Json<SchemaInfo>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let blob = blob_input("schema", &body.schema, body.hash, body.size)?;
    let info = run(move || ds.create_schema(&user, &body.name, blob)).await?;
    Ok(Json(info))
}

pub async fn list_schemas(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Vec<SchemaInfo>>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let infos = run(move || ds.list_schemas(query.after.as_ref())).await?;
    Ok(Json(infos))
}

/// `GET /datasets/{d}/schemas/{name}` doubles as the by-status listing
/// when the segment is a status keyword; schema names always carry the
/// `schema-` prefix, so the two cannot collide.
pub async fn get_schema(
    State(state): State<AppState>,
    Path((dataset_name, key)): Path<(String, String)>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    if let Some(status) = schema_status(&key) {
        let entries = run(move || ds.schemas_by_status(status, query.after.as_ref())).await?;
        let listing: Vec<Value> = entries
            .iter()
            .map(|(id, name)| json!({ "uuid": id.uuid, "name": name, "version": id.version }))
            .collect();
        return Ok(Json(json!(listing)));
    }

    let info = run(move || ds.schema_summary(&key)).await?;
    Ok(Json(json!({
        "name": info.name,
        "uuid": info.uuid,
        "versions": info.versions,
    })))
}

pub async fn update_schema(
    State(state): State<AppState>,
    Path((dataset_name, name)): Path<(String, String)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<UpdateSchemaBody>,
) -> Result<Json<SchemaInfo>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let blob = blob_input("schema", &body.schema, body.hash, body.size)?;
    let info = run(move || ds.update_schema(&user, &name, blob)).await?;
    Ok(Json(info))
}

pub async fn schema_detail(
    State(state): State<AppState>,
    Path((dataset_name, name, version)): Path<(String, String, u64)>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let (record, bytes) = run(move || ds.schema_detail(&name, version)).await?;
    Ok(Json(json!({
        "schema": record,
        "bytes": encode_bytes(&bytes),
    })))
}

pub async fn deprecate_schema(
    State(state): State<AppState>,
    Path((dataset_name, name, version)): Path<(String, String, u64)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let response_name = name.clone();
    let id = run(move || ds.deprecate_schema(&user, &name, version)).await?;
    Ok(Json(json!({
        "uuid": id.uuid,
        "version": id.version,
        "name": response_name,
    })))
}

// ----- owners -------------------------------------------------------------

pub async fn list_owners(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let owners = run(move || ds.owners()).await?;
    Ok(Json(owners))
}

pub async fn add_owner(
    State(state): State<AppState>,
    Path((dataset_name, owner)): Path<(String, String)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    require_owner(&ds, &user)?;
    let response = owner.clone();
    run(move || ds.add_owner(&user, &owner)).await?;
    Ok(Json(json!({ "user": response })))
}

pub async fn remove_owner(
    State(state): State<AppState>,
    Path((dataset_name, owner)): Path<(String, String)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    require_owner(&ds, &user)?;
    let response = owner.clone();
    run(move || ds.remove_owner(&user, &owner)).await?;
    Ok(Json(json!({ "user": response })))
}

// ----- objects ------------------------------------------------------------

pub async fn create_object(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<ObjectBody>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let blob = blob_input("object", &body.object, body.hash, body.size)?;
    let id = run(move || ds.create_object(&user, &body.name, &body.mimetype, blob)).await?;
    Ok(Json(identifier_json(&id)))
}

pub async fn list_objects(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let infos: Vec<EntityInfo> = run(move || ds.list_objects(query.after.as_ref())).await?;
    Ok(Json(json!({ "object_infos": infos })))
}

/// `GET /datasets/{d}/objects/{key}`: a UUID gives the object's info, a
/// status keyword lists revisions in that status.
pub async fn get_object(
    State(state): State<AppState>,
    Path((dataset_name, key)): Path<(String, String)>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    if let Some(status) = entity_status(&key) {
        let ids = run(move || ds.objects_by_status(status, query.after.as_ref())).await?;
        let listing: Vec<Value> = ids.iter().map(identifier_json).collect();
        return Ok(Json(json!(listing)));
    }

    let uuid = parse_uuid(&key)?;
    let info = run(move || ds.object_info(&uuid)).await?;
    Ok(Json(json!({ "object_info": info })))
}

pub async fn update_object(
    State(state): State<AppState>,
    Path((dataset_name, key)): Path<(String, String)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<ObjectBody>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let uuid = parse_uuid(&key)?;
    let blob = blob_input("object", &body.object, body.hash, body.size)?;
    let id = run(move || ds.update_object(&user, uuid, &body.name, &body.mimetype, blob)).await?;
    Ok(Json(identifier_json(&id)))
}

pub async fn object_detail(
    State(state): State<AppState>,
    Path((dataset_name, uuid, version)): Path<(String, Uuid, u64)>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let detail = run(move || ds.object_detail(Identifier::new(uuid, version))).await?;
    Ok(Json(json!({
        "object": detail.object,
        "bytes": encode_bytes(&detail.bytes),
        "events": detail.events,
        "annotations": detail.annotations,
    })))
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path((dataset_name, uuid, version)): Path<(String, Uuid, u64)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let id = Identifier::new(uuid, version);
    run(move || ds.delete_object(&user, id)).await?;
    Ok(Json(identifier_json(&id)))
}

// ----- events and review --------------------------------------------------

pub async fn list_events(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let events = run(move || ds.events(query.after.as_ref())).await?;
    Ok(Json(events))
}

pub async fn accept_event(
    State(state): State<AppState>,
    Path((dataset_name, event)): Path<(String, Uuid)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    require_owner(&ds, &user)?;
    run(move || ds.accept_event(&user, event)).await?;
    Ok(Json(json!({ "uuid": event })))
}

pub async fn reject_event(
    State(state): State<AppState>,
    Path((dataset_name, event)): Path<(String, Uuid)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    require_owner(&ds, &user)?;
    run(move || ds.reject_event(&user, event)).await?;
    Ok(Json(json!({ "uuid": event })))
}

// ----- annotations --------------------------------------------------------

pub async fn create_annotation(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<CreateAnnotationBody>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let blob = blob_input("annotation", &body.annotation, body.hash, body.size)?;
    let id = run(move || {
        ds.create_annotation(
            &user,
            &body.schema.name,
            body.schema.version,
            body.object_identifiers,
            blob,
        )
    })
    .await?;
    Ok(Json(identifier_json(&id)))
}

pub async fn list_annotations(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Vec<EntityInfo>>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let infos = run(move || ds.list_annotations(query.after.as_ref())).await?;
    Ok(Json(infos))
}

/// `GET /datasets/{d}/annotations/{key}`: a UUID or a status keyword.
pub async fn get_annotation(
    State(state): State<AppState>,
    Path((dataset_name, key)): Path<(String, String)>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    if let Some(status) = entity_status(&key) {
        let ids = run(move || ds.annotations_by_status(status, query.after.as_ref())).await?;
        let listing: Vec<Value> = ids.iter().map(identifier_json).collect();
        return Ok(Json(json!(listing)));
    }

    let uuid = parse_uuid(&key)?;
    let info = run(move || ds.annotation_info(&uuid)).await?;
    Ok(Json(json!({ "uuid": info.uuid, "versions": info.versions })))
}

pub async fn update_annotation(
    State(state): State<AppState>,
    Path((dataset_name, key)): Path<(String, String)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<UpdateAnnotationBody>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let uuid = parse_uuid(&key)?;
    let blob = blob_input("annotation", &body.annotation, body.hash, body.size)?;
    let id = run(move || {
        ds.update_annotation(&user, uuid, &body.schema.name, body.schema.version, blob)
    })
    .await?;
    Ok(Json(identifier_json(&id)))
}

pub async fn annotation_detail(
    State(state): State<AppState>,
    Path((dataset_name, uuid, version)): Path<(String, Uuid, u64)>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let detail = run(move || ds.annotation_detail(Identifier::new(uuid, version))).await?;
    Ok(Json(json!({
        "annotation": detail.annotation,
        "bytes": encode_bytes(&detail.bytes),
        "events": detail.events,
        "objects": detail.objects,
    })))
}

pub async fn delete_annotation(
    State(state): State<AppState>,
    Path((dataset_name, uuid, version)): Path<(String, Uuid, u64)>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let ds = dataset(&state, &dataset_name)?;
    let id = Identifier::new(uuid, version);
    run(move || ds.delete_annotation(&user, id)).await?;
    Ok(Json(identifier_json(&id)))
}
