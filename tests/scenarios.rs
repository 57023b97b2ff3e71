//! End-to-end scenarios driven through the registry and dataset API,
//! on the filesystem backend.

use std::sync::Arc;

use corral::dataset::BlobInput;
use corral::{Error, EventKind, Registry, Status};

const LABEL_SCHEMA: &[u8] =
    br#"{"type":"object","properties":{"label":{"type":"string"}},"required":["label"]}"#;

fn open_registry() -> (tempfile::TempDir, Registry) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::open(dir.path()).unwrap();
    (dir, registry)
}

#[test]
fn create_then_review_moves_schema_to_accepted() {
    let (_dir, registry) = open_registry();
    let dataset = registry.create_dataset("d1", "alice").unwrap();

    let info = dataset
        .create_schema("alice", "schema-label", BlobInput::new(LABEL_SCHEMA.to_vec()))
        .unwrap();
    assert_eq!(info.name, "schema-label");
    assert_eq!(info.versions, 1);

    let pending = dataset.schemas_by_status(Status::Pending, None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0.uuid, info.uuid);
    assert_eq!(pending[0].0.version, 0);
    assert_eq!(pending[0].1, "schema-label");

    // Find the create event in the log and accept it.
    let create_event = dataset
        .events(None)
        .unwrap()
        .into_iter()
        .find(|event| matches!(event.kind, EventKind::SchemaCreate { .. }))
        .unwrap();
    dataset.accept_event("alice", create_event.uuid).unwrap();

    assert!(dataset.schemas_by_status(Status::Pending, None).unwrap().is_empty());
    let accepted = dataset.schemas_by_status(Status::Accepted, None).unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].0.uuid, info.uuid);
}

#[test]
fn annotation_validates_against_accepted_schema() {
    let (_dir, registry) = open_registry();
    let dataset = registry.create_dataset("d1", "alice").unwrap();

    let schema = dataset
        .create_schema("alice", "schema-label", BlobInput::new(LABEL_SCHEMA.to_vec()))
        .unwrap();
    let object = dataset
        .create_object("alice", "obj.txt", "text/plain", BlobInput::new(b"bird".to_vec()))
        .unwrap();
    for event in dataset.events(None).unwrap() {
        if event.kind.is_reviewable() {
            dataset.accept_event("alice", event.uuid).unwrap();
        }
    }
    assert_eq!(
        dataset.schemas_by_status(Status::Accepted, None).unwrap()[0].0.uuid,
        schema.uuid
    );

    let annotation = dataset
        .create_annotation(
            "alice",
            "schema-label",
            0,
            vec![object],
            BlobInput::new(br#"{"label":"bird"}"#.to_vec()),
        )
        .unwrap();
    assert_eq!(annotation.version, 0);

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
        Error::Core(corral::CoreError::Validation { reason, .. }) => {
            assert_eq!(reason, "schema")
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn concurrent_updates_assign_dense_versions() {
    let (_dir, registry) = open_registry();
    let dataset = registry.create_dataset("d1", "alice").unwrap();
    let created = dataset
        .create_object("alice", "obj.txt", "text/plain", BlobInput::new(b"v0".to_vec()))
        .unwrap();

    let dataset = registry.dataset("d1").unwrap();
    let mut handles = Vec::new();
    for i in 0..10u32 {
        let dataset: Arc<_> = dataset.clone();
        let uuid = created.uuid;
        handles.push(std::thread::spawn(move || {
            let bytes = format!("update-{i}").into_bytes();
            dataset
                .update_object("alice", uuid, "obj.txt", "text/plain", BlobInput::new(bytes))
                .unwrap()
        }));
    }

    let mut versions: Vec<u64> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().version)
        .collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=10).collect::<Vec<u64>>());

    let info = dataset.object_info(&created.uuid).unwrap();
    assert_eq!(info.versions, 11);
}

#[test]
fn owner_floor_is_enforced_end_to_end() {
    let (_dir, registry) = open_registry();
    let dataset = registry.create_dataset("d1", "alice").unwrap();

    let err = dataset.remove_owner("alice", "alice").unwrap_err();
    match err {
        Error::Core(corral::CoreError::Validation { reason, .. }) => {
            assert_eq!(reason, "last-owner")
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(dataset.owners().unwrap(), vec!["alice".to_string()]);
}

#[test]
fn review_accept_and_reject_are_mutually_exclusive() {
    let (_dir, registry) = open_registry();
    let dataset = registry.create_dataset("d1", "alice").unwrap();
    let created = dataset
        .create_object("alice", "obj.txt", "text/plain", BlobInput::new(b"v0".to_vec()))
        .unwrap();

    let create_event = dataset
        .events(None)
        .unwrap()
        .into_iter()
        .find(|event| matches!(event.kind, EventKind::ObjectCreate { .. }))
        .unwrap();

    dataset.reject_event("alice", create_event.uuid).unwrap();
    assert_eq!(
        dataset.objects_by_status(Status::Rejected, None).unwrap(),
        vec![created]
    );

    let err = dataset.accept_event("alice", create_event.uuid).unwrap_err();
    match err {
        Error::Core(corral::CoreError::Validation { reason, .. }) => {
            assert_eq!(reason, "reviewed")
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn events_paginate_with_exclusive_after() {
    let (_dir, registry) = open_registry();
    let dataset = registry.create_dataset("d1", "alice").unwrap();
    for i in 0..5 {
        dataset
            .create_object(
                "alice",
                &format!("obj-{i}.txt"),
                "text/plain",
                BlobInput::new(format!("content-{i}").into_bytes()),
            )
            .unwrap();
    }

    // Owner-add plus five creates.
    let all = dataset.events(None).unwrap();
    assert_eq!(all.len(), 6);

    let rest = dataset.events(Some(&all[2].uuid)).unwrap();
    assert_eq!(rest.len(), 3);
    assert_eq!(rest[0].uuid, all[3].uuid);

    let err = dataset.events(Some(&uuid::Uuid::new_v4())).unwrap_err();
    assert!(matches!(
        err,
        Error::Keeper(corral::KeeperError::UnknownAfter { .. })
    ));
}

#[test]
fn deleting_a_rejected_object_is_refused() {
    let (_dir, registry) = open_registry();
    let dataset = registry.create_dataset("d1", "alice").unwrap();
    let created = dataset
        .create_object("alice", "obj.txt", "text/plain", BlobInput::new(b"v0".to_vec()))
        .unwrap();

    let create_event = dataset.events(None).unwrap().pop().unwrap();
    dataset.reject_event("alice", create_event.uuid).unwrap();

    let err = dataset.delete_object("alice", created).unwrap_err();
    match err {
        Error::Core(corral::CoreError::Validation { reason, .. }) => assert_eq!(reason, "status"),
        other => panic!("unexpected error {other:?}"),
    }
}
