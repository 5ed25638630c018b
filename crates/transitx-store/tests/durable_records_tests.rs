#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;
use std::path::Path;
use tempfile::TempDir;
use transitx_core::core_types::{DatasetId, Version};
use transitx_core::model::transit::ROUTES;
use transitx_core::{ExErrorKind, WriteConflictPolicy};
use transitx_store::cas::compute_digest;
use transitx_store::data_dir::CAS_DIR;
use transitx_store::DataDir;

fn blob_path(root: &Path, value: &serde_json::Value) -> std::path::PathBuf {
    let digest = compute_digest(&serde_json::to_vec(value).unwrap());
    root.join(CAS_DIR)
        .join(&digest[..2])
        .join(format!("{}.json", digest))
}

fn commit(data: &DataDir, ds: &DatasetId, key: &str, value: serde_json::Value) -> Version {
    let mut tx = data.records().open_write(ds).unwrap();
    tx.get_map_mut(ROUTES).insert(key, value);
    tx.commit().unwrap().version
}

#[test]
fn test_versions_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let bart = DatasetId::from("BART");
    {
        let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
        commit(&data, &bart, "R1", json!({ "id": "R1" }));
        commit(&data, &bart, "R2", json!({ "id": "R2" }));
    }

    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let head = data.records().open_read(&bart).unwrap();
    assert_eq!(head.version(), Version::new(2));
    assert_eq!(head.get_map(ROUTES).unwrap().len(), 2);

    let first = data.records().open_read_at(&bart, Version::new(1)).unwrap();
    assert_eq!(first.get_map(ROUTES).unwrap().len(), 1);

    // The counter continues where it left off
    let v = commit(&data, &bart, "R3", json!({ "id": "R3" }));
    assert_eq!(v, Version::new(3));
}

#[test]
fn test_forked_version_survives_reopen_without_moving_head() {
    let dir = TempDir::new().unwrap();
    let bart = DatasetId::from("BART");
    {
        let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
        commit(&data, &bart, "R1", json!({ "id": "R1" }));
        let forked = data.records().fork_version(&bart, Version::new(1)).unwrap();
        assert_eq!(forked, Version::new(2));
    }

    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    assert_eq!(
        data.records().head_version(&bart).unwrap(),
        Some(Version::new(1))
    );
    assert_eq!(
        data.records().list_versions(&bart).unwrap(),
        vec![Version::new(1), Version::new(2)]
    );
    assert_eq!(commit(&data, &bart, "R2", json!({})), Version::new(3));
}

#[test]
fn test_unchanged_records_share_blobs() {
    let dir = TempDir::new().unwrap();
    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let bart = DatasetId::from("BART");

    commit(&data, &bart, "R1", json!({ "id": "R1" }));
    commit(&data, &bart, "R2", json!({ "id": "R2" }));

    assert!(blob_path(dir.path(), &json!({ "id": "R1" })).exists());
    assert!(blob_path(dir.path(), &json!({ "id": "R2" })).exists());
}

#[test]
fn test_tampered_head_is_detected_on_load() {
    let dir = TempDir::new().unwrap();
    let bart = DatasetId::from("BART");
    {
        let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
        commit(&data, &bart, "R1", json!({ "id": "R1", "color": "red" }));
    }
    std::fs::write(
        blob_path(dir.path(), &json!({ "id": "R1", "color": "red" })),
        b"{\"id\":\"R1\",\"color\":\"blue\"}",
    )
    .unwrap();

    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let err = data.records().open_read(&bart).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::CorruptionDetected);
    let err = data.records().open_write(&bart).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::CorruptionDetected);
}

#[test]
fn test_tampered_history_refuses_writes_until_cleared() {
    let dir = TempDir::new().unwrap();
    let bart = DatasetId::from("BART");
    {
        let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
        commit(&data, &bart, "R1", json!({ "rev": 1 }));
        commit(&data, &bart, "R1", json!({ "rev": 2 }));
    }
    std::fs::write(blob_path(dir.path(), &json!({ "rev": 1 })), b"{\"rev\":9}").unwrap();

    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    // Head is intact
    assert_eq!(data.records().open_read(&bart).unwrap().version(), Version::new(2));

    let err = data.records().open_read_at(&bart, Version::new(1)).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::CorruptionDetected);
    assert!(data.records().corruption(&bart).unwrap().is_some());
    assert_eq!(
        data.records().open_write(&bart).unwrap_err().kind(),
        ExErrorKind::CorruptionDetected
    );
    drop(data);

    // The flag is durable
    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    assert!(data.records().corruption(&bart).unwrap().is_some());

    data.records().clear_corruption(&bart).unwrap();
    assert_eq!(commit(&data, &bart, "R2", json!({})), Version::new(3));
}

#[test]
fn test_only_head_and_held_versions_stay_resident() {
    let dir = TempDir::new().unwrap();
    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let bart = DatasetId::from("BART");

    for i in 0..20 {
        let key = format!("R{}", i);
        commit(&data, &bart, &key, json!({ "id": key }));
        let reader = data.records().open_read(&bart).unwrap();
        assert_eq!(reader.get_map(ROUTES).unwrap().len(), i + 1);
    }
    assert_eq!(data.records().list_versions(&bart).unwrap().len(), 20);
    assert_eq!(
        data.records().resident_versions(&bart).unwrap(),
        vec![Version::new(20)]
    );

    // Old versions come back from storage and stay only while held
    let old = data.records().open_read_at(&bart, Version::new(5)).unwrap();
    assert_eq!(old.get_map(ROUTES).unwrap().len(), 5);
    assert_eq!(
        data.records().resident_versions(&bart).unwrap(),
        vec![Version::new(5), Version::new(20)]
    );
    drop(old);
    assert_eq!(
        data.records().resident_versions(&bart).unwrap(),
        vec![Version::new(20)]
    );

    // A reader of the old head keeps it alive across the next commit
    let pinned = data.records().open_read(&bart).unwrap();
    commit(&data, &bart, "R20", json!({ "id": "R20" }));
    assert_eq!(
        data.records().resident_versions(&bart).unwrap(),
        vec![Version::new(20), Version::new(21)]
    );
    assert_eq!(pinned.get_map(ROUTES).unwrap().len(), 20);
}
