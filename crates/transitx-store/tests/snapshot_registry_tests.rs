#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use tempfile::TempDir;
use transitx_core::core_types::{DatasetId, Version};
use transitx_core::model::transit::{Route, ROUTES, STOPS};
use transitx_core::model::{SnapshotKey, SnapshotMetadata};
use transitx_core::{ExErrorKind, WriteConflictPolicy};
use transitx_store::DataDir;

fn bart_route(i: usize) -> Route {
    Route {
        id: format!("BART-{}", i),
        agency_id: Some("BART".to_string()),
        short_name: Some(format!("{}", i)),
        long_name: Some(format!("Line {}", i)),
        route_type: 1,
    }
}

fn import_routes(data: &DataDir, ds: &DatasetId, count: usize) -> Version {
    let mut tx = data.records().open_write(ds).unwrap();
    for i in 0..count {
        let route = bart_route(i);
        tx.put_as(ROUTES, &route.id, &route).unwrap();
    }
    tx.commit().unwrap().version
}

#[test]
fn test_import_snapshot_promote_leaves_one_current() {
    let dir = TempDir::new().unwrap();
    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let bart = DatasetId::from("BART");

    let v = import_routes(&data, &bart, 6);
    assert_eq!(v, Version::new(1));

    let snap = data
        .registry()
        .take_snapshot(&bart, SnapshotMetadata::new("initial"))
        .unwrap();
    assert_eq!(snap.key, SnapshotKey::new("BART", 1u64));
    data.registry().promote(&snap.key).unwrap();

    let history: Vec<_> = data
        .registry()
        .list_snapshots(&bart)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].current);
    assert_eq!(history[0].metadata.name, "initial");

    let read = data.records().open_read_at(&bart, snap.version()).unwrap();
    assert_eq!(read.get_map(ROUTES).unwrap().len(), 6);
}

#[test]
fn test_take_snapshot_of_empty_dataset_is_not_found() {
    let data = DataDir::in_memory(WriteConflictPolicy::Fail).unwrap();
    let err = data
        .registry()
        .take_snapshot(&DatasetId::from("BART"), SnapshotMetadata::new("nothing"))
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::NotFound);
}

#[test]
fn test_inverted_validity_range_is_rejected() {
    let data = DataDir::in_memory(WriteConflictPolicy::Fail).unwrap();
    let bart = DatasetId::from("BART");
    import_routes(&data, &bart, 1);

    let from = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let to = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let err = data
        .registry()
        .take_snapshot(&bart, SnapshotMetadata::new("bad").with_valid_range(from, to))
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    assert_eq!(data.registry().list_snapshots(&bart).count(), 0);
}

#[test]
fn test_concurrent_snapshots_of_one_version_get_distinct_versions() {
    const THREADS: usize = 8;
    let dir = TempDir::new().unwrap();
    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let bart = DatasetId::from("BART");
    let v1 = import_routes(&data, &bart, 3);

    let barrier = std::sync::Barrier::new(THREADS);
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let (data, bart, barrier) = (&data, &bart, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    data.registry()
                        .create_snapshot(bart, v1, SnapshotMetadata::new(format!("copy-{}", i)))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let versions: std::collections::BTreeSet<Version> =
        results.into_iter().map(|r| r.unwrap().version()).collect();
    assert_eq!(versions.len(), THREADS);
    // Exactly one snapshot pins the source; the rest are forks
    assert!(versions.contains(&v1));
    assert_eq!(data.records().head_version(&bart).unwrap(), Some(v1));

    let history: Vec<_> = data
        .registry()
        .list_snapshots(&bart)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(history.len(), THREADS);
    assert!(history.iter().all(|s| !s.current));
    for version in versions {
        let read = data.records().open_read_at(&bart, version).unwrap();
        assert_eq!(read.get_map(ROUTES).unwrap().len(), 3);
    }
}

#[test]
fn test_restore_round_trip_is_identical() {
    let dir = TempDir::new().unwrap();
    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let bart = DatasetId::from("BART");

    import_routes(&data, &bart, 3);
    let snap = data
        .registry()
        .take_snapshot(&bart, SnapshotMetadata::new("before edits"))
        .unwrap();

    // Diverge the head
    let mut tx = data.records().open_write(&bart).unwrap();
    tx.remove(ROUTES, "BART-0");
    tx.get_map_mut(STOPS)
        .insert("EMBR", serde_json::json!({ "id": "EMBR", "name": "Embarcadero" }));
    tx.commit().unwrap();

    let restored = data.registry().restore(&snap.key).unwrap().commit().unwrap();
    assert_eq!(restored.version, Version::new(3));

    let original = data.records().open_read_at(&bart, snap.version()).unwrap();
    let head = data.records().open_read(&bart).unwrap();
    assert_eq!(head.version(), Version::new(3));
    assert!(head.state().same_content(original.state()));
    for (key, record) in original.get_map(ROUTES).unwrap().iter() {
        let copy = head.get_map(ROUTES).unwrap().get(key).unwrap();
        assert_eq!(record.to_string(), copy.to_string());
    }
    assert!(head.get_map(STOPS).map_or(true, |m| m.is_empty()));
}

#[test]
fn test_snapshot_metadata_update_and_obsolete_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let bart = DatasetId::from("BART");
    let key = {
        let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
        import_routes(&data, &bart, 2);
        let snap = data
            .registry()
            .take_snapshot(&bart, SnapshotMetadata::new("draft"))
            .unwrap();
        data.registry()
            .update_metadata(
                &snap.key,
                SnapshotMetadata::new("spring").with_comment("service change"),
            )
            .unwrap();
        data.registry().mark_obsolete(&snap.key).unwrap();
        snap.key
    };

    let data = DataDir::open(dir.path(), WriteConflictPolicy::Fail).unwrap();
    let snap = data.registry().get_snapshot(&key).unwrap();
    assert_eq!(snap.metadata.name, "spring");
    assert_eq!(snap.metadata.comment.as_deref(), Some("service change"));
    assert!(snap.obsolete);
    assert!(!snap.current);
}

#[derive(Debug, Clone)]
enum Action {
    Snapshot,
    Promote(usize),
    Obsolete(usize),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Snapshot),
        (0usize..8).prop_map(Action::Promote),
        (0usize..8).prop_map(Action::Obsolete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_at_most_one_current_snapshot(actions in prop::collection::vec(action(), 1..24)) {
        let data = DataDir::in_memory(WriteConflictPolicy::Fail).unwrap();
        let bart = DatasetId::from("BART");
        import_routes(&data, &bart, 1);
        let mut keys: Vec<SnapshotKey> = Vec::new();

        for action in actions {
            match action {
                Action::Snapshot => {
                    let snap = data
                        .registry()
                        .take_snapshot(&bart, SnapshotMetadata::new("s"))
                        .unwrap();
                    keys.push(snap.key);
                }
                Action::Promote(i) if !keys.is_empty() => {
                    let key = &keys[i % keys.len()];
                    match data.registry().promote(key) {
                        Ok(snap) => prop_assert!(snap.current),
                        Err(e) => prop_assert_eq!(e.kind(), ExErrorKind::SnapshotObsolete),
                    }
                }
                Action::Obsolete(i) if !keys.is_empty() => {
                    let key = &keys[i % keys.len()];
                    if let Err(e) = data.registry().mark_obsolete(key) {
                        prop_assert_eq!(e.kind(), ExErrorKind::InvalidInput);
                    }
                }
                _ => {}
            }

            let current = data
                .registry()
                .list_snapshots(&bart)
                .map(|s| s.unwrap())
                .filter(|s| s.current)
                .count();
            prop_assert!(current <= 1);
            for (_, n) in data.registry().current_counts().unwrap() {
                prop_assert_eq!(n, 1);
            }
        }
    }
}
