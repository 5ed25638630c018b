#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;
use transitx_core::core_types::{DatasetId, Version};
use transitx_core::model::transit::{ROUTES, STOPS};
use transitx_core::model::Route;
use transitx_core::{VersionedStore, WriteConflictPolicy};

fn seed_routes(store: &VersionedStore, dataset: &DatasetId, count: usize) {
    let mut tx = store.open_write(dataset).unwrap();
    for i in 0..count {
        let route = Route {
            id: format!("R{}", i),
            agency_id: Some(dataset.to_string()),
            short_name: Some(format!("{}", i)),
            long_name: None,
            route_type: 1,
        };
        tx.put_as(ROUTES, &route.id, &route).unwrap();
    }
    tx.commit().unwrap();
}

#[test]
fn test_reader_does_not_see_uncommitted_writes() {
    let store = VersionedStore::in_memory(WriteConflictPolicy::Fail);
    let bart = DatasetId::from("BART");
    seed_routes(&store, &bart, 3);

    let reader = store.open_read(&bart).unwrap();
    let mut writer = store.open_write(&bart).unwrap();
    writer.get_map_mut(ROUTES).insert("R99", json!({"id": "R99"}));
    writer.get_map_mut(ROUTES).remove("R0");

    assert_eq!(reader.get_map(ROUTES).unwrap().len(), 3);
    assert!(reader.get_map(ROUTES).unwrap().contains_key("R0"));
    assert!(!reader.get_map(ROUTES).unwrap().contains_key("R99"));
    writer.rollback();
}

#[test]
fn test_reader_opened_before_commit_keeps_its_version() {
    let store = VersionedStore::in_memory(WriteConflictPolicy::Fail);
    let bart = DatasetId::from("BART");
    seed_routes(&store, &bart, 2);

    let before = store.open_read(&bart).unwrap();
    let mut writer = store.open_write(&bart).unwrap();
    writer.get_map_mut(STOPS).insert("EMBR", json!({"id": "EMBR"}));
    let outcome = writer.commit().unwrap();

    assert_eq!(before.version(), Version::new(1));
    assert!(before.get_map(STOPS).is_none());

    let after = store.open_read(&bart).unwrap();
    assert_eq!(after.version(), outcome.version);
    assert!(after.get_map(STOPS).unwrap().contains_key("EMBR"));
}

#[test]
fn test_concurrent_readers_during_long_write() {
    let store = Arc::new(VersionedStore::in_memory(WriteConflictPolicy::Fail));
    let bart = DatasetId::from("BART");
    seed_routes(&store, &bart, 6);

    let barrier = Arc::new(Barrier::new(5));
    let writer = {
        let store = store.clone();
        let bart = bart.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            let mut tx = store.open_write(&bart).unwrap();
            barrier.wait();
            for i in 0..500 {
                tx.get_map_mut(ROUTES)
                    .insert(format!("NEW{:03}", i), json!({ "i": i }));
            }
            tx.commit().unwrap()
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let bart = bart.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let tx = store.open_read_at(&bart, Version::new(1)).unwrap();
                barrier.wait();
                for _ in 0..200 {
                    assert_eq!(tx.get_map(ROUTES).unwrap().len(), 6);
                }
            })
        })
        .collect();

    for r in readers {
        r.join().unwrap();
    }
    let outcome = writer.join().unwrap();
    assert_eq!(outcome.version, Version::new(2));
    let head = store.open_read(&bart).unwrap();
    assert_eq!(head.get_map(ROUTES).unwrap().len(), 506);
}

#[test]
fn test_untouched_collections_are_shared_between_versions() {
    let store = VersionedStore::in_memory(WriteConflictPolicy::Fail);
    let bart = DatasetId::from("BART");

    let mut tx = store.open_write(&bart).unwrap();
    tx.get_map_mut(ROUTES).insert("R1", json!({"id": "R1"}));
    tx.get_map_mut(STOPS).insert("S1", json!({"id": "S1"}));
    tx.get_map_mut(STOPS).insert("S2", json!({"id": "S2"}));
    tx.commit().unwrap();

    let mut tx = store.open_write(&bart).unwrap();
    tx.get_map_mut(STOPS).insert("S3", json!({"id": "S3"}));
    tx.commit().unwrap();

    let v1 = store.open_read_at(&bart, Version::new(1)).unwrap();
    let v2 = store.open_read_at(&bart, Version::new(2)).unwrap();

    assert!(v1.state().shares_collection(v2.state(), ROUTES));
    assert!(!v1.state().shares_collection(v2.state(), STOPS));
    let (s1, s2) = (v1.get_map(STOPS).unwrap(), v2.get_map(STOPS).unwrap());
    assert!(s1.shares_record(s2, "S1"));
    assert_eq!(s2.len(), 3);
}

#[test]
fn test_restore_then_commit_reproduces_content() {
    let store = VersionedStore::in_memory(WriteConflictPolicy::Fail);
    let bart = DatasetId::from("BART");
    seed_routes(&store, &bart, 6);

    let mut tx = store.open_write(&bart).unwrap();
    tx.get_map_mut(ROUTES).clear();
    tx.commit().unwrap();

    let restored = store.open_write_from(&bart, Version::new(1)).unwrap();
    assert_eq!(restored.base_version(), Version::new(1));
    let outcome = restored.commit().unwrap();
    assert_eq!(outcome.version, Version::new(3));
    assert_eq!(outcome.base_version, Some(Version::new(1)));

    let original = store.open_read_at(&bart, Version::new(1)).unwrap();
    let now = store.open_read(&bart).unwrap();
    assert!(original.state().same_content(now.state()));
    assert_eq!(
        original.get_map(ROUTES).unwrap().get("R3").map(|r| r.to_string()),
        now.get_map(ROUTES).unwrap().get("R3").map(|r| r.to_string())
    );
}

#[test]
fn test_datasets_are_independent() {
    let store = VersionedStore::in_memory(WriteConflictPolicy::Fail);
    let bart = DatasetId::from("BART");
    let muni = DatasetId::from("MUNI");

    let _bart_writer = store.open_write(&bart).unwrap();
    let muni_writer = store.open_write(&muni).unwrap();
    let outcome = muni_writer.commit().unwrap();

    assert_eq!(outcome.version, Version::new(1));
    assert_eq!(store.head_version(&bart).unwrap(), None);
}
