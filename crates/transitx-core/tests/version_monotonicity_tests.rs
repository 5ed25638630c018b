#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use transitx_core::core_types::{DatasetId, Version};
use transitx_core::{VersionedStore, WriteConflictPolicy};

#[derive(Debug, Clone)]
enum Op {
    Commit(u8),
    Fork,
    Rollback,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Commit),
        Just(Op::Fork),
        Just(Op::Rollback),
    ]
}

proptest! {
    #[test]
    fn prop_versions_strictly_increase(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let store = VersionedStore::in_memory(WriteConflictPolicy::Fail);
        let dataset = DatasetId::from("BART");
        let mut allocated: Vec<Version> = Vec::new();

        for op in ops {
            match op {
                Op::Commit(n) => {
                    let mut tx = store.open_write(&dataset).unwrap();
                    tx.get_map_mut("routes").insert(format!("R{}", n), json!({ "n": n }));
                    allocated.push(tx.commit().unwrap().version);
                }
                Op::Fork => {
                    if let Some(head) = store.head_version(&dataset).unwrap() {
                        allocated.push(store.fork_version(&dataset, head).unwrap());
                    }
                }
                Op::Rollback => {
                    store.open_write(&dataset).unwrap().rollback();
                }
            }
        }

        for pair in allocated.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        prop_assert_eq!(store.list_versions(&dataset).unwrap(), allocated);
    }
}

#[test]
fn test_concurrent_commits_never_repeat_versions() {
    let store = Arc::new(VersionedStore::in_memory(WriteConflictPolicy::Block {
        timeout: Duration::from_secs(30),
    }));
    let dataset = DatasetId::from("BART");

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            let dataset = dataset.clone();
            thread::spawn(move || {
                let mut versions = Vec::new();
                for i in 0..10 {
                    if i % 3 == 0 {
                        if let Some(head) = store.head_version(&dataset).unwrap() {
                            versions.push(store.fork_version(&dataset, head).unwrap());
                            continue;
                        }
                    }
                    let mut tx = store.open_write(&dataset).unwrap();
                    tx.get_map_mut("stops")
                        .insert(format!("T{}-{}", t, i), json!({}));
                    versions.push(tx.commit().unwrap().version);
                }
                versions
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for h in handles {
        for v in h.join().unwrap() {
            assert!(seen.insert(v), "version {} allocated twice", v);
        }
    }
    assert_eq!(seen.len(), 80);
    let max = seen.iter().max().copied().unwrap();
    assert_eq!(max, Version::new(80));
}
