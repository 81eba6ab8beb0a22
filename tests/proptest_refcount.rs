//! Property-based tests for reference counting.
//!
//! Random interleavings of uploads and deletes must leave every entry's
//! count equal to its live attachments, and no object without one.

mod common;

use proptest::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

use common::{init_test_logging, open_manager, payload, stored_object_count, upload};
use tracker_attachments::{Attachment, DeduplicationPolicy};

#[derive(Debug, Clone)]
enum Op {
    Upload { content: u8 },
    Delete { pick: usize },
    Reopen,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..4).prop_map(|content| Op::Upload { content }),
        3 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
        1 => Just(Op::Reopen),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..Default::default()
    })]

    #[test]
    fn ref_counts_track_live_attachments(ops in prop::collection::vec(op_strategy(), 1..30)) {
        init_test_logging();
        let temp = tempfile::TempDir::new().unwrap();
        let mut manager = open_manager(temp.path(), DeduplicationPolicy::permissive());
        let mut live: Vec<Attachment> = Vec::new();

        for (step, op) in ops.iter().enumerate() {
            match op {
                Op::Upload { content } => {
                    let body = payload(content.wrapping_mul(37), 512 + usize::from(*content));
                    let name = format!("file-{step}.bin");
                    live.push(upload(&manager, &format!("bd-{step}"), &name, &body));
                }
                Op::Delete { pick } => {
                    if live.is_empty() {
                        continue;
                    }
                    let victim = live.remove(pick % live.len());
                    manager.delete(&victim.id).unwrap();
                }
                Op::Reopen => {
                    drop(manager);
                    manager = open_manager(temp.path(), DeduplicationPolicy::permissive());
                }
            }
        }

        let mut expected: BTreeMap<String, u64> = BTreeMap::new();
        for attachment in &live {
            *expected.entry(attachment.hash.clone()).or_default() += 1;
        }
        info!(live = live.len(), unique = expected.len(), "proptest_refcount_final");

        let actual: BTreeMap<String, u64> = manager
            .dedup()
            .entries()
            .unwrap()
            .into_iter()
            .map(|entry| (entry.hash, entry.ref_count))
            .collect();
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(stored_object_count(temp.path()), expected.len());

        let report = manager.dedup().verify(true).unwrap();
        prop_assert!(report.is_healthy(), "unhealthy store: {:?}", report);

        let stats = manager.dedup().stats().unwrap();
        prop_assert_eq!(stats.total_references, live.len() as u64);
        prop_assert_eq!(stats.unique_files, expected.len());
    }
}
