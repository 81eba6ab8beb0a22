//! Several threads sharing one manager over the same content.
//!
//! Mutations serialize on the index lock, so whatever the interleaving the
//! counts must match the attachments still alive when the threads finish.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::info;

use common::{payload, stored_object_count, test_log, test_manager, upload};
use tracker_attachments::DeduplicationPolicy;

const THREADS: usize = 6;
const ROUNDS: usize = 12;

#[test]
fn parallel_uploads_and_deletes_keep_counts_exact() {
    let _log = test_log("parallel_uploads_and_deletes_keep_counts_exact");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let manager = Arc::new(manager);
    let bodies = Arc::new([payload(21, 2048), payload(42, 2048)]);

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let manager = Arc::clone(&manager);
            let bodies = Arc::clone(&bodies);
            thread::spawn(move || {
                let issue = format!("bd-{worker}");
                let mut kept = Vec::new();
                for round in 0..ROUNDS {
                    let body = &bodies[round % 2];
                    let attachment = upload(&manager, &issue, &format!("f{round}.bin"), body);
                    // Every third upload is removed again right away.
                    if round % 3 == 0 {
                        manager.delete(&attachment.id).expect("delete");
                    } else {
                        kept.push(attachment);
                    }
                }
                kept
            })
        })
        .collect();

    let live: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().expect("worker panicked"))
        .collect();
    info!(live = live.len(), "parallel workers finished");

    let mut expected: BTreeMap<String, u64> = BTreeMap::new();
    for attachment in &live {
        assert!(attachment.deduplicated);
        *expected.entry(attachment.hash.clone()).or_default() += 1;
    }

    let entries = manager.dedup().entries().unwrap();
    let actual: BTreeMap<String, u64> = entries
        .iter()
        .map(|entry| (entry.hash.clone(), entry.ref_count))
        .collect();
    assert_eq!(actual, expected);
    assert_eq!(manager.dedup().references().unwrap().len(), live.len());
    assert_eq!(manager.list(None).unwrap().len(), live.len());
    assert_eq!(stored_object_count(dir.path()), expected.len());

    for attachment in &live {
        let body = manager.read(&attachment.id).unwrap();
        assert!(bodies.iter().any(|candidate| *candidate == body));
    }
    assert!(manager.dedup().verify(true).unwrap().is_healthy());
}

#[test]
fn racing_last_delete_and_new_upload_never_lose_bytes() {
    let _log = test_log("racing_last_delete_and_new_upload_never_lose_bytes");
    let (manager, _dir) = test_manager(DeduplicationPolicy::default());
    let manager = Arc::new(manager);
    let body = Arc::new(payload(77, 4096));

    for round in 0..20 {
        let seed = upload(&manager, "bd-seed", &format!("seed{round}.bin"), &body);

        let deleter = {
            let manager = Arc::clone(&manager);
            let id = seed.id.clone();
            thread::spawn(move || manager.delete(&id).expect("delete"))
        };
        let uploader = {
            let manager = Arc::clone(&manager);
            let body = Arc::clone(&body);
            thread::spawn(move || upload(&manager, "bd-race", &format!("race{round}.bin"), &body))
        };

        deleter.join().expect("deleter panicked");
        let raced = uploader.join().expect("uploader panicked");
        assert_eq!(manager.read(&raced.id).unwrap(), *body);
        assert_eq!(
            manager.dedup().get(&raced.hash).unwrap().unwrap().ref_count,
            1
        );
        manager.delete(&raced.id).unwrap();
    }
    assert!(manager.dedup().entries().unwrap().is_empty());
}
