//! End-to-end lifecycle of deduplicated uploads through the manager.

mod common;

use common::{open_manager, payload, stored_object_count, test_log, test_manager, upload};
use std::fs;
use std::io::Cursor;
use tracker_attachments::{AttachError, CancelToken, DeduplicationPolicy};

#[test]
fn three_identical_uploads_share_one_object() {
    let _log = test_log("three_identical_uploads_share_one_object");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let body = payload(7, 4096);

    let first = upload(&manager, "bd-1", "spec.pdf", &body);
    let second = upload(&manager, "bd-2", "spec-copy.pdf", &body);
    let third = upload(&manager, "bd-3", "spec.pdf", &body);

    assert!(first.deduplicated && second.deduplicated && third.deduplicated);
    assert_eq!(first.hash, second.hash);
    assert_eq!(second.hash, third.hash);
    assert_eq!(stored_object_count(dir.path()), 1);

    let entry = manager.dedup().get(&first.hash).unwrap().unwrap();
    assert_eq!(entry.ref_count, 3);
    assert_eq!(entry.size, 4096);

    let stats = manager.dedup().stats().unwrap();
    assert_eq!(stats.unique_files, 1);
    assert_eq!(stats.total_references, 3);
    assert_eq!(stats.unique_size, 4096);
    assert_eq!(stats.total_size_without_dedup, 3 * 4096);
    assert_eq!(stats.space_saved, 2 * 4096);
    assert!((stats.deduplication_ratio - 3.0).abs() < f64::EPSILON);
    assert_eq!(stats.top_duplicates.len(), 1);

    for attachment in [&first, &second, &third] {
        assert_eq!(manager.read(&attachment.id).unwrap(), body);
    }
}

#[test]
fn deleting_last_reference_collects_object() {
    let _log = test_log("deleting_last_reference_collects_object");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let body = payload(3, 2048);

    let a = upload(&manager, "bd-1", "a.bin", &body);
    let b = upload(&manager, "bd-2", "b.bin", &body);
    let c = upload(&manager, "bd-3", "c.bin", &body);
    let hash = a.hash.clone();
    let object = dir.path().join("dedup").join(&hash[..2]).join(&hash[2..]);
    assert!(object.exists());

    manager.delete(&a.id).unwrap();
    manager.delete(&b.id).unwrap();
    assert_eq!(manager.dedup().get(&hash).unwrap().unwrap().ref_count, 1);
    assert!(object.exists());
    assert_eq!(manager.read(&c.id).unwrap(), body);

    manager.delete(&c.id).unwrap();
    assert!(manager.dedup().get(&hash).unwrap().is_none());
    assert!(!object.exists());
    assert!(
        !dir.path()
            .join("dedup/index/hashes")
            .join(format!("{hash}.json"))
            .exists()
    );
    assert!(manager.list(None).unwrap().is_empty());
    assert_eq!(stored_object_count(dir.path()), 0);

    // The same bytes uploaded again start over from a fresh entry.
    let d = upload(&manager, "bd-4", "d.bin", &body);
    assert_eq!(d.hash, hash);
    assert!(d.deduplicated);
    assert!(object.exists());
    let entry = manager.dedup().get(&hash).unwrap().unwrap();
    assert_eq!(entry.ref_count, 1);
    assert_eq!(entry.original_filename, "d.bin");
    assert!(manager.dedup().verify(true).unwrap().is_healthy());
}

#[test]
fn state_survives_reopen() {
    let _log = test_log("state_survives_reopen");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let body = payload(11, 1500);
    let a = upload(&manager, "bd-1", "a.log", &body);
    let b = upload(&manager, "bd-1", "b.log", &body);
    drop(manager);

    let reopened = open_manager(dir.path(), DeduplicationPolicy::default());
    let entry = reopened.dedup().get(&a.hash).unwrap().unwrap();
    assert_eq!(entry.ref_count, 2);
    let refs = reopened.dedup().references_for(&a.hash).unwrap();
    let mut ids: Vec<_> = refs.iter().map(|r| r.attachment_id.clone()).collect();
    ids.sort();
    let mut expected = vec![a.id.clone(), b.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    reopened.delete(&a.id).unwrap();
    drop(reopened);

    let again = open_manager(dir.path(), DeduplicationPolicy::default());
    assert_eq!(again.dedup().get(&a.hash).unwrap().unwrap().ref_count, 1);
    assert!(again.dedup().verify(true).unwrap().is_healthy());
}

#[test]
fn mixed_policy_keeps_small_files_private() {
    let _log = test_log("mixed_policy_keeps_small_files_private");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());

    let small = upload(&manager, "bd-1", "tiny.txt", b"hello");
    let small_again = upload(&manager, "bd-2", "tiny.txt", b"hello");
    assert!(!small.deduplicated);
    assert!(!small_again.deduplicated);
    assert_eq!(stored_object_count(dir.path()), 0);
    assert!(small.storage_path.exists());
    assert!(small_again.storage_path.exists());
    assert_ne!(small.storage_path, small_again.storage_path);

    manager.delete(&small.id).unwrap();
    assert!(!small.storage_path.exists());
    assert_eq!(manager.read(&small_again.id).unwrap(), b"hello");
}

#[test]
fn excluded_content_type_is_stored_traditionally() {
    let _log = test_log("excluded_content_type_is_stored_traditionally");
    let policy = DeduplicationPolicy {
        excluded_content_types: vec!["video/".to_string()],
        ..DeduplicationPolicy::permissive()
    };
    let (manager, _dir) = test_manager(policy);
    let body = payload(1, 4096);

    let video = manager
        .upload(
            "bd-1",
            "clip.mp4",
            "Video/MP4",
            Cursor::new(body.clone()),
            &CancelToken::new(),
        )
        .unwrap();
    assert!(!video.deduplicated);

    let doc = manager
        .upload(
            "bd-1",
            "doc.pdf",
            "application/pdf",
            Cursor::new(body),
            &CancelToken::new(),
        )
        .unwrap();
    assert!(doc.deduplicated);
}

#[test]
fn missing_reference_does_not_block_record_delete() {
    let _log = test_log("missing_reference_does_not_block_record_delete");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let body = payload(5, 2048);
    let a = upload(&manager, "bd-1", "a.bin", &body);
    drop(manager);

    fs::remove_file(
        dir.path()
            .join("dedup/index/references")
            .join(format!("{}.json", a.id)),
    )
    .unwrap();

    let reopened = open_manager(dir.path(), DeduplicationPolicy::default());
    reopened.delete(&a.id).unwrap();
    let err = reopened.get(&a.id).unwrap_err();
    assert!(matches!(err, AttachError::AttachmentNotFound { .. }));

    let report = reopened.dedup().verify(false).unwrap();
    assert_eq!(report.ref_count_mismatches.len(), 1);
    assert_eq!(report.ref_count_mismatches[0].hash, a.hash);
    assert_eq!(report.ref_count_mismatches[0].recorded, 1);
    assert_eq!(report.ref_count_mismatches[0].actual, 0);
}

#[test]
fn dangling_reference_does_not_block_record_delete() {
    let _log = test_log("dangling_reference_does_not_block_record_delete");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let body = payload(6, 2048);
    let a = upload(&manager, "bd-1", "a.bin", &body);
    drop(manager);

    fs::remove_file(
        dir.path()
            .join("dedup/index/hashes")
            .join(format!("{}.json", a.hash)),
    )
    .unwrap();

    let reopened = open_manager(dir.path(), DeduplicationPolicy::default());
    let report = reopened.dedup().verify(false).unwrap();
    assert_eq!(report.dangling_references.len(), 1);

    reopened.delete(&a.id).unwrap();
    assert!(matches!(
        reopened.get(&a.id).unwrap_err(),
        AttachError::AttachmentNotFound { .. }
    ));
    assert!(reopened.dedup().reference(&a.id).unwrap().is_none());
    assert!(
        !dir.path()
            .join("dedup/index/references")
            .join(format!("{}.json", a.id))
            .exists()
    );
}
