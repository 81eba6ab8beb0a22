//! Migration of a legacy attachment tree into the dedup store.

mod common;

use common::{open_manager, payload, stored_object_count, test_log, test_manager, upload, write_legacy};
use tracker_attachments::util::CancelToken;
use tracker_attachments::{DeduplicationPolicy, MigrationOptions};

#[test]
fn five_copies_collapse_to_one_object() {
    let _log = test_log("five_copies_collapse_to_one_object");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let tree = dir.path().join("legacy");
    let shared = payload(9, 3000);

    let copies: Vec<_> = (1..=5)
        .map(|n| write_legacy(&tree, &format!("bd-{n}"), &format!("att-{n}"), "logo.png", &shared))
        .collect();
    let unique = write_legacy(&tree, "bd-9", "att-9", "other.png", &payload(200, 3000));

    let scan = manager.dedup().scan(&tree, false).unwrap();
    assert_eq!(scan.files_scanned, 6);
    assert_eq!(scan.groups.len(), 1);
    assert_eq!(scan.groups[0].files.len(), 5);
    assert_eq!(scan.groups[0].reclaimable(), 4 * 3000);
    assert_eq!(manager.dedup().find_potential_duplicates(&tree).unwrap(), scan.groups);

    let report = manager.migrate(&tree, &MigrationOptions::default()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.groups_found, 1);
    assert_eq!(report.files_migrated, 1);
    assert_eq!(report.duplicates_removed, 4);
    assert_eq!(report.space_reclaimed, 4 * 3000);
    assert_eq!(report.relocated.len(), 5);

    for copy in &copies {
        assert!(!copy.exists(), "{} should be gone", copy.display());
    }
    assert!(unique.exists());
    assert_eq!(stored_object_count(dir.path()), 1);

    let stats = manager.dedup().stats().unwrap();
    assert_eq!(stats.unique_files, 1);
    assert_eq!(stats.total_references, 5);
    assert_eq!(stats.space_saved, 4 * 3000);

    let refs = manager.dedup().references_for(&scan.groups[0].hash).unwrap();
    assert_eq!(refs.len(), 5);
    assert!(refs.iter().any(|r| r.attachment_id == "att-3" && r.issue_id == "bd-3"));
    assert!(manager.dedup().verify(true).unwrap().is_healthy());
}

#[test]
fn second_run_finds_nothing_to_do() {
    let _log = test_log("second_run_finds_nothing_to_do");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let tree = dir.path().join("legacy");
    for n in 1..=3 {
        write_legacy(&tree, "bd-1", &format!("att-{n}"), "a.txt", &payload(4, 2000));
    }

    let first = manager.migrate(&tree, &MigrationOptions::default()).unwrap();
    assert_eq!(first.duplicates_removed, 2);

    let second = manager.migrate(&tree, &MigrationOptions::default()).unwrap();
    assert_eq!(second.groups_found, 0);
    assert_eq!(second.duplicates_removed, 0);
    assert_eq!(second.space_reclaimed, 0);
    assert_eq!(manager.dedup().stats().unwrap().total_references, 3);
}

#[test]
fn dry_run_reports_without_touching_files() {
    let _log = test_log("dry_run_reports_without_touching_files");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let tree = dir.path().join("legacy");
    let a = write_legacy(&tree, "bd-1", "att-1", "a.bin", &payload(2, 5000));
    let b = write_legacy(&tree, "bd-2", "att-2", "a.bin", &payload(2, 5000));

    let options = MigrationOptions {
        dry_run: true,
        ..MigrationOptions::default()
    };
    let report = manager.migrate(&tree, &options).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.space_reclaimed, 5000);
    assert!(a.exists() && b.exists());
    assert_eq!(stored_object_count(dir.path()), 0);
    assert!(manager.dedup().entries().unwrap().is_empty());
}

#[test]
fn traditional_uploads_are_relocated_and_records_follow() {
    let _log = test_log("traditional_uploads_are_relocated_and_records_follow");
    let (manager, dir) = test_manager(DeduplicationPolicy {
        enabled: false,
        ..DeduplicationPolicy::default()
    });
    let body = payload(8, 4000);
    let a = upload(&manager, "bd-1", "dump.bin", &body);
    let b = upload(&manager, "bd-2", "dump.bin", &body);
    assert!(!a.deduplicated && !b.deduplicated);
    drop(manager);

    let manager = open_manager(dir.path(), DeduplicationPolicy::default());
    let report = manager
        .migrate(&manager.attachments_dir(), &MigrationOptions::default())
        .unwrap();
    assert_eq!(report.duplicates_removed, 1);

    for id in [&a.id, &b.id] {
        let record = manager.get(id).unwrap();
        assert!(record.deduplicated);
        assert_eq!(manager.read(id).unwrap(), body);
    }

    manager.delete(&a.id).unwrap();
    manager.delete(&b.id).unwrap();
    assert_eq!(stored_object_count(dir.path()), 0);
}

#[test]
fn cancelled_before_start_migrates_nothing() {
    let _log = test_log("cancelled_before_start_migrates_nothing");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let tree = dir.path().join("legacy");
    write_legacy(&tree, "bd-1", "att-1", "x", &payload(6, 2048));
    write_legacy(&tree, "bd-1", "att-2", "x", &payload(6, 2048));

    let cancel = CancelToken::new();
    cancel.cancel();
    let options = MigrationOptions {
        cancel: Some(cancel),
        ..MigrationOptions::default()
    };
    let report = manager.migrate(&tree, &options).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.files_migrated, 0);
    assert_eq!(stored_object_count(dir.path()), 0);
}

#[test]
fn roundabout_root_never_touches_stored_objects() {
    let _log = test_log("roundabout_root_never_touches_stored_objects");
    let (manager, dir) = test_manager(DeduplicationPolicy::default());
    let body = payload(12, 2048);
    let live = upload(&manager, "bd-1", "a.bin", &body);
    assert!(live.deduplicated);

    let attachments = manager.attachments_dir();
    let first = write_legacy(&attachments, "bd-2", "old1", "a.bin", &body);
    let second = write_legacy(&attachments, "bd-3", "old2", "a.bin", &body);

    let roundabout = attachments.join("..");
    let report = manager
        .migrate(&roundabout, &MigrationOptions::default())
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.groups_found, 1);
    assert_eq!(report.duplicates_removed, 1);
    assert!(!first.exists() && !second.exists());

    let entry = manager.dedup().get(&live.hash).unwrap().unwrap();
    assert_eq!(entry.ref_count, 3);
    assert!(manager.dedup().store().exists(&live.hash));
    assert_eq!(manager.read(&live.id).unwrap(), body);
    assert_eq!(stored_object_count(dir.path()), 1);
    assert!(manager.dedup().verify(true).unwrap().is_healthy());

    let again = manager
        .migrate(&dir.path().join("attachments").join("..").join("."), &MigrationOptions::default())
        .unwrap();
    assert_eq!(again.groups_found, 0);
    assert!(manager.dedup().store().exists(&live.hash));
}
