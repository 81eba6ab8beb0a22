//! Read-only integrity checks over the store, index and ledger.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::cas::ContentStore;
use crate::error::Result;
use crate::model::{HashEntry, Reference};

/// Entry whose recorded count disagrees with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCountMismatch {
    pub hash: String,
    pub recorded: u64,
    pub actual: u64,
}

/// Findings of [`super::DedupService::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub deep: bool,
    pub entries_checked: usize,
    pub references_checked: usize,
    pub objects_checked: usize,
    pub ref_count_mismatches: Vec<RefCountMismatch>,
    /// Entries whose object is gone.
    pub missing_content: Vec<String>,
    /// Objects with no entry.
    pub orphaned_objects: Vec<String>,
    /// Entries with a zero count.
    pub unreferenced_entries: Vec<String>,
    /// References naming a digest that has no entry.
    pub dangling_references: Vec<String>,
    /// Storage paths claimed by more than one entry.
    pub path_collisions: Vec<PathBuf>,
    /// Objects whose bytes no longer match their digest (deep only).
    pub corrupt_objects: Vec<String>,
    pub temp_files: usize,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.ref_count_mismatches.is_empty()
            && self.missing_content.is_empty()
            && self.orphaned_objects.is_empty()
            && self.unreferenced_entries.is_empty()
            && self.dangling_references.is_empty()
            && self.path_collisions.is_empty()
            && self.corrupt_objects.is_empty()
    }

    #[must_use]
    pub fn problem_count(&self) -> usize {
        self.ref_count_mismatches.len()
            + self.missing_content.len()
            + self.orphaned_objects.len()
            + self.unreferenced_entries.len()
            + self.dangling_references.len()
            + self.path_collisions.len()
            + self.corrupt_objects.len()
    }
}

pub(super) fn check(
    store: &ContentStore,
    hashes: &BTreeMap<String, HashEntry>,
    references: &BTreeMap<String, Reference>,
    deep: bool,
) -> Result<IntegrityReport> {
    let mut report = IntegrityReport {
        deep,
        entries_checked: hashes.len(),
        references_checked: references.len(),
        ..IntegrityReport::default()
    };

    let mut actual_counts: BTreeMap<&str, u64> = BTreeMap::new();
    for reference in references.values() {
        if hashes.contains_key(&reference.file_hash) {
            *actual_counts.entry(reference.file_hash.as_str()).or_default() += 1;
        } else {
            report
                .dangling_references
                .push(reference.attachment_id.clone());
        }
    }

    let mut claimed: BTreeMap<&PathBuf, usize> = BTreeMap::new();
    for (hash, entry) in hashes {
        let actual = actual_counts.get(hash.as_str()).copied().unwrap_or(0);
        if actual != entry.ref_count {
            report.ref_count_mismatches.push(RefCountMismatch {
                hash: hash.clone(),
                recorded: entry.ref_count,
                actual,
            });
        }
        if entry.ref_count == 0 {
            report.unreferenced_entries.push(hash.clone());
        }
        *claimed.entry(&entry.storage_path).or_default() += 1;

        if !store.exists(hash) {
            report.missing_content.push(hash.clone());
            continue;
        }
        if deep {
            match store.verify(hash, entry.algorithm) {
                Ok(true) => debug!(hash = %hash, "Object verified"),
                Ok(false) => report.corrupt_objects.push(hash.clone()),
                Err(err) => {
                    warn!(hash = %hash, error = %err, "Could not re-hash object");
                    report.corrupt_objects.push(hash.clone());
                }
            }
        }
    }

    report.path_collisions = claimed
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(path, _)| path.clone())
        .collect();

    let on_disk: BTreeSet<String> = store.list_objects()?.into_iter().collect();
    report.objects_checked = on_disk.len();
    report.orphaned_objects = on_disk
        .into_iter()
        .filter(|hash| !hashes.contains_key(hash))
        .collect();
    report.temp_files = store.temp_files()?.len();

    info!(
        entries = report.entries_checked,
        references = report.references_checked,
        objects = report.objects_checked,
        problems = report.problem_count(),
        deep,
        "Integrity check complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use crate::dedup::{DedupService, DeduplicationPolicy, hash_reader};
    use crate::model::HashAlgorithm;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn stored(svc: &DedupService, data: &[u8]) -> String {
        let (hash, size) = hash_reader(Cursor::new(data), HashAlgorithm::Sha256).unwrap();
        svc.get_or_create_hash_entry(&hash, size, "f.bin", "application/octet-stream")
            .unwrap();
        svc.store()
            .write(&hash, HashAlgorithm::Sha256, Cursor::new(data))
            .unwrap();
        hash
    }

    #[test]
    fn healthy_store_reports_nothing() {
        let temp = TempDir::new().unwrap();
        let svc = DedupService::new(temp.path(), DeduplicationPolicy::permissive());
        let hash = stored(&svc, b"fine");
        svc.add_reference("att-1", "bd-1", &hash, "f.bin").unwrap();

        let report = svc.verify(true).unwrap();
        assert!(report.is_healthy(), "{report:?}");
        assert_eq!(report.objects_checked, 1);
    }

    #[test]
    fn detects_missing_orphaned_and_corrupt_content() {
        let temp = TempDir::new().unwrap();
        let svc = DedupService::new(temp.path(), DeduplicationPolicy::permissive());
        let missing = stored(&svc, b"will vanish");
        let corrupt = stored(&svc, b"will rot");
        svc.add_reference("att-1", "bd-1", &missing, "f.bin").unwrap();
        svc.add_reference("att-2", "bd-1", &corrupt, "f.bin").unwrap();

        fs::remove_file(svc.store().storage_path(&missing).unwrap()).unwrap();
        fs::write(svc.store().storage_path(&corrupt).unwrap(), b"rotten").unwrap();
        let (orphan, _) = hash_reader(Cursor::new(b"orphan"), HashAlgorithm::Sha256).unwrap();
        svc.store()
            .write(&orphan, HashAlgorithm::Sha256, Cursor::new(b"orphan"))
            .unwrap();

        let shallow = svc.verify(false).unwrap();
        assert_eq!(shallow.missing_content, vec![missing.clone()]);
        assert_eq!(shallow.orphaned_objects, vec![orphan]);
        assert!(shallow.corrupt_objects.is_empty());

        let deep = svc.verify(true).unwrap();
        assert_eq!(deep.corrupt_objects, vec![corrupt]);
        assert!(!deep.is_healthy());
    }

    #[test]
    fn detects_unreferenced_entries() {
        let temp = TempDir::new().unwrap();
        let svc = DedupService::new(temp.path(), DeduplicationPolicy::permissive());
        let hash = stored(&svc, b"in flight");

        let report = svc.verify(false).unwrap();
        assert_eq!(report.unreferenced_entries, vec![hash]);
        assert!(report.ref_count_mismatches.is_empty());
    }
}
