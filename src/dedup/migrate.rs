//! One-shot migration of a legacy attachment tree into the dedup store.
//!
//! Legacy files live at `<root>/<issue_id>/<attachment_id>_<filename>`.
//! The scan hashes every regular file, groups identical content, and the
//! migration moves one copy of each group into the store, registers a
//! reference for every file and removes the redundant copies.
//!
//! Re-running over an already migrated tree finds nothing to do.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::DedupService;
use super::cas::{DEDUP_DIR, hash_file, is_temp_name, resolve_path};
use crate::error::Result;
use crate::model::{DuplicateFile, DuplicateGroup, HashAlgorithm};
use crate::util::CancelToken;
use crate::util::progress::ProgressTracker;

/// Issue assigned to files sitting directly under the scanned root.
pub const UNKNOWN_ISSUE: &str = "unknown";

/// Directories under the project base never treated as legacy content.
const SKIPPED_DIRS: &[&str] = &[DEDUP_DIR, "attachment-records", "tmp"];

/// Knobs for [`DedupService::migrate`].
#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    /// Report what would happen without touching the disk.
    pub dry_run: bool,
    pub show_progress: bool,
    pub cancel: Option<CancelToken>,
}

/// A per-file or per-group failure that did not stop the migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationIssue {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub message: String,
}

/// An attachment whose bytes now live in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocatedAttachment {
    pub attachment_id: String,
    pub issue_id: String,
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub storage_path: PathBuf,
    pub legacy_path: PathBuf,
}

/// Result of scanning a legacy tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub files_scanned: usize,
    /// Only groups with two or more members, ordered by digest.
    pub groups: Vec<DuplicateGroup>,
    pub errors: Vec<MigrationIssue>,
}

/// Counts produced by a migration run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub cancelled: bool,
    pub files_scanned: usize,
    pub groups_found: usize,
    /// Groups whose content is now held by the store.
    pub files_migrated: usize,
    /// Non-master copies deleted.
    pub duplicates_removed: usize,
    pub space_reclaimed: u64,
    pub relocated: Vec<RelocatedAttachment>,
    pub errors: Vec<MigrationIssue>,
}

impl MigrationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// Derive `(issue_id, attachment_id, filename)` from a legacy path.
///
/// `<root>/<issue>/<id>_<name>` yields all three parts. A name without an
/// underscore becomes `<issue>-<name>` for the ID. Files directly under
/// `root` belong to [`UNKNOWN_ISSUE`].
#[must_use]
pub fn parse_legacy_path(root: &Path, path: &Path) -> (String, String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let issue_id = match path.parent() {
        Some(parent) if parent != root => parent
            .file_name()
            .map_or_else(|| UNKNOWN_ISSUE.to_string(), |n| n.to_string_lossy().to_string()),
        _ => UNKNOWN_ISSUE.to_string(),
    };

    match name.split_once('_') {
        Some((id, filename)) if !id.is_empty() && !filename.is_empty() => {
            (issue_id, id.to_string(), filename.to_string())
        }
        _ => {
            let attachment_id = format!("{issue_id}-{name}");
            (issue_id, attachment_id, name)
        }
    }
}

fn is_skipped_dir(skipped: &[PathBuf], path: &Path) -> bool {
    skipped.iter().any(|dir| path.starts_with(dir))
}

/// Walk `root` in sorted order and group files by content digest.
///
/// Both `base` and `root` are resolved first, so the skipped directories
/// under `base` stay out of the walk however the root is spelled. Reported
/// paths are the resolved ones.
///
/// # Errors
///
/// Returns an error only if `root` itself cannot be read.
pub fn scan_tree(
    base: &Path,
    root: &Path,
    algorithm: HashAlgorithm,
    show_progress: bool,
) -> Result<ScanOutcome> {
    let root = fs::canonicalize(root)?;
    let root = root.as_path();
    let skipped: Vec<PathBuf> = SKIPPED_DIRS
        .iter()
        .map(|dir| resolve_path(&base.join(dir)))
        .collect();

    let progress = if show_progress {
        ProgressTracker::spinner("Scanning attachments")
    } else {
        ProgressTracker::hidden()
    };

    let mut outcome = ScanOutcome::default();
    let mut by_hash: BTreeMap<String, (u64, Vec<DuplicateFile>)> = BTreeMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && is_skipped_dir(&skipped, entry.path())));

    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                warn!(path = %path.display(), error = %err, "Skipping unreadable path");
                outcome.errors.push(MigrationIssue {
                    path,
                    hash: None,
                    message: err.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() || is_temp_name(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let path = entry.path();
        match hash_file(path, algorithm) {
            Ok((hash, size)) => {
                outcome.files_scanned += 1;
                progress.inc(1);
                let (issue_id, attachment_id, filename) = parse_legacy_path(root, path);
                debug!(path = %path.display(), hash = %hash, size, "Hashed legacy file");
                by_hash.entry(hash).or_insert((size, Vec::new())).1.push(DuplicateFile {
                    path: path.to_path_buf(),
                    issue_id,
                    attachment_id,
                    filename,
                });
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Could not hash file");
                outcome.errors.push(MigrationIssue {
                    path: path.to_path_buf(),
                    hash: None,
                    message: err.to_string(),
                });
            }
        }
    }

    outcome.groups = by_hash
        .into_iter()
        .filter(|(_, (_, files))| files.len() > 1)
        .map(|(hash, (size, mut files))| {
            files.sort_by(|a, b| a.path.cmp(&b.path));
            DuplicateGroup { hash, size, files }
        })
        .collect();

    progress.finish(&format!(
        "Scanned {} files, {} duplicate groups",
        outcome.files_scanned,
        outcome.groups.len()
    ));
    info!(
        files = outcome.files_scanned,
        groups = outcome.groups.len(),
        errors = outcome.errors.len(),
        root = %root.display(),
        "Scan complete"
    );
    Ok(outcome)
}

/// Content type guessed from a filename.
#[must_use]
pub fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub(super) fn run(
    service: &DedupService,
    root: &Path,
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    let algorithm = service.policy().hash_algorithm;
    let scan = scan_tree(service.base(), root, algorithm, options.show_progress)?;

    let mut report = MigrationReport {
        dry_run: options.dry_run,
        files_scanned: scan.files_scanned,
        groups_found: scan.groups.len(),
        errors: scan.errors,
        ..MigrationReport::default()
    };

    if options.dry_run {
        for group in &scan.groups {
            report.files_migrated += 1;
            report.duplicates_removed += group.files.len() - 1;
            report.space_reclaimed += group.reclaimable();
        }
        info!(
            groups = report.groups_found,
            reclaimable = report.space_reclaimed,
            "Dry run complete"
        );
        return Ok(report);
    }

    let progress = if options.show_progress {
        ProgressTracker::new(scan.groups.len() as u64, "Migrating duplicates")
    } else {
        ProgressTracker::hidden()
    };

    for group in &scan.groups {
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            warn!(remaining = report.groups_found - report.files_migrated, "Migration cancelled");
            report.cancelled = true;
            break;
        }
        if let Some(master) = group.files.first() {
            progress.set_message(&master.filename);
        }
        migrate_group(service, algorithm, group, &mut report);
        progress.inc(1);
    }

    progress.finish(&format!(
        "Migrated {} groups, removed {} duplicates",
        report.files_migrated, report.duplicates_removed
    ));
    info!(
        groups = report.groups_found,
        migrated = report.files_migrated,
        removed = report.duplicates_removed,
        reclaimed = report.space_reclaimed,
        errors = report.errors.len(),
        "Migration complete"
    );
    Ok(report)
}

fn issue(path: &Path, hash: &str, message: impl Into<String>) -> MigrationIssue {
    MigrationIssue {
        path: path.to_path_buf(),
        hash: Some(hash.to_string()),
        message: message.into(),
    }
}

fn migrate_group(
    service: &DedupService,
    algorithm: HashAlgorithm,
    group: &DuplicateGroup,
    report: &mut MigrationReport,
) {
    let Some(master) = group.files.first() else {
        return;
    };
    let hash = group.hash.as_str();
    let store = service.store();

    if let Some(inside) = group.files.iter().find(|file| store.holds_path(&file.path)) {
        warn!(hash, path = %inside.path.display(), "Refusing to migrate a file inside the store");
        report
            .errors
            .push(issue(&inside.path, hash, "path is inside the content store"));
        return;
    }

    let (entry, master_moved) = match service.get_or_create_entry(
        hash,
        algorithm,
        group.size,
        &master.filename,
        &guess_content_type(&master.filename),
    ) {
        Ok((entry, is_new)) if is_new || !store.exists(hash) => {
            if let Err(err) = store.import_file(hash, algorithm, &master.path) {
                warn!(hash, path = %master.path.display(), error = %err, "Could not move master into store");
                report.errors.push(issue(&master.path, hash, err.to_string()));
                if let Err(err) = service.discard_if_unreferenced(hash) {
                    warn!(hash, error = %err, "Could not discard unused entry");
                }
                return;
            }
            (entry, true)
        }
        Ok((entry, _)) => (entry, false),
        Err(err) => {
            report.errors.push(issue(&master.path, hash, err.to_string()));
            return;
        }
    };
    report.files_migrated += 1;

    for (position, file) in group.files.iter().enumerate() {
        let is_master = position == 0;
        if let Err(err) =
            service.add_reference(&file.attachment_id, &file.issue_id, hash, &file.filename)
        {
            warn!(hash, path = %file.path.display(), error = %err, "Could not register reference");
            report.errors.push(issue(&file.path, hash, err.to_string()));
            if is_master && master_moved {
                restore_master(service, hash, &entry.storage_path, &master.path, report);
            }
            continue;
        }

        report.relocated.push(RelocatedAttachment {
            attachment_id: file.attachment_id.clone(),
            issue_id: file.issue_id.clone(),
            hash: hash.to_string(),
            algorithm: entry.algorithm,
            storage_path: entry.storage_path.clone(),
            legacy_path: file.path.clone(),
        });

        if is_master && master_moved {
            continue;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => {
                debug!(path = %file.path.display(), hash, "Removed redundant copy");
                if !is_master {
                    report.duplicates_removed += 1;
                    report.space_reclaimed += group.size;
                }
            }
            Err(err) => {
                warn!(path = %file.path.display(), error = %err, "Could not remove redundant copy");
                report.errors.push(issue(&file.path, hash, err.to_string()));
            }
        }
    }
}

/// Put a moved master back when its own reference could not be registered,
/// so the legacy attachment keeps its bytes.
fn restore_master(
    service: &DedupService,
    hash: &str,
    stored: &Path,
    legacy: &Path,
    report: &mut MigrationReport,
) {
    if let Err(err) = fs::copy(stored, legacy) {
        warn!(hash, path = %legacy.display(), error = %err, "Could not restore master copy");
        report
            .errors
            .push(issue(legacy, hash, format!("restore failed: {err}")));
        return;
    }
    if let Err(err) = service.discard_if_unreferenced(hash) {
        warn!(hash, error = %err, "Could not discard unused entry");
    }
}
