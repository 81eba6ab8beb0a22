#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Instant;
use tempfile::TempDir;
use tracing::info;
use tracker_attachments::{
    AttachmentManager, Attachment, CancelToken, DedupService, DeduplicationPolicy,
};

pub mod cli;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracker_attachments::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

/// A project directory in a temp dir, opened with `policy`.
pub fn test_manager(policy: DeduplicationPolicy) -> (AttachmentManager, TempDir) {
    init_test_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let manager = open_manager(dir.path(), policy);
    (manager, dir)
}

/// Reopen a manager over an existing base directory.
pub fn open_manager(base: &Path, policy: DeduplicationPolicy) -> AttachmentManager {
    AttachmentManager::open(base, DedupService::new(base, policy))
}

pub fn upload(manager: &AttachmentManager, issue: &str, name: &str, body: &[u8]) -> Attachment {
    manager
        .upload(
            issue,
            name,
            "application/octet-stream",
            Cursor::new(body.to_vec()),
            &CancelToken::new(),
        )
        .expect("upload")
}

/// Write `body` at `root/issue/{id}_{name}`, the legacy attachment layout.
pub fn write_legacy(root: &Path, issue: &str, id: &str, name: &str, body: &[u8]) -> PathBuf {
    let dir = root.join(issue);
    fs::create_dir_all(&dir).expect("legacy dir");
    let path = dir.join(format!("{id}_{name}"));
    fs::write(&path, body).expect("legacy file");
    path
}

/// Deterministic content of `len` bytes seeded by `seed`.
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add(u8::try_from(i % 251).unwrap_or(0)))
        .collect()
}

/// Number of regular files under `dir/dedup`, excluding the index.
pub fn stored_object_count(base: &Path) -> usize {
    let root = base.join("dedup");
    if !root.exists() {
        return 0;
    }
    walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.path().starts_with(root.join("index")))
        .count()
}
