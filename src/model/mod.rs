//! Core data types for `tracker_attachments`.
//!
//! - `HashAlgorithm` - Supported content digests
//! - `HashEntry` - One stored, deduplicated object
//! - `Reference` - One attachment's claim on a stored object
//! - `Attachment` - Attachment record kept by the metadata store
//! - `DuplicateGroup` - Legacy files sharing a digest (migration only)
//! - `DedupStats` - Store-wide accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Digest used to address stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Length of the lowercase hex digest.
    #[must_use]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = crate::error::AttachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            other => Err(crate::error::AttachError::validation(
                "hash_algorithm",
                format!("unsupported algorithm '{other}' (use sha256, sha1 or md5)"),
            )),
        }
    }
}

/// Metadata for one deduplicated object, keyed by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub size: u64,
    pub original_filename: String,
    pub content_type: String,
    pub storage_path: PathBuf,
    pub ref_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl HashEntry {
    /// Bytes saved by sharing this object instead of storing one copy per reference.
    #[must_use]
    pub const fn space_saved(&self) -> u64 {
        self.size.saturating_mul(self.ref_count.saturating_sub(1))
    }
}

/// An attachment's claim on a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub attachment_id: String,
    pub issue_id: String,
    pub file_hash: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// Attachment record owned by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub issue_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub hash: String,
    pub algorithm: HashAlgorithm,
    #[serde(default)]
    pub deduplicated: bool,
    pub storage_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// One legacy file that belongs to a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateFile {
    pub path: PathBuf,
    pub issue_id: String,
    pub attachment_id: String,
    pub filename: String,
}

/// Legacy files sharing a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub size: u64,
    pub files: Vec<DuplicateFile>,
}

impl DuplicateGroup {
    /// Bytes freed by keeping a single copy of the group.
    #[must_use]
    pub fn reclaimable(&self) -> u64 {
        let extra = u64::try_from(self.files.len().saturating_sub(1)).unwrap_or(u64::MAX);
        self.size.saturating_mul(extra)
    }
}

/// A heavily shared object, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    pub hash: String,
    pub filename: String,
    pub size: u64,
    pub ref_count: u64,
    pub space_saved: u64,
}

/// Store-wide accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DedupStats {
    pub unique_files: usize,
    pub total_references: u64,
    pub unique_size: u64,
    pub total_size_without_dedup: u64,
    pub space_saved: u64,
    /// Logical bytes divided by physical bytes; 0 for an empty store.
    pub deduplication_ratio: f64,
    pub top_duplicates: Vec<DuplicateSummary>,
}
