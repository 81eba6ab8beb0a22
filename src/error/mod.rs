//! Error types and handling for `tracker_attachments`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration through `Other`
//! - Groups variants by failure class: not-found, I/O, consistency
//! - Provides recovery hints for user-facing errors
//! - Provides structured JSON output for scripted callers
//!
//! A dedup policy rejection is deliberately absent here: an ineligible
//! upload is routed to traditional storage, it never fails.

mod context;
mod structured;

pub use context::{OptionExt, ResultExt};
pub use structured::{ErrorCode, StructuredError, find_similar_ids};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for attachment and dedup store operations.
#[derive(Error, Debug)]
pub enum AttachError {
    // === Not Found ===
    /// No hash entry exists for the digest.
    #[error("Hash entry not found: {hash}")]
    HashNotFound { hash: String },

    /// No reference from the attachment to the digest.
    #[error("Reference not found: attachment {attachment_id} -> {hash}")]
    ReferenceNotFound { attachment_id: String, hash: String },

    /// Attachment record does not exist.
    #[error("Attachment not found: {id}")]
    AttachmentNotFound { id: String },

    /// Project directory not initialized.
    #[error("Tracker not initialized: run 'ta init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === Consistency Violations ===
    /// Removing a reference would drive the count below zero.
    #[error("Reference count for {hash} would go negative")]
    RefCountUnderflow { hash: String },

    /// Metadata exists but the stored bytes are gone.
    #[error("Content missing for {hash} at '{path}'")]
    ContentMissing { hash: String, path: PathBuf },

    /// Stored or incoming bytes do not hash to the expected digest.
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// The attachment is already registered against another digest.
    #[error("Attachment {attachment_id} already references {existing}, refusing {requested}")]
    ReferenceConflict {
        attachment_id: String,
        existing: String,
        requested: String,
    },

    /// Garbage collection removed only part of an object.
    #[error("Garbage collection incomplete for {hash}: {reason}")]
    GarbageCollection { hash: String, reason: String },

    // === Validation ===
    /// Digest is not usable as a content address.
    #[error("Invalid content hash: '{hash}'")]
    InvalidHash { hash: String },

    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Operation stopped at a step boundary.
    #[error("Operation cancelled before {stage}")]
    Cancelled { stage: String },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error with additional context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AttachError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::AttachmentNotFound { .. }
                | Self::InvalidHash { .. }
                | Self::Validation { .. }
                | Self::Config(_)
        )
    }

    /// True for errors signalling that store state disagrees with itself.
    #[must_use]
    pub const fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            Self::RefCountUnderflow { .. }
                | Self::ContentMissing { .. }
                | Self::HashMismatch { .. }
                | Self::ReferenceConflict { .. }
                | Self::GarbageCollection { .. }
        )
    }

    /// True when the referenced hash, reference or record is missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::HashNotFound { .. }
                | Self::ReferenceNotFound { .. }
                | Self::AttachmentNotFound { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: ta init"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::AttachmentNotFound { .. } => Some("Run 'ta list' to see attachments"),
            Self::ContentMissing { .. }
            | Self::HashMismatch { .. }
            | Self::RefCountUnderflow { .. } => Some("Run: ta dedup verify --deep"),
            Self::GarbageCollection { .. } => {
                Some("Retry the delete, or run 'ta dedup verify' to find leftovers")
            }
            Self::InvalidHash { .. } => Some("Content hashes are lowercase hex digests"),
            _ => None,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a cancellation error naming the step that was not started.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }
}

/// Result type using `AttachError`.
pub type Result<T> = std::result::Result<T, AttachError>;
