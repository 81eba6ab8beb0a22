//! Structured error output for scripted callers.
//!
//! Each `AttachError` maps to a stable [`ErrorCode`], a category exit code,
//! an optional hint and a JSON context object describing what failed.

use crate::error::AttachError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Stable codes emitted in JSON error output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Not Found (exit code 2) ===
    /// No hash entry for the digest
    HashNotFound,
    /// No reference for the attachment
    ReferenceNotFound,
    /// No attachment record
    AttachmentNotFound,
    /// No `.tracker/` found
    NotInitialized,
    /// `init` without `--force` on an existing project
    AlreadyInitialized,

    // === Consistency (exit code 3) ===
    /// Reference count underflow
    RefCountUnderflow,
    /// Metadata without content
    ContentMissing,
    /// Digest mismatch
    HashMismatch,
    /// Attachment registered twice
    ReferenceConflict,
    /// Partial garbage collection
    GarbageCollectionIncomplete,

    // === Validation (exit code 4) ===
    /// Digest not usable as an address
    InvalidHash,
    /// Bad identifier, filename or policy value
    ValidationFailed,
    /// Operation cancelled between steps
    Cancelled,

    // === Config (exit code 7) ===
    ConfigError,

    // === I/O (exit code 8) ===
    IoError,
    JsonError,
    YamlError,

    // === Internal (exit code 1) ===
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HashNotFound => "HASH_NOT_FOUND",
            Self::ReferenceNotFound => "REFERENCE_NOT_FOUND",
            Self::AttachmentNotFound => "ATTACHMENT_NOT_FOUND",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::RefCountUnderflow => "REF_COUNT_UNDERFLOW",
            Self::ContentMissing => "CONTENT_MISSING",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::ReferenceConflict => "REFERENCE_CONFLICT",
            Self::GarbageCollectionIncomplete => "GC_INCOMPLETE",
            Self::InvalidHash => "INVALID_HASH",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Transient failures a caller may simply retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GarbageCollectionIncomplete
                | Self::Cancelled
                | Self::IoError
                | Self::ValidationFailed
        )
    }

    /// Process exit code: 2 not found, 3 consistency, 4 validation,
    /// 7 config, 8 I/O, 1 anything else.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::HashNotFound
            | Self::ReferenceNotFound
            | Self::AttachmentNotFound
            | Self::NotInitialized
            | Self::AlreadyInitialized => 2,
            Self::RefCountUnderflow
            | Self::ContentMissing
            | Self::HashMismatch
            | Self::ReferenceConflict
            | Self::GarbageCollectionIncomplete => 3,
            Self::InvalidHash | Self::ValidationFailed | Self::Cancelled => 4,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }
}

/// An error as reported to the terminal or to scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    #[must_use]
    pub fn from_error(err: &AttachError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);
        let hint = err.suggestion().map(str::to_string);

        Self {
            code,
            message: err.to_string(),
            hint,
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Not-found error for an attachment, suggesting close matches.
    #[must_use]
    pub fn attachment_not_found(searched_id: &str, existing_ids: &[String]) -> Self {
        let similar = find_similar_ids(searched_id, existing_ids, 3);

        let hint = match similar.as_slice() {
            [] => "Run 'ta list' to see attachments.".to_string(),
            [only] => format!("Did you mean '{only}'?"),
            many => format!("Did you mean one of: {}?", many.join(", ")),
        };

        Self {
            code: ErrorCode::AttachmentNotFound,
            message: format!("Attachment not found: {searched_id}"),
            hint: Some(hint),
            retryable: false,
            context: Some(json!({
                "searched_id": searched_id,
                "similar_ids": similar,
            })),
        }
    }

    /// `{"error": {...}}` envelope printed by the CLI.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// `Error: ...` plus an optional `Hint: ...` line, ANSI-colored on request.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let (error_label, hint_label) = if color {
            ("\x1b[31mError:\x1b[0m", "\x1b[33mHint:\x1b[0m")
        } else {
            ("Error:", "Hint:")
        };
        match &self.hint {
            Some(hint) => format!("{error_label} {}\n{hint_label} {hint}", self.message),
            None => format!("{error_label} {}", self.message),
        }
    }

    fn extract_code_and_context(err: &AttachError) -> (ErrorCode, Option<Value>) {
        match err {
            AttachError::HashNotFound { hash } => {
                (ErrorCode::HashNotFound, Some(json!({"hash": hash})))
            }
            AttachError::ReferenceNotFound {
                attachment_id,
                hash,
            } => (
                ErrorCode::ReferenceNotFound,
                Some(json!({"attachment_id": attachment_id, "hash": hash})),
            ),
            AttachError::AttachmentNotFound { id } => (
                ErrorCode::AttachmentNotFound,
                Some(json!({"searched_id": id})),
            ),
            AttachError::NotInitialized => (ErrorCode::NotInitialized, None),
            AttachError::AlreadyInitialized { path } => (
                ErrorCode::AlreadyInitialized,
                Some(json!({"path": path.display().to_string()})),
            ),
            AttachError::RefCountUnderflow { hash } => {
                (ErrorCode::RefCountUnderflow, Some(json!({"hash": hash})))
            }
            AttachError::ContentMissing { hash, path } => (
                ErrorCode::ContentMissing,
                Some(json!({"hash": hash, "path": path.display().to_string()})),
            ),
            AttachError::HashMismatch { expected, actual } => (
                ErrorCode::HashMismatch,
                Some(json!({"expected": expected, "actual": actual})),
            ),
            AttachError::ReferenceConflict {
                attachment_id,
                existing,
                requested,
            } => (
                ErrorCode::ReferenceConflict,
                Some(json!({
                    "attachment_id": attachment_id,
                    "existing": existing,
                    "requested": requested,
                })),
            ),
            AttachError::GarbageCollection { hash, reason } => (
                ErrorCode::GarbageCollectionIncomplete,
                Some(json!({"hash": hash, "reason": reason})),
            ),
            AttachError::InvalidHash { hash } => {
                (ErrorCode::InvalidHash, Some(json!({"hash": hash})))
            }
            AttachError::Validation { field, reason } => (
                ErrorCode::ValidationFailed,
                Some(json!({"field": field, "reason": reason})),
            ),
            AttachError::Cancelled { stage } => {
                (ErrorCode::Cancelled, Some(json!({"stage": stage})))
            }
            AttachError::Config(_) => (ErrorCode::ConfigError, None),
            AttachError::Io(_) => (ErrorCode::IoError, None),
            AttachError::Json(_) => (ErrorCode::JsonError, None),
            AttachError::Yaml(_) => (ErrorCode::YamlError, None),
            AttachError::WithContext { context, source } => {
                let code = if source.is::<std::io::Error>() {
                    ErrorCode::IoError
                } else {
                    ErrorCode::InternalError
                };
                (code, Some(json!({"context": context})))
            }
            AttachError::Other(_) => (ErrorCode::InternalError, None),
        }
    }
}

/// Edit distance between two IDs, counted in chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Known IDs within edit distance 3 of `searched`, closest first.
#[must_use]
pub fn find_similar_ids(
    searched: &str,
    existing: &[String],
    max_suggestions: usize,
) -> Vec<String> {
    let mut near: Vec<(usize, &String)> = existing
        .iter()
        .filter_map(|id| {
            let distance = edit_distance(searched, id);
            (distance <= 3).then_some((distance, id))
        })
        .collect();
    near.sort();
    near.into_iter()
        .take(max_suggestions)
        .map(|(_, id)| id.clone())
        .collect()
}
