//! Shared utilities for `tracker_attachments`.
//!
//! - Atomic JSON metadata writes (temp file -> fsync -> rename)
//! - Path component validation for IDs used as filenames
//! - ID generation (base36)
//! - Progress indicators (for long-running operations)
//! - Cooperative cancellation

pub mod cancel;
pub mod id;
pub mod progress;

pub use cancel::CancelToken;
pub use id::{ATTACHMENT_PREFIX, generate_attachment_id};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use crate::dedup::cas::temp_path_for;
use crate::error::{AttachError, Result};

/// Write `value` as pretty JSON to `path` atomically.
///
/// The parent directory is created if missing. A crash leaves either the
/// old file or the new one, never a truncated mix.
///
/// # Errors
///
/// Returns an error if serialization or any filesystem step fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        AttachError::Config(format!("Invalid metadata path: {}", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let temp_path = temp_path_for(path);
    let outcome = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer
            .into_inner()
            .map_err(|e| AttachError::Io(e.into_error()))?
            .sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if outcome.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    outcome
}

/// Read a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Remove a file, treating "already absent" as success.
///
/// # Errors
///
/// Returns any I/O error other than not-found.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Ensure an identifier can be used as a single path component.
///
/// # Errors
///
/// Returns a validation error for empty values, `.`/`..`, separators or NUL.
pub fn validate_path_component(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AttachError::validation(field, "cannot be empty"));
    }
    if value == "." || value == ".." {
        return Err(AttachError::validation(field, "cannot be '.' or '..'"));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(AttachError::validation(
            field,
            "cannot contain path separators or NUL",
        ));
    }
    Ok(())
}
