//! On-disk reference ledger: one JSON document per attachment.
//!
//! Layout: `base/dedup/index/references/{attachment_id}.json`.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::cas::{INDEX_DIR, is_temp_name};
use crate::error::Result;
use crate::model::Reference;
use crate::util::{read_json, remove_file_if_exists, validate_path_component, write_json_atomic};

/// Subdirectory of the index holding references.
pub const REFERENCES_DIR: &str = "references";

/// File-backed store of [`Reference`] records, keyed by attachment.
#[derive(Debug, Clone)]
pub struct ReferenceLedger {
    dir: PathBuf,
}

impl ReferenceLedger {
    #[must_use]
    pub fn new(store_root: &Path) -> Self {
        Self {
            dir: store_root.join(INDEX_DIR).join(REFERENCES_DIR),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// # Errors
    ///
    /// Returns a validation error if the ID is not a single path component.
    pub fn path_for(&self, attachment_id: &str) -> Result<PathBuf> {
        validate_path_component("attachment_id", attachment_id)?;
        Ok(self.dir.join(format!("{attachment_id}.json")))
    }

    /// Read every reference on disk, keyed by attachment ID.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger directory cannot be listed.
    pub fn load_all(&self) -> Result<BTreeMap<String, Reference>> {
        let mut references = BTreeMap::new();
        let listing = match fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(references),
            Err(err) => return Err(err.into()),
        };

        for item in listing {
            let item = item?;
            let path = item.path();
            let name = item.file_name().to_string_lossy().to_string();
            if is_temp_name(&name) || !name.ends_with(".json") {
                continue;
            }
            match read_json::<Reference>(&path) {
                Ok(reference) => {
                    references.insert(reference.attachment_id.clone(), reference);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable reference");
                }
            }
        }

        debug!(count = references.len(), "Loaded reference ledger");
        Ok(references)
    }

    /// # Errors
    ///
    /// Returns an error if the ID is invalid or the write fails.
    pub fn persist(&self, reference: &Reference) -> Result<()> {
        write_json_atomic(&self.path_for(&reference.attachment_id)?, reference)
    }

    /// # Errors
    ///
    /// Returns an error if the ID is invalid or removal fails.
    pub fn remove(&self, attachment_id: &str) -> Result<()> {
        remove_file_if_exists(&self.path_for(attachment_id)?)
    }
}
