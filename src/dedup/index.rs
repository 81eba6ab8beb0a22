//! On-disk hash index: one JSON document per stored object.
//!
//! Layout: `base/dedup/index/hashes/{hash}.json`. The in-memory view lives
//! in [`super::DedupService`]; this module only reads and writes files.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::cas::{INDEX_DIR, is_temp_name, validate_hash};
use crate::error::Result;
use crate::model::HashEntry;
use crate::util::{read_json, remove_file_if_exists, write_json_atomic};

/// Subdirectory of the index holding hash entries.
pub const HASHES_DIR: &str = "hashes";

/// File-backed store of [`HashEntry`] records.
#[derive(Debug, Clone)]
pub struct HashIndex {
    dir: PathBuf,
}

impl HashIndex {
    /// Index stored under `store_root/index/hashes`.
    #[must_use]
    pub fn new(store_root: &Path) -> Self {
        Self {
            dir: store_root.join(INDEX_DIR).join(HASHES_DIR),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Metadata path for a digest.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHash` if the digest is not lowercase hex.
    pub fn path_for(&self, hash: &str) -> Result<PathBuf> {
        validate_hash(hash)?;
        Ok(self.dir.join(format!("{hash}.json")))
    }

    /// Read every entry on disk.
    ///
    /// Unreadable or corrupt files are skipped with a warning, as are files
    /// whose name disagrees with the digest they contain.
    ///
    /// # Errors
    ///
    /// Returns an error only if the index directory itself cannot be listed.
    pub fn load_all(&self) -> Result<BTreeMap<String, HashEntry>> {
        let mut entries = BTreeMap::new();
        let listing = match fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err.into()),
        };

        for item in listing {
            let item = item?;
            let path = item.path();
            let name = item.file_name().to_string_lossy().to_string();
            if is_temp_name(&name) {
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };

            match read_json::<HashEntry>(&path) {
                Ok(entry) if entry.hash == stem => {
                    entries.insert(entry.hash.clone(), entry);
                }
                Ok(entry) => {
                    warn!(
                        path = %path.display(),
                        hash = %entry.hash,
                        "Skipping hash entry stored under the wrong name"
                    );
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable hash entry");
                }
            }
        }

        debug!(count = entries.len(), dir = %self.dir.display(), "Loaded hash index");
        Ok(entries)
    }

    /// Write (or overwrite) one entry atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the digest is invalid or the write fails.
    pub fn persist(&self, entry: &HashEntry) -> Result<()> {
        let path = self.path_for(&entry.hash)?;
        write_json_atomic(&path, entry)
    }

    /// Delete one entry; absent counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error if the digest is invalid or removal fails.
    pub fn remove(&self, hash: &str) -> Result<()> {
        remove_file_if_exists(&self.path_for(hash)?)
    }
}
