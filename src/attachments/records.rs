//! Attachment record storage.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::dedup::cas::is_temp_name;
use crate::error::Result;
use crate::model::Attachment;
use crate::util::{read_json, remove_file_if_exists, validate_path_component, write_json_atomic};

/// Directory under the project base holding one JSON file per attachment.
pub const RECORDS_DIR: &str = "attachment-records";

/// Metadata store for attachment records.
pub trait AttachmentRecords {
    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save(&self, attachment: &Attachment) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn load(&self, id: &str) -> Result<Option<Attachment>>;

    /// Remove a record, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn delete(&self, id: &str) -> Result<bool>;

    /// # Errors
    ///
    /// Returns an error if the records cannot be listed.
    fn list(&self) -> Result<Vec<Attachment>>;

    fn contains(&self, id: &str) -> bool {
        matches!(self.load(id), Ok(Some(_)))
    }
}

/// Records kept as `base/attachment-records/{id}.json`.
#[derive(Debug, Clone)]
pub struct FileAttachmentRecords {
    dir: PathBuf,
}

impl FileAttachmentRecords {
    #[must_use]
    pub fn new(base: &Path) -> Self {
        Self {
            dir: base.join(RECORDS_DIR),
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_path_component("attachment_id", id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl AttachmentRecords for FileAttachmentRecords {
    fn save(&self, attachment: &Attachment) -> Result<()> {
        write_json_atomic(&self.path_for(&attachment.id)?, attachment)
    }

    fn load(&self, id: &str) -> Result<Option<Attachment>> {
        let path = self.path_for(id)?;
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        let existed = path.is_file();
        remove_file_if_exists(&path)?;
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<Attachment>> {
        let listing = match fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut attachments = Vec::new();
        for item in listing {
            let path = item?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if is_temp_name(&name) || !name.ends_with(".json") {
                continue;
            }
            match read_json::<Attachment>(&path) {
                Ok(attachment) => attachments.push(attachment),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable attachment record");
                }
            }
        }
        Ok(attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HashAlgorithm;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(id: &str) -> Attachment {
        Attachment {
            id: id.to_string(),
            issue_id: "bd-1".to_string(),
            filename: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            size: 3,
            hash: "abc".to_string(),
            algorithm: HashAlgorithm::Sha256,
            deduplicated: false,
            storage_path: PathBuf::from("x"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn save_load_delete() {
        let temp = TempDir::new().unwrap();
        let records = FileAttachmentRecords::new(temp.path());
        assert!(records.load("att-1").unwrap().is_none());

        records.save(&record("att-1")).unwrap();
        assert!(records.contains("att-1"));
        assert_eq!(records.list().unwrap().len(), 1);

        assert!(records.delete("att-1").unwrap());
        assert!(!records.delete("att-1").unwrap());
        assert!(records.list().unwrap().is_empty());
    }

    #[test]
    fn records_without_dedup_flag_default_to_traditional() {
        let temp = TempDir::new().unwrap();
        let records = FileAttachmentRecords::new(temp.path());
        let mut json = serde_json::to_value(record("att-2")).unwrap();
        json.as_object_mut().unwrap().remove("deduplicated");
        fs::create_dir_all(temp.path().join(RECORDS_DIR)).unwrap();
        fs::write(
            temp.path().join(RECORDS_DIR).join("att-2.json"),
            json.to_string(),
        )
        .unwrap();

        assert!(!records.load("att-2").unwrap().unwrap().deduplicated);
    }
}
