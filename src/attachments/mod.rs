//! Attachment upload and removal on top of the dedup store.
//!
//! [`AttachmentManager`] stages each upload under `base/tmp/` while hashing
//! it, asks the policy where it belongs and then either shares the bytes
//! through [`DedupService`] or keeps a private copy under
//! `base/attachments/{issue_id}/{attachment_id}_{filename}`.
//!
//! A failed upload leaves no record, no reference and no orphaned object.

mod records;

pub use records::{AttachmentRecords, FileAttachmentRecords, RECORDS_DIR};

use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::dedup::cas::temp_path_for;
use crate::dedup::{DedupService, MigrationOptions, MigrationReport, hash_copy};
use crate::error::{AttachError, OptionExt, Result};
use crate::model::{Attachment, HashAlgorithm};
use crate::util::{CancelToken, generate_attachment_id, remove_file_if_exists, validate_path_component};

/// Traditional (non-deduplicated) attachment tree under the project base.
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Upload staging area under the project base.
pub const STAGING_DIR: &str = "tmp";

/// A staged upload: bytes on disk plus their digest.
struct Staged {
    path: PathBuf,
    hash: String,
    size: u64,
    algorithm: HashAlgorithm,
}

/// Attachment lifecycle for one project directory.
pub struct AttachmentManager<R: AttachmentRecords = FileAttachmentRecords> {
    base: PathBuf,
    dedup: DedupService,
    records: R,
}

impl AttachmentManager<FileAttachmentRecords> {
    /// Manager backed by JSON records under `base/attachment-records`.
    #[must_use]
    pub fn open(base: &Path, dedup: DedupService) -> Self {
        Self::with_records(base, dedup, FileAttachmentRecords::new(base))
    }
}

impl<R: AttachmentRecords> AttachmentManager<R> {
    #[must_use]
    pub fn with_records(base: &Path, dedup: DedupService, records: R) -> Self {
        Self {
            base: base.to_path_buf(),
            dedup,
            records,
        }
    }

    #[must_use]
    pub const fn dedup(&self) -> &DedupService {
        &self.dedup
    }

    #[must_use]
    pub const fn records(&self) -> &R {
        &self.records
    }

    /// Root of the traditional attachment tree.
    #[must_use]
    pub fn attachments_dir(&self) -> PathBuf {
        self.base.join(ATTACHMENTS_DIR)
    }

    /// Store `reader` as a new attachment of `issue_id`.
    ///
    /// # Errors
    ///
    /// - `Validation` for an unusable issue ID or filename
    /// - `Cancelled` if `cancel` fires between steps
    /// - I/O or consistency errors from the store; everything written so
    ///   far is cleaned up first
    pub fn upload<Rd: Read>(
        &self,
        issue_id: &str,
        filename: &str,
        content_type: &str,
        reader: Rd,
        cancel: &CancelToken,
    ) -> Result<Attachment> {
        validate_path_component("issue_id", issue_id)?;
        validate_path_component("filename", filename)?;
        cancel.check("staging")?;

        let policy = self.dedup.policy();
        let staged = self.stage(reader, policy.hash_algorithm)?;

        let outcome = cancel.check("storing content").and_then(|()| {
            let created_at = Utc::now();
            let id = generate_attachment_id(issue_id, filename, created_at, |candidate| {
                self.records.contains(candidate)
            });
            let attachment = Attachment {
                id,
                issue_id: issue_id.to_string(),
                filename: filename.to_string(),
                content_type: content_type.to_string(),
                size: staged.size,
                hash: staged.hash.clone(),
                algorithm: staged.algorithm,
                deduplicated: false,
                storage_path: PathBuf::new(),
                created_at,
            };

            if policy.should_deduplicate(staged.size, content_type) {
                self.store_deduplicated(&staged, attachment, cancel)
            } else {
                self.store_traditional(&staged, attachment)
            }
        });

        if let Err(err) = remove_file_if_exists(&staged.path) {
            warn!(path = %staged.path.display(), error = %err, "Could not remove staging file");
        }

        let attachment = outcome?;
        info!(
            id = %attachment.id,
            issue = %attachment.issue_id,
            size = attachment.size,
            deduplicated = attachment.deduplicated,
            "Attachment stored"
        );
        Ok(attachment)
    }

    fn stage<Rd: Read>(&self, reader: Rd, algorithm: HashAlgorithm) -> Result<Staged> {
        let staging_dir = self.base.join(STAGING_DIR);
        fs::create_dir_all(&staging_dir)?;
        let path = temp_path_for(&staging_dir.join("upload"));

        let copied = (|| -> Result<_> {
            let mut writer = BufWriter::new(File::create(&path)?);
            let copied = hash_copy(reader, &mut writer, algorithm)?;
            if let Some(err) = copied.write_error {
                return Err(err.into());
            }
            writer
                .into_inner()
                .map_err(|e| AttachError::Io(e.into_error()))?
                .sync_all()?;
            Ok(copied)
        })();

        match copied {
            Ok(copied) => {
                debug!(path = %path.display(), hash = %copied.digest, size = copied.size, "Staged upload");
                Ok(Staged {
                    path,
                    hash: copied.digest,
                    size: copied.size,
                    algorithm,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&path);
                Err(err)
            }
        }
    }

    fn store_deduplicated(
        &self,
        staged: &Staged,
        mut attachment: Attachment,
        cancel: &CancelToken,
    ) -> Result<Attachment> {
        let entry = self.dedup.ingest(&attachment, &staged.path, cancel)?;

        attachment.deduplicated = true;
        attachment.algorithm = entry.algorithm;
        attachment.storage_path = entry.storage_path;
        if let Err(err) = self.records.save(&attachment) {
            if let Err(undo) = self.dedup.remove_reference(&attachment.id, &staged.hash) {
                warn!(id = %attachment.id, error = %undo, "Could not release reference after record write failed");
            }
            return Err(err);
        }
        Ok(attachment)
    }

    fn store_traditional(&self, staged: &Staged, mut attachment: Attachment) -> Result<Attachment> {
        let dir = self.attachments_dir().join(&attachment.issue_id);
        fs::create_dir_all(&dir)?;
        let dest = dir.join(format!("{}_{}", attachment.id, attachment.filename));

        if let Err(err) = fs::rename(&staged.path, &dest) {
            debug!(error = %err, "Rename from staging failed, copying instead");
            fs::copy(&staged.path, &dest)?;
        }

        attachment.storage_path = dest;
        if let Err(err) = self.records.save(&attachment) {
            if let Err(undo) = remove_file_if_exists(&attachment.storage_path) {
                warn!(path = %attachment.storage_path.display(), error = %undo, "Could not remove file after record write failed");
            }
            return Err(err);
        }
        Ok(attachment)
    }

    /// Remove an attachment and release its bytes.
    ///
    /// The reference is released before the record is deleted. A missing
    /// or dangling reference only warns. If garbage collection is
    /// incomplete the record is still removed and the error returned.
    ///
    /// # Errors
    ///
    /// Returns `AttachmentNotFound` for an unknown ID, or store errors.
    pub fn delete(&self, attachment_id: &str) -> Result<Attachment> {
        let attachment = self.get(attachment_id)?;
        let mut deferred = None;

        if attachment.deduplicated {
            match self.dedup.remove_reference(&attachment.id, &attachment.hash) {
                Ok(()) => {}
                Err(AttachError::ReferenceNotFound { .. }) => {
                    warn!(id = %attachment.id, hash = %attachment.hash, "Attachment had no reference; removing record only");
                }
                Err(AttachError::HashNotFound { .. } | AttachError::RefCountUnderflow { .. }) => {
                    warn!(id = %attachment.id, hash = %attachment.hash, "Reference is dangling; dropping it with the record");
                    match self.dedup.release_dangling_reference(&attachment.id) {
                        Ok(_) => {}
                        Err(err @ AttachError::GarbageCollection { .. }) => deferred = Some(err),
                        Err(err) => return Err(err),
                    }
                }
                Err(err @ AttachError::GarbageCollection { .. }) => deferred = Some(err),
                Err(err) => return Err(err),
            }
        } else {
            remove_file_if_exists(&attachment.storage_path)?;
        }

        self.records.delete(&attachment.id)?;
        info!(id = %attachment.id, issue = %attachment.issue_id, "Attachment deleted");
        match deferred {
            Some(err) => Err(err),
            None => Ok(attachment),
        }
    }

    /// # Errors
    ///
    /// Returns `AttachmentNotFound` for an unknown ID.
    pub fn get(&self, attachment_id: &str) -> Result<Attachment> {
        self.records
            .load(attachment_id)?
            .ok_or_error(|| AttachError::AttachmentNotFound {
                id: attachment_id.to_string(),
            })
    }

    /// Records for one issue, or all of them, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be listed.
    pub fn list(&self, issue_id: Option<&str>) -> Result<Vec<Attachment>> {
        let mut attachments = self.records.list()?;
        if let Some(issue_id) = issue_id {
            attachments.retain(|a| a.issue_id == issue_id);
        }
        attachments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(attachments)
    }

    /// Bytes of an attachment.
    ///
    /// # Errors
    ///
    /// Returns `AttachmentNotFound` or `ContentMissing`.
    pub fn read(&self, attachment_id: &str) -> Result<Vec<u8>> {
        let attachment = self.get(attachment_id)?;
        if attachment.deduplicated {
            return self.dedup.store().read(&attachment.hash);
        }
        fs::read(&attachment.storage_path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AttachError::ContentMissing {
                    hash: attachment.hash.clone(),
                    path: attachment.storage_path.clone(),
                }
            } else {
                err.into()
            }
        })
    }

    /// Migrate a legacy tree and point matching records at the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be walked.
    pub fn migrate(&self, tree_root: &Path, options: &MigrationOptions) -> Result<MigrationReport> {
        let report = self.dedup.migrate(tree_root, options)?;
        if report.dry_run {
            return Ok(report);
        }

        let mut updated = 0usize;
        for moved in &report.relocated {
            match self.records.load(&moved.attachment_id) {
                Ok(Some(mut record)) => {
                    record.deduplicated = true;
                    record.hash.clone_from(&moved.hash);
                    record.algorithm = moved.algorithm;
                    record.storage_path.clone_from(&moved.storage_path);
                    if let Err(err) = self.records.save(&record) {
                        warn!(id = %record.id, error = %err, "Could not update migrated record");
                    } else {
                        updated += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(id = %moved.attachment_id, error = %err, "Could not read record"),
            }
        }
        debug!(updated, "Updated attachment records after migration");
        Ok(report)
    }
}
