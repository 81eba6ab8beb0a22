//! Content deduplication for attachments.
//!
//! [`DedupService`] owns the hash index, the reference ledger, the content
//! store and the active policy for one project directory. Index and ledger
//! state is loaded lazily from disk on first use and guarded by one coarse
//! read-write lock: reads run in parallel, mutations serialize.
//!
//! Every mutation persists to disk before touching the in-memory maps, so a
//! failed write leaves the cached view identical to what is on disk.

pub mod cas;
pub mod index;
pub mod ledger;
pub mod migrate;
pub mod policy;
pub mod stats;
pub mod verify;

pub use cas::{ContentStore, HashedCopy, hash_copy, hash_file, hash_reader, validate_hash};
pub use index::HashIndex;
pub use ledger::ReferenceLedger;
pub use migrate::{MigrationIssue, MigrationOptions, MigrationReport, RelocatedAttachment, ScanOutcome};
pub use policy::DeduplicationPolicy;
pub use stats::{DEFAULT_TOP_DUPLICATES, compute_stats};
pub use verify::{IntegrityReport, RefCountMismatch};

use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{AttachError, Result};
use crate::model::{Attachment, DedupStats, DuplicateGroup, HashAlgorithm, HashEntry, Reference};
use crate::util::{CancelToken, validate_path_component};

/// Cached view of the index and ledger.
#[derive(Debug, Default)]
struct IndexState {
    loaded: bool,
    hashes: BTreeMap<String, HashEntry>,
    references: BTreeMap<String, Reference>,
    by_hash: BTreeMap<String, BTreeSet<String>>,
}

impl IndexState {
    fn insert_reference(&mut self, reference: Reference) {
        self.by_hash
            .entry(reference.file_hash.clone())
            .or_default()
            .insert(reference.attachment_id.clone());
        self.references
            .insert(reference.attachment_id.clone(), reference);
    }

    fn drop_reference(&mut self, attachment_id: &str) -> Option<Reference> {
        let reference = self.references.remove(attachment_id)?;
        if let Some(ids) = self.by_hash.get_mut(&reference.file_hash) {
            ids.remove(attachment_id);
            if ids.is_empty() {
                self.by_hash.remove(&reference.file_hash);
            }
        }
        Some(reference)
    }

    fn reference_count(&self, hash: &str) -> usize {
        self.by_hash.get(hash).map_or(0, BTreeSet::len)
    }
}

/// Deduplicated attachment storage for one project directory.
#[derive(Debug)]
pub struct DedupService {
    base: PathBuf,
    store: ContentStore,
    index: HashIndex,
    ledger: ReferenceLedger,
    policy: RwLock<DeduplicationPolicy>,
    state: RwLock<IndexState>,
}

impl DedupService {
    /// Create a service rooted at `base`. Nothing is read until first use.
    #[must_use]
    pub fn new(base: &Path, policy: DeduplicationPolicy) -> Self {
        let store = ContentStore::new(base);
        Self {
            base: base.to_path_buf(),
            index: HashIndex::new(store.root()),
            ledger: ReferenceLedger::new(store.root()),
            store,
            policy: RwLock::new(policy),
            state: RwLock::new(IndexState::default()),
        }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub const fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Snapshot of the active policy.
    #[must_use]
    pub fn policy(&self) -> DeduplicationPolicy {
        self.policy.read().clone()
    }

    /// Replace the active policy. Existing entries keep their algorithm.
    pub fn set_policy(&self, policy: DeduplicationPolicy) {
        info!(
            enabled = policy.enabled,
            algorithm = %policy.hash_algorithm,
            min = policy.min_file_size,
            max = policy.max_file_size,
            "Dedup policy updated"
        );
        *self.policy.write() = policy;
    }

    #[must_use]
    pub fn should_deduplicate(&self, size: u64, content_type: &str) -> bool {
        self.policy.read().should_deduplicate(size, content_type)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        {
            let state = self.state.read();
            if state.loaded {
                return Ok(state);
            }
        }
        let state = self.write_state()?;
        Ok(RwLockWriteGuard::downgrade(state))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        let mut state = self.state.write();
        if !state.loaded {
            let hashes = self.index.load_all()?;
            let references = self.ledger.load_all()?;
            state.hashes = hashes;
            state.references = BTreeMap::new();
            state.by_hash = BTreeMap::new();
            for reference in references.into_values() {
                state.insert_reference(reference);
            }
            state.loaded = true;
            info!(
                hashes = state.hashes.len(),
                references = state.references.len(),
                "Dedup index loaded"
            );
        }
        Ok(state)
    }

    /// Look up or create the entry for `hash`, using the policy's algorithm.
    ///
    /// Returns the entry and whether it was newly created. A new entry has
    /// `ref_count == 0`; the caller stores the bytes before adding a
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHash` for a malformed digest, or an error if the
    /// metadata cannot be written.
    pub fn get_or_create_hash_entry(
        &self,
        hash: &str,
        size: u64,
        filename: &str,
        content_type: &str,
    ) -> Result<(HashEntry, bool)> {
        let algorithm = self.policy.read().hash_algorithm;
        self.get_or_create_entry(hash, algorithm, size, filename, content_type)
    }

    pub(crate) fn get_or_create_entry(
        &self,
        hash: &str,
        algorithm: HashAlgorithm,
        size: u64,
        filename: &str,
        content_type: &str,
    ) -> Result<(HashEntry, bool)> {
        validate_hash(hash)?;
        let mut state = self.write_state()?;
        self.entry_locked(&mut state, hash, algorithm, size, filename, content_type)
    }

    fn entry_locked(
        &self,
        state: &mut IndexState,
        hash: &str,
        algorithm: HashAlgorithm,
        size: u64,
        filename: &str,
        content_type: &str,
    ) -> Result<(HashEntry, bool)> {
        let now = Utc::now();

        if let Some(existing) = state.hashes.get(hash) {
            let mut updated = existing.clone();
            updated.last_accessed = now;
            self.index.persist(&updated)?;
            state.hashes.insert(hash.to_string(), updated.clone());
            debug!(hash, ref_count = updated.ref_count, "Hash entry exists");
            return Ok((updated, false));
        }

        let entry = HashEntry {
            hash: hash.to_string(),
            algorithm,
            size,
            original_filename: filename.to_string(),
            content_type: content_type.to_string(),
            storage_path: self.store.storage_path(hash)?,
            ref_count: 0,
            created_at: now,
            last_accessed: now,
        };
        self.index.persist(&entry)?;
        state.hashes.insert(hash.to_string(), entry.clone());
        debug!(hash, size, filename, "Created hash entry");
        Ok((entry, true))
    }

    /// Move a staged upload into the store and register `attachment`
    /// against it while holding the index lock.
    ///
    /// Entry lookup, import and reference are one step, so a concurrent
    /// removal of the last reference cannot collect the object in between.
    /// On failure a freshly created entry is discarded again.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if `cancel` fires before the reference is written
    /// - `HashMismatch` if `source` does not hash to `attachment.hash`
    /// - `ReferenceConflict` and I/O errors as for [`Self::add_reference`]
    pub fn ingest(
        &self,
        attachment: &Attachment,
        source: &Path,
        cancel: &CancelToken,
    ) -> Result<HashEntry> {
        validate_path_component("attachment_id", &attachment.id)?;
        validate_hash(&attachment.hash)?;
        let mut state = self.write_state()?;
        let (entry, is_new) = self.entry_locked(
            &mut state,
            &attachment.hash,
            attachment.algorithm,
            attachment.size,
            &attachment.filename,
            &attachment.content_type,
        )?;

        let registered = (|| -> Result<()> {
            if is_new || !self.store.exists(&attachment.hash) {
                self.store
                    .import_file(&attachment.hash, attachment.algorithm, source)?;
            }
            cancel.check("registering reference")?;
            self.add_reference_locked(
                &mut state,
                &attachment.id,
                &attachment.issue_id,
                &attachment.hash,
                &attachment.filename,
            )
        })();

        if let Err(err) = registered {
            if let Err(discard) = self.discard_locked(&mut state, &attachment.hash) {
                warn!(hash = %attachment.hash, error = %discard, "Could not discard unreferenced entry");
            }
            return Err(err);
        }
        Ok(state.hashes.get(&attachment.hash).cloned().unwrap_or(entry))
    }

    /// Register `attachment_id` as a holder of `hash`.
    ///
    /// Registering the same attachment against the same digest again is a
    /// no-op. The reference and the incremented count are written as a
    /// pair: if the count cannot be persisted the reference is rolled back.
    ///
    /// # Errors
    ///
    /// - `HashNotFound` if no entry exists for `hash`
    /// - `ReferenceConflict` if the attachment already holds another digest
    /// - I/O errors from persisting metadata
    pub fn add_reference(
        &self,
        attachment_id: &str,
        issue_id: &str,
        hash: &str,
        filename: &str,
    ) -> Result<()> {
        validate_path_component("attachment_id", attachment_id)?;
        validate_hash(hash)?;
        let mut state = self.write_state()?;
        self.add_reference_locked(&mut state, attachment_id, issue_id, hash, filename)
    }

    fn add_reference_locked(
        &self,
        state: &mut IndexState,
        attachment_id: &str,
        issue_id: &str,
        hash: &str,
        filename: &str,
    ) -> Result<()> {
        let Some(entry) = state.hashes.get(hash) else {
            return Err(AttachError::HashNotFound {
                hash: hash.to_string(),
            });
        };

        if let Some(existing) = state.references.get(attachment_id) {
            if existing.file_hash == hash {
                debug!(attachment_id, hash, "Reference already registered");
                return Ok(());
            }
            return Err(AttachError::ReferenceConflict {
                attachment_id: attachment_id.to_string(),
                existing: existing.file_hash.clone(),
                requested: hash.to_string(),
            });
        }

        let now = Utc::now();
        let reference = Reference {
            attachment_id: attachment_id.to_string(),
            issue_id: issue_id.to_string(),
            file_hash: hash.to_string(),
            filename: filename.to_string(),
            created_at: now,
        };
        let mut updated = entry.clone();
        updated.ref_count += 1;
        updated.last_accessed = now;

        self.ledger.persist(&reference)?;
        if let Err(err) = self.index.persist(&updated) {
            if let Err(rollback) = self.ledger.remove(attachment_id) {
                warn!(
                    attachment_id,
                    error = %rollback,
                    "Could not roll back reference after index write failed"
                );
            }
            return Err(err);
        }

        state.hashes.insert(hash.to_string(), updated.clone());
        state.insert_reference(reference);
        debug!(attachment_id, hash, ref_count = updated.ref_count, "Added reference");
        Ok(())
    }

    /// Release `attachment_id`'s hold on `hash`.
    ///
    /// When the last reference goes, the stored object and its entry are
    /// garbage collected.
    ///
    /// # Errors
    ///
    /// - `ReferenceNotFound` if the attachment does not reference `hash`
    /// - `HashNotFound` if the reference points at a missing entry
    /// - `RefCountUnderflow` if the entry's count is already zero
    /// - `GarbageCollection` if the object was only partly removed; the
    ///   reference is gone and the entry is dropped from memory regardless
    pub fn remove_reference(&self, attachment_id: &str, hash: &str) -> Result<()> {
        let mut state = self.write_state()?;

        let reference = match state.references.get(attachment_id) {
            Some(reference) if reference.file_hash == hash => reference.clone(),
            _ => {
                return Err(AttachError::ReferenceNotFound {
                    attachment_id: attachment_id.to_string(),
                    hash: hash.to_string(),
                });
            }
        };
        let Some(entry) = state.hashes.get(hash) else {
            return Err(AttachError::HashNotFound {
                hash: hash.to_string(),
            });
        };
        if entry.ref_count == 0 {
            return Err(AttachError::RefCountUnderflow {
                hash: hash.to_string(),
            });
        }

        let mut updated = entry.clone();
        updated.ref_count -= 1;
        updated.last_accessed = Utc::now();

        self.ledger.remove(attachment_id)?;
        if updated.ref_count > 0 {
            if let Err(err) = self.index.persist(&updated) {
                if let Err(restore) = self.ledger.persist(&reference) {
                    warn!(
                        attachment_id,
                        error = %restore,
                        "Could not restore reference after index write failed"
                    );
                }
                return Err(err);
            }
            state.drop_reference(attachment_id);
            state.hashes.insert(hash.to_string(), updated.clone());
            debug!(attachment_id, hash, ref_count = updated.ref_count, "Removed reference");
            return Ok(());
        }

        state.drop_reference(attachment_id);
        debug!(attachment_id, hash, "Removed last reference");
        self.collect_garbage(&mut state, hash)
    }

    /// Drop a reference whose entry is missing or already at zero.
    ///
    /// Counts are left alone. An entry at zero with no other references is
    /// collected. Returns `false` if `attachment_id` held no reference.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the ledger file cannot be removed, or
    /// `GarbageCollection` if the leftover entry was only partly removed.
    pub fn release_dangling_reference(&self, attachment_id: &str) -> Result<bool> {
        let mut state = self.write_state()?;
        let Some(reference) = state.references.get(attachment_id).cloned() else {
            return Ok(false);
        };
        let dangling = state
            .hashes
            .get(&reference.file_hash)
            .is_none_or(|entry| entry.ref_count == 0);
        if !dangling {
            return Err(AttachError::validation(
                "attachment_id",
                format!("{attachment_id} holds a counted reference"),
            ));
        }

        self.ledger.remove(attachment_id)?;
        state.drop_reference(attachment_id);
        warn!(attachment_id, hash = %reference.file_hash, "Dropped dangling reference");
        self.discard_locked(&mut state, &reference.file_hash)?;
        Ok(true)
    }

    /// Purge an entry that was created but never referenced.
    ///
    /// Returns `true` if something was purged.
    ///
    /// # Errors
    ///
    /// Returns `GarbageCollection` if the purge was only partial.
    pub fn discard_if_unreferenced(&self, hash: &str) -> Result<bool> {
        let mut state = self.write_state()?;
        self.discard_locked(&mut state, hash)
    }

    fn discard_locked(&self, state: &mut IndexState, hash: &str) -> Result<bool> {
        let unreferenced = state
            .hashes
            .get(hash)
            .is_some_and(|entry| entry.ref_count == 0)
            && state.reference_count(hash) == 0;
        if !unreferenced {
            return Ok(false);
        }
        self.collect_garbage(state, hash)?;
        Ok(true)
    }

    /// Remove the object and its entry. Both deletes are always attempted
    /// and the entry leaves memory even if one of them fails.
    fn collect_garbage(&self, state: &mut IndexState, hash: &str) -> Result<()> {
        state.hashes.remove(hash);

        let mut failures = Vec::new();
        if let Err(err) = self.store.delete(hash) {
            warn!(hash, error = %err, "Could not delete stored object");
            failures.push(format!("content: {err}"));
        }
        if let Err(err) = self.index.remove(hash) {
            warn!(hash, error = %err, "Could not delete hash entry");
            failures.push(format!("metadata: {err}"));
        }

        if failures.is_empty() {
            info!(hash, "Garbage collected unreferenced object");
            Ok(())
        } else {
            Err(AttachError::GarbageCollection {
                hash: hash.to_string(),
                reason: failures.join("; "),
            })
        }
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn get(&self, hash: &str) -> Result<Option<HashEntry>> {
        Ok(self.read_state()?.hashes.get(hash).cloned())
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn reference(&self, attachment_id: &str) -> Result<Option<Reference>> {
        Ok(self.read_state()?.references.get(attachment_id).cloned())
    }

    /// References to `hash`, ordered by attachment ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn references_for(&self, hash: &str) -> Result<Vec<Reference>> {
        let state = self.read_state()?;
        Ok(state
            .by_hash
            .get(hash)
            .into_iter()
            .flatten()
            .filter_map(|id| state.references.get(id).cloned())
            .collect())
    }

    /// All entries, ordered by digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn entries(&self) -> Result<Vec<HashEntry>> {
        Ok(self.read_state()?.hashes.values().cloned().collect())
    }

    /// All references, ordered by attachment ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn references(&self) -> Result<Vec<Reference>> {
        Ok(self.read_state()?.references.values().cloned().collect())
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn stats(&self) -> Result<DedupStats> {
        self.stats_with_top(DEFAULT_TOP_DUPLICATES)
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn stats_with_top(&self, top: usize) -> Result<DedupStats> {
        let state = self.read_state()?;
        Ok(compute_stats(state.hashes.values(), top))
    }

    /// Scan a legacy tree and return groups of identical files.
    ///
    /// # Errors
    ///
    /// Returns an error if `tree_root` cannot be walked at all.
    pub fn find_potential_duplicates(&self, tree_root: &Path) -> Result<Vec<DuplicateGroup>> {
        Ok(self.scan(tree_root, false)?.groups)
    }

    /// Scan a legacy tree, keeping per-file errors and counts.
    ///
    /// # Errors
    ///
    /// Returns an error if `tree_root` cannot be walked at all.
    pub fn scan(&self, tree_root: &Path, show_progress: bool) -> Result<ScanOutcome> {
        let algorithm = self.policy.read().hash_algorithm;
        migrate::scan_tree(&self.base, tree_root, algorithm, show_progress)
    }

    /// Fold duplicate files under `tree_root` into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if `tree_root` cannot be walked. Per-group failures
    /// are collected in the report instead.
    pub fn migrate(&self, tree_root: &Path, options: &MigrationOptions) -> Result<MigrationReport> {
        migrate::run(self, tree_root, options)
    }

    /// Check the store's invariants without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the index or the store cannot be listed.
    pub fn verify(&self, deep: bool) -> Result<IntegrityReport> {
        let state = self.read_state()?;
        verify::check(&self.store, &state.hashes, &state.references, deep)
    }

    /// Remove temp files left by interrupted writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or a file removed.
    pub fn clean_temp_files(&self) -> Result<usize> {
        let _guard = self.state.write();
        let removed = self.store.clean_temp_files()?;
        if removed > 0 {
            info!(removed, "Removed stale temp files");
        }
        Ok(removed)
    }
}
