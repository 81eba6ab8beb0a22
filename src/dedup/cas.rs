//! Content-addressable store for deduplicated attachment bytes.
//!
//! Objects live at `base/dedup/{hash[0:2]}/{hash[2:]}`. Writes go to a
//! temp file in the shard directory, are synced and digest-checked, and
//! only then renamed into place, so a crash never leaves a partial object
//! at its final path.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{AttachError, Result};
use crate::model::HashAlgorithm;

/// Directory under the project base holding the store.
pub const DEDUP_DIR: &str = "dedup";

/// Metadata directory inside the store root; never a shard.
pub const INDEX_DIR: &str = "index";

const TEMP_SUFFIX: &str = ".tmp";
const BUF_SIZE: usize = 64 * 1024;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Incremental digest over one of the supported algorithms.
pub enum ContentHasher {
    Sha256(Sha256),
    Sha1(Sha1),
    Md5(Md5),
}

impl ContentHasher {
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Sha1(h) => format!("{:x}", h.finalize()),
            Self::Md5(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Outcome of streaming a reader into a writer while hashing.
#[derive(Debug)]
pub struct HashedCopy {
    pub digest: String,
    pub size: u64,
    /// First write failure; the stream was still read to the end.
    pub write_error: Option<io::Error>,
}

/// Hash everything `reader` yields, returning the hex digest and byte count.
///
/// # Errors
///
/// Returns an error if reading fails.
pub fn hash_reader<R: Read>(mut reader: R, algorithm: HashAlgorithm) -> Result<(String, u64)> {
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; BUF_SIZE];
    let mut size = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((hasher.finalize_hex(), size))
}

/// Hash a file on disk.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<(String, u64)> {
    let file = File::open(path)?;
    hash_reader(file, algorithm)
}

/// Tee `reader` into `writer` while hashing.
///
/// A failing writer does not stop the read: the whole stream is still
/// consumed and hashed so the caller learns the true digest and size.
///
/// # Errors
///
/// Returns an error only if reading fails.
pub fn hash_copy<R: Read, W: Write>(
    mut reader: R,
    writer: &mut W,
    algorithm: HashAlgorithm,
) -> Result<HashedCopy> {
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; BUF_SIZE];
    let mut size = 0u64;
    let mut write_error = None;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        hasher.update(&buf[..n]);
        size += n as u64;

        if write_error.is_none() {
            if let Err(err) = writer.write_all(&buf[..n]) {
                warn!(error = %err, offset = size, "Write failed mid-stream; draining input");
                write_error = Some(err);
            }
        }
    }

    if write_error.is_none() {
        if let Err(err) = writer.flush() {
            write_error = Some(err);
        }
    }

    Ok(HashedCopy {
        digest: hasher.finalize_hex(),
        size,
        write_error,
    })
}

/// Check that `hash` is usable as a content address.
///
/// # Errors
///
/// Returns `InvalidHash` unless the digest is lowercase hex of at least 3 chars.
pub fn validate_hash(hash: &str) -> Result<()> {
    let valid = hash.len() >= 3
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(AttachError::InvalidHash {
            hash: hash.to_string(),
        })
    }
}

/// Unique temp path next to `target`, hidden and suffixed so scans skip it.
pub(crate) fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "object".into(), |n| n.to_string_lossy());
    let temp_name = format!(
        ".{name}.{}.{}{TEMP_SUFFIX}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    target.with_file_name(temp_name)
}

/// `path` with symlinks, `.` and `..` resolved. A path that does not exist
/// yet resolves through its parent; failing that it is returned unchanged.
pub(crate) fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map_or_else(|_| path.to_path_buf(), |parent| parent.join(name)),
        _ => path.to_path_buf(),
    }
}

pub(crate) fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// Physical storage of deduplicated bytes.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Store rooted at `base/dedup`. Nothing is created until first write.
    #[must_use]
    pub fn new(base: &Path) -> Self {
        Self {
            root: base.join(DEDUP_DIR),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` lies inside the store, however it is spelled.
    #[must_use]
    pub fn holds_path(&self, path: &Path) -> bool {
        resolve_path(path).starts_with(resolve_path(&self.root))
    }

    /// Sharded location of an object: `root/{hash[0:2]}/{hash[2:]}`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHash` for digests that cannot be sharded.
    pub fn storage_path(&self, hash: &str) -> Result<PathBuf> {
        validate_hash(hash)?;
        let (shard, rest) = hash.split_at(2);
        Ok(self.root.join(shard).join(rest))
    }

    #[must_use]
    pub fn exists(&self, hash: &str) -> bool {
        self.storage_path(hash).is_ok_and(|path| path.is_file())
    }

    /// Atomically store the bytes of `reader` under `hash`.
    ///
    /// The temp file is removed on any failure, including a digest mismatch.
    ///
    /// # Errors
    ///
    /// Returns `HashMismatch` if the bytes do not hash to `hash`, or an I/O error.
    pub fn write<R: Read>(&self, hash: &str, algorithm: HashAlgorithm, reader: R) -> Result<u64> {
        let path = self.storage_path(hash)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path_for(&path);
        let outcome = Self::fill_temp(&temp_path, reader, algorithm).and_then(|copied| {
            if copied.digest != hash {
                return Err(AttachError::HashMismatch {
                    expected: hash.to_string(),
                    actual: copied.digest,
                });
            }
            fs::rename(&temp_path, &path)?;
            Ok(copied.size)
        });

        match outcome {
            Ok(size) => {
                debug!(hash, size, path = %path.display(), "Stored object");
                Ok(size)
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                Err(err)
            }
        }
    }

    fn fill_temp<R: Read>(
        temp_path: &Path,
        reader: R,
        algorithm: HashAlgorithm,
    ) -> Result<HashedCopy> {
        let file = File::create(temp_path)?;
        let mut writer = BufWriter::new(file);
        let copied = hash_copy(reader, &mut writer, algorithm)?;
        if let Some(err) = copied.write_error {
            return Err(err.into());
        }
        writer
            .into_inner()
            .map_err(|e| AttachError::Io(e.into_error()))?
            .sync_all()?;
        Ok(HashedCopy {
            write_error: None,
            ..copied
        })
    }

    /// Move an existing file into the store under `hash`.
    ///
    /// Tries a rename first and re-verifies the moved bytes. If the rename
    /// fails (for example across devices) the file is copied through
    /// [`ContentStore::write`] and the source removed.
    ///
    /// # Errors
    ///
    /// Returns `HashMismatch` if the file does not hash to `hash`, or an I/O error.
    pub fn import_file(&self, hash: &str, algorithm: HashAlgorithm, source: &Path) -> Result<u64> {
        let path = self.storage_path(hash)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::rename(source, &path) {
            Ok(()) => {
                let (digest, size) = hash_file(&path, algorithm)?;
                if digest != hash {
                    if let Err(err) = fs::rename(&path, source) {
                        warn!(
                            hash,
                            source = %source.display(),
                            error = %err,
                            "Could not restore mismatched file"
                        );
                    }
                    return Err(AttachError::HashMismatch {
                        expected: hash.to_string(),
                        actual: digest,
                    });
                }
                debug!(hash, size, source = %source.display(), "Moved file into store");
                Ok(size)
            }
            Err(err) => {
                debug!(
                    hash,
                    source = %source.display(),
                    error = %err,
                    "Rename into store failed, copying instead"
                );
                let size = self.write(hash, algorithm, File::open(source)?)?;
                if let Err(err) = fs::remove_file(source) {
                    warn!(
                        source = %source.display(),
                        error = %err,
                        "Stored copy but could not remove source"
                    );
                }
                Ok(size)
            }
        }
    }

    /// Open a stored object for reading.
    ///
    /// # Errors
    ///
    /// Returns `ContentMissing` if no object exists for `hash`.
    pub fn open(&self, hash: &str) -> Result<File> {
        let path = self.storage_path(hash)?;
        File::open(&path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AttachError::ContentMissing {
                    hash: hash.to_string(),
                    path,
                }
            } else {
                err.into()
            }
        })
    }

    /// Read a stored object into memory.
    ///
    /// # Errors
    ///
    /// Returns `ContentMissing` if absent, or an I/O error.
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(hash)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Re-hash a stored object and compare against its address.
    ///
    /// # Errors
    ///
    /// Returns `ContentMissing` if absent, or an I/O error.
    pub fn verify(&self, hash: &str, algorithm: HashAlgorithm) -> Result<bool> {
        let (digest, _) = hash_reader(self.open(hash)?, algorithm)?;
        Ok(digest == hash)
    }

    /// Remove an object. Already absent counts as success.
    ///
    /// # Errors
    ///
    /// Returns an I/O error other than not-found.
    pub fn delete(&self, hash: &str) -> Result<()> {
        let path = self.storage_path(hash)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(hash, "Deleted object");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(hash, "Object already absent");
            }
            Err(err) => return Err(err.into()),
        }

        // Empty shards are pruned; a non-empty one simply stays.
        if let Some(shard) = path.parent() {
            let _ = fs::remove_dir(shard);
        }
        Ok(())
    }

    fn shard_dirs(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut shards = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == INDEX_DIR || name.len() != 2 || !entry.file_type()?.is_dir() {
                continue;
            }
            shards.push(entry.path());
        }
        shards.sort();
        Ok(shards)
    }

    /// Every object digest present on disk, sorted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a shard cannot be listed.
    pub fn list_objects(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        for shard in self.shard_dirs()? {
            let prefix = shard
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            for entry in fs::read_dir(&shard)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') || !entry.file_type()?.is_file() {
                    continue;
                }
                hashes.push(format!("{prefix}{name}"));
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Leftover temp files from interrupted writes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a shard cannot be listed.
    pub fn temp_files(&self) -> Result<Vec<PathBuf>> {
        let mut temps = Vec::new();
        for shard in self.shard_dirs()? {
            for entry in fs::read_dir(&shard)? {
                let entry = entry?;
                if is_temp_name(&entry.file_name().to_string_lossy()) {
                    temps.push(entry.path());
                }
            }
        }
        Ok(temps)
    }

    /// Delete leftover temp files, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a shard cannot be listed or a file removed.
    pub fn clean_temp_files(&self) -> Result<usize> {
        let temps = self.temp_files()?;
        for path in &temps {
            fs::remove_file(path)?;
            debug!(path = %path.display(), "Removed stale temp file");
        }
        Ok(temps.len())
    }
}
