//! `tracker_attachments` - deduplicating attachment storage for a local,
//! file-backed issue tracker.
//!
//! - [`dedup`] - content-addressable store, hash index, reference ledger,
//!   policy, migration scanner and integrity checks
//! - [`attachments`] - upload and delete path built on the store
//! - [`config`] - layered YAML/env configuration and project discovery
//! - [`cli`] - the `ta` command line

pub mod attachments;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod format;
pub mod logging;
pub mod model;
pub mod util;

pub use attachments::{AttachmentManager, AttachmentRecords, FileAttachmentRecords};
pub use dedup::{DedupService, DeduplicationPolicy, MigrationOptions, MigrationReport};
pub use error::{AttachError, ErrorCode, Result, StructuredError};
pub use model::{Attachment, DedupStats, DuplicateGroup, HashAlgorithm, HashEntry, Reference};
pub use util::CancelToken;
