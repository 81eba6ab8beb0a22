//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Deduplicating attachment store for a local issue tracker
#[derive(Parser, Debug)]
#[command(name = "ta", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project directory (defaults to TRACKER_DIR, then the nearest .tracker/)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a project directory
    Init {
        /// Rewrite the config of an existing project
        #[arg(long)]
        force: bool,
    },

    /// Attach a file to an issue
    Attach(AttachArgs),

    /// Remove an attachment
    #[command(alias = "rm")]
    Detach {
        /// Attachment ID
        id: String,
    },

    /// List attachments
    #[command(alias = "ls")]
    List {
        /// Only attachments of this issue
        issue: Option<String>,
    },

    /// Show one attachment
    Show {
        /// Attachment ID
        id: String,
    },

    /// Deduplication store maintenance
    Dedup {
        #[command(subcommand)]
        command: DedupCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AttachArgs {
    /// Issue ID
    pub issue: String,

    /// File to attach
    pub file: PathBuf,

    /// Stored filename (defaults to the file's name)
    #[arg(long)]
    pub name: Option<String>,

    /// Content type (guessed from the filename if omitted)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Store a private copy even if the policy would deduplicate
    #[arg(long)]
    pub no_dedup: bool,
}

#[derive(Subcommand, Debug)]
pub enum DedupCommands {
    /// Show deduplication statistics
    Stats {
        /// Number of top duplicates to list
        #[arg(long, default_value_t = crate::dedup::DEFAULT_TOP_DUPLICATES)]
        top: usize,
    },

    /// Report duplicate files in a legacy tree
    Scan {
        /// Tree to scan (defaults to the project's attachments directory)
        path: Option<PathBuf>,
    },

    /// Move duplicate files of a legacy tree into the store
    Migrate {
        /// Tree to migrate (defaults to the project's attachments directory)
        path: Option<PathBuf>,

        /// Report what would change without touching files
        #[arg(long)]
        dry_run: bool,
    },

    /// Check store integrity
    Verify {
        /// Re-hash every stored object
        #[arg(long)]
        deep: bool,

        /// Remove temp files left by interrupted writes before checking
        #[arg(long)]
        clean_temp: bool,
    },

    /// Show or update the dedup policy
    Policy(PolicyArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// Enable deduplication
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    /// Disable deduplication
    #[arg(long)]
    pub disable: bool,

    /// Hash algorithm (sha256, sha1, md5)
    #[arg(long)]
    pub algorithm: Option<String>,

    /// Minimum file size in bytes
    #[arg(long)]
    pub min_size: Option<u64>,

    /// Maximum file size in bytes (0 = unlimited)
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Exclude content types containing this substring (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Drop all existing exclusions first
    #[arg(long)]
    pub clear_excludes: bool,
}

impl PolicyArgs {
    /// True when any flag asks for a change.
    #[must_use]
    pub fn has_updates(&self) -> bool {
        self.enable
            || self.disable
            || self.algorithm.is_some()
            || self.min_size.is_some()
            || self.max_size.is_some()
            || !self.exclude.is_empty()
            || self.clear_excludes
    }
}
