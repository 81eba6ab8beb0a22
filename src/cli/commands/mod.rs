//! Command implementations for `ta`.

pub mod attach;
pub mod dedup;
pub mod detach;
pub mod init;
pub mod list;
pub mod show;

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::attachments::AttachmentManager;
use crate::config::{self, CliOverrides};
use crate::dedup::DedupService;
use crate::error::Result;

/// Flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

/// Resolve the project directory and open its attachment manager.
///
/// # Errors
///
/// Returns `NotInitialized` if no project is found, or a config error.
pub fn open_manager(
    global: &GlobalOptions,
    overrides: &CliOverrides,
) -> Result<(PathBuf, AttachmentManager)> {
    let dir = config::resolve_project_dir(global.dir.as_deref())?;
    let policy = config::load_dedup_policy(&dir, overrides)?;
    debug!(dir = %dir.display(), enabled = policy.enabled, "Opening project");
    let manager = AttachmentManager::open(&dir, DedupService::new(&dir, policy));
    Ok((dir, manager))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Tree named on the command line, or the project's attachment tree.
fn tree_or_default(manager: &AttachmentManager, explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(|| manager.attachments_dir(), Path::to_path_buf)
}
