use serde_json::json;
use std::path::PathBuf;

use super::{GlobalOptions, print_json};
use crate::config::{self, PROJECT_DIR_NAME};
use crate::error::Result;

/// Execute the init command.
///
/// Creates `.tracker/` in the working directory, or the directory named by
/// `--dir`.
///
/// # Errors
///
/// Returns `AlreadyInitialized` unless `force` is set, or an I/O error.
pub fn execute(force: bool, global: &GlobalOptions) -> Result<()> {
    let dir = global
        .dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(PROJECT_DIR_NAME));
    config::init_project(&dir, force)?;

    if global.json {
        print_json(&json!({ "initialized": true, "path": dir }))?;
    } else if !global.quiet {
        println!("Initialized attachment store in {}", dir.display());
    }
    Ok(())
}
