use serde_json::json;

use super::{GlobalOptions, open_manager, print_json};
use crate::config::CliOverrides;
use crate::error::Result;

/// Execute the detach command.
///
/// # Errors
///
/// Returns `AttachmentNotFound` for an unknown ID, or a store error.
pub fn execute(id: &str, global: &GlobalOptions) -> Result<()> {
    let (_, manager) = open_manager(global, &CliOverrides::default())?;
    let attachment = manager.delete(id)?;

    if global.json {
        print_json(&json!({ "deleted": attachment.id, "issue_id": attachment.issue_id }))?;
    } else if !global.quiet {
        println!("Removed {} from {}", attachment.id, attachment.issue_id);
    }
    Ok(())
}
