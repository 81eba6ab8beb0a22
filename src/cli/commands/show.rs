use super::{GlobalOptions, open_manager, print_json};
use crate::config::CliOverrides;
use crate::error::Result;
use crate::format::format_bytes;

/// Execute the show command.
///
/// # Errors
///
/// Returns `AttachmentNotFound` for an unknown ID.
pub fn execute(id: &str, global: &GlobalOptions) -> Result<()> {
    let (_, manager) = open_manager(global, &CliOverrides::default())?;
    let attachment = manager.get(id)?;

    if global.json {
        let mut value = serde_json::to_value(&attachment)?;
        if attachment.deduplicated {
            if let Some(entry) = manager.dedup().get(&attachment.hash)? {
                value["ref_count"] = entry.ref_count.into();
            }
        }
        return print_json(&value);
    }
    if global.quiet {
        return Ok(());
    }

    println!("{}", attachment.id);
    println!("  Issue:         {}", attachment.issue_id);
    println!("  Filename:      {}", attachment.filename);
    println!("  Content type:  {}", attachment.content_type);
    println!("  Size:          {}", format_bytes(attachment.size));
    println!("  Hash:          {}:{}", attachment.algorithm, attachment.hash);
    println!("  Created:       {}", attachment.created_at.to_rfc3339());
    if attachment.deduplicated {
        let shared = manager
            .dedup()
            .get(&attachment.hash)?
            .map_or(0, |entry| entry.ref_count);
        println!("  Storage:       deduplicated ({shared} references)");
    } else {
        println!("  Storage:       {}", attachment.storage_path.display());
    }
    Ok(())
}
