use std::fs::File;
use std::io::BufReader;
use tracing::info;

use super::{GlobalOptions, open_manager, print_json};
use crate::cli::AttachArgs;
use crate::config::CliOverrides;
use crate::dedup::migrate::guess_content_type;
use crate::error::{AttachError, Result, ResultExt};
use crate::format::format_bytes;
use crate::util::CancelToken;

/// Execute the attach command.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the upload fails.
pub fn execute(args: &AttachArgs, global: &GlobalOptions) -> Result<()> {
    let overrides = CliOverrides {
        dedup_enabled: args.no_dedup.then_some(false),
    };
    let (_, manager) = open_manager(global, &overrides)?;

    let filename = match &args.name {
        Some(name) => name.clone(),
        None => args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AttachError::validation("file", "path has no file name"))?,
    };
    let content_type = args
        .content_type
        .clone()
        .unwrap_or_else(|| guess_content_type(&filename));

    let file = File::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    info!(issue = %args.issue, file = %args.file.display(), "Uploading attachment");
    let attachment = manager.upload(
        &args.issue,
        &filename,
        &content_type,
        BufReader::new(file),
        &CancelToken::new(),
    )?;

    if global.json {
        print_json(&attachment)?;
    } else if !global.quiet {
        println!(
            "Attached {} to {} as {} ({}, {})",
            attachment.filename,
            attachment.issue_id,
            attachment.id,
            format_bytes(attachment.size),
            if attachment.deduplicated {
                "deduplicated"
            } else {
                "stored"
            }
        );
    }
    Ok(())
}
