use super::{GlobalOptions, open_manager, print_json};
use crate::config::CliOverrides;
use crate::error::Result;
use crate::format::{format_attachment_line, terminal_width};

/// Execute the list command.
///
/// # Errors
///
/// Returns an error if the project cannot be opened or records cannot be read.
pub fn execute(issue: Option<&str>, global: &GlobalOptions) -> Result<()> {
    let (_, manager) = open_manager(global, &CliOverrides::default())?;
    let attachments = manager.list(issue)?;

    if global.json {
        return print_json(&attachments);
    }
    if global.quiet {
        return Ok(());
    }
    if attachments.is_empty() {
        println!("No attachments found.");
        return Ok(());
    }

    let width = terminal_width();
    for attachment in &attachments {
        println!("{}", format_attachment_line(attachment, Some(width)));
    }
    Ok(())
}
