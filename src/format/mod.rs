//! Output formatting for `tracker_attachments`.
//!
//! Human-readable text for terminals; JSON output is produced directly from
//! the serializable report types with `serde_json`.

mod text;

pub use text::{
    format_attachment_line, format_bytes, format_integrity_report, format_migration_report,
    format_policy, format_scan_outcome, format_stats, terminal_width, truncate_to_width,
};
