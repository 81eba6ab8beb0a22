//! Plain text (non-ANSI) formatting for terminal output.

use std::fmt::Write as _;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::dedup::{DeduplicationPolicy, IntegrityReport, MigrationReport, ScanOutcome};
use crate::model::{Attachment, DedupStats};

const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

/// Terminal width from `COLUMNS`, defaulting to 80.
#[must_use]
pub fn terminal_width() -> usize {
    if let Ok(columns) = std::env::var("COLUMNS") {
        if let Ok(value) = columns.trim().parse::<usize>() {
            if value > 0 {
                return value;
            }
        }
    }
    80
}

/// Truncate `text` to fit within `max_len` visible columns.
///
/// Handles wide characters (emojis, CJK) using `unicode-width`.
#[must_use]
pub fn truncate_to_width(text: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_len {
        return text.to_string();
    }

    let (target, ellipsis) = if max_len <= 3 {
        (max_len, "")
    } else {
        (max_len - 3, "...")
    };
    let mut width = 0;
    let mut out = String::new();
    for c in text.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw > target {
            break;
        }
        width += cw;
        out.push(c);
    }
    out.push_str(ellipsis);
    out
}

/// Human-readable byte count (`1.5 KiB`).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// One line per attachment: `{id} {issue} {size} {mode} {filename}`.
#[must_use]
pub fn format_attachment_line(attachment: &Attachment, max_width: Option<usize>) -> String {
    let mode = if attachment.deduplicated { "dedup" } else { "file" };
    let prefix = format!(
        "{:<16} {:<12} {:>10} {:<5} ",
        attachment.id,
        attachment.issue_id,
        format_bytes(attachment.size),
        mode
    );
    let name = max_width.map_or_else(
        || attachment.filename.clone(),
        |width| {
            truncate_to_width(
                &attachment.filename,
                width.saturating_sub(UnicodeWidthStr::width(prefix.as_str())),
            )
        },
    );
    format!("{prefix}{name}")
}

#[must_use]
pub fn format_stats(stats: &DedupStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Deduplication Statistics");
    let _ = writeln!(out, "========================\n");
    let _ = writeln!(out, "  Unique files:        {}", stats.unique_files);
    let _ = writeln!(out, "  Total references:    {}", stats.total_references);
    let _ = writeln!(out, "  Stored size:         {}", format_bytes(stats.unique_size));
    let _ = writeln!(
        out,
        "  Size without dedup:  {}",
        format_bytes(stats.total_size_without_dedup)
    );
    let _ = writeln!(out, "  Space saved:         {}", format_bytes(stats.space_saved));
    let _ = writeln!(out, "  Dedup ratio:         {:.2}x", stats.deduplication_ratio);

    if !stats.top_duplicates.is_empty() {
        let _ = writeln!(out, "\nTop duplicates:");
        for dup in &stats.top_duplicates {
            let _ = writeln!(
                out,
                "  {}  {:>4} refs  {:>10} saved  {}",
                short_hash(&dup.hash),
                dup.ref_count,
                format_bytes(dup.space_saved),
                dup.filename
            );
        }
    }
    out
}

#[must_use]
pub fn format_scan_outcome(outcome: &ScanOutcome) -> String {
    let mut out = String::new();
    let reclaimable: u64 = outcome.groups.iter().map(|g| g.reclaimable()).sum();
    let _ = writeln!(
        out,
        "Scanned {} files: {} duplicate groups, {} reclaimable",
        outcome.files_scanned,
        outcome.groups.len(),
        format_bytes(reclaimable)
    );
    for group in &outcome.groups {
        let _ = writeln!(
            out,
            "\n{} ({} x {})",
            short_hash(&group.hash),
            group.files.len(),
            format_bytes(group.size)
        );
        for file in &group.files {
            let _ = writeln!(out, "  {}", file.path.display());
        }
    }
    if !outcome.errors.is_empty() {
        let _ = writeln!(out, "\n{} files could not be read", outcome.errors.len());
    }
    out
}

#[must_use]
pub fn format_migration_report(report: &MigrationReport) -> String {
    let mut out = String::new();
    let title = if report.dry_run {
        "Migration (dry run)"
    } else {
        "Migration"
    };
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "  Files scanned:       {}", report.files_scanned);
    let _ = writeln!(out, "  Duplicate groups:    {}", report.groups_found);
    let _ = writeln!(out, "  Groups migrated:     {}", report.files_migrated);
    let _ = writeln!(out, "  Duplicates removed:  {}", report.duplicates_removed);
    let _ = writeln!(
        out,
        "  Space reclaimed:     {}",
        format_bytes(report.space_reclaimed)
    );
    if report.cancelled {
        let _ = writeln!(out, "\nCancelled before all groups were processed.");
    }
    if !report.errors.is_empty() {
        let _ = writeln!(out, "\nErrors ({}):", report.errors.len());
        for issue in &report.errors {
            let _ = writeln!(out, "  {}: {}", issue.path.display(), issue.message);
        }
    }
    out
}

#[must_use]
pub fn format_integrity_report(report: &IntegrityReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Checked {} entries, {} references, {} objects{}",
        report.entries_checked,
        report.references_checked,
        report.objects_checked,
        if report.deep { " (deep)" } else { "" }
    );

    let mut section = |label: &str, items: Vec<String>| {
        if items.is_empty() {
            return;
        }
        let _ = writeln!(out, "\n{label} ({}):", items.len());
        for item in items {
            let _ = writeln!(out, "  {item}");
        }
    };
    section(
        "Reference count mismatches",
        report
            .ref_count_mismatches
            .iter()
            .map(|m| format!("{} recorded {} actual {}", m.hash, m.recorded, m.actual))
            .collect(),
    );
    section("Missing content", report.missing_content.clone());
    section("Orphaned objects", report.orphaned_objects.clone());
    section("Unreferenced entries", report.unreferenced_entries.clone());
    section("Dangling references", report.dangling_references.clone());
    section(
        "Storage path collisions",
        report
            .path_collisions
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    );
    section("Corrupt objects", report.corrupt_objects.clone());

    if report.temp_files > 0 {
        let _ = writeln!(
            out,
            "\n{} stale temp files (remove with --clean-temp)",
            report.temp_files
        );
    }
    if report.is_healthy() {
        let _ = writeln!(out, "\nStore is healthy.");
    }
    out
}

#[must_use]
pub fn format_policy(policy: &DeduplicationPolicy) -> String {
    let mut out = String::new();
    let max = if policy.max_file_size == 0 {
        "unlimited".to_string()
    } else {
        format_bytes(policy.max_file_size)
    };
    let excluded = if policy.excluded_content_types.is_empty() {
        "(none)".to_string()
    } else {
        policy.excluded_content_types.join(", ")
    };
    let _ = writeln!(out, "Dedup policy");
    let _ = writeln!(out, "  Enabled:         {}", policy.enabled);
    let _ = writeln!(out, "  Hash algorithm:  {}", policy.hash_algorithm);
    let _ = writeln!(out, "  Min file size:   {}", format_bytes(policy.min_file_size));
    let _ = writeln!(out, "  Max file size:   {max}");
    let _ = writeln!(out, "  Excluded types:  {excluded}");
    out
}
