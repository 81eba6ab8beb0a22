//! Store-wide accounting.

use crate::model::{DedupStats, DuplicateSummary, HashEntry};

/// Number of shared objects listed in a default stats report.
pub const DEFAULT_TOP_DUPLICATES: usize = 10;

/// Summarize `entries`, listing at most `top` shared objects.
///
/// Only objects with more than one reference appear in `top_duplicates`,
/// ordered by bytes saved (largest first) and then by digest.
#[must_use]
pub fn compute_stats<'a, I>(entries: I, top: usize) -> DedupStats
where
    I: IntoIterator<Item = &'a HashEntry>,
{
    let mut stats = DedupStats::default();
    let mut shared = Vec::new();

    for entry in entries {
        stats.unique_files += 1;
        stats.total_references += entry.ref_count;
        stats.unique_size += entry.size;
        stats.total_size_without_dedup += entry.size.saturating_mul(entry.ref_count);
        if entry.ref_count > 1 {
            shared.push(DuplicateSummary {
                hash: entry.hash.clone(),
                filename: entry.original_filename.clone(),
                size: entry.size,
                ref_count: entry.ref_count,
                space_saved: entry.space_saved(),
            });
        }
    }

    stats.space_saved = stats
        .total_size_without_dedup
        .saturating_sub(stats.unique_size);
    if stats.unique_size > 0 {
        stats.deduplication_ratio =
            stats.total_size_without_dedup as f64 / stats.unique_size as f64;
    }

    shared.sort_by(|a, b| {
        b.space_saved
            .cmp(&a.space_saved)
            .then_with(|| a.hash.cmp(&b.hash))
    });
    shared.truncate(top);
    stats.top_duplicates = shared;
    stats
}
