//! Deduplication eligibility.

use serde::{Deserialize, Serialize};

use crate::model::HashAlgorithm;

/// Default minimum size eligible for deduplication (1 KiB).
pub const DEFAULT_MIN_FILE_SIZE: u64 = 1024;

/// Which uploads are routed through the dedup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationPolicy {
    pub enabled: bool,
    pub hash_algorithm: HashAlgorithm,
    pub min_file_size: u64,
    /// Zero means unlimited.
    pub max_file_size: u64,
    /// Content types containing any of these substrings are stored traditionally.
    #[serde(default)]
    pub excluded_content_types: Vec<String>,
}

impl Default for DeduplicationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            hash_algorithm: HashAlgorithm::Sha256,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            max_file_size: 0,
            excluded_content_types: Vec::new(),
        }
    }
}

impl DeduplicationPolicy {
    /// A policy that accepts every upload, regardless of size or type.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            min_file_size: 0,
            ..Self::default()
        }
    }

    /// Decide whether an upload of `size` bytes and `content_type` is deduplicated.
    ///
    /// Size bounds are inclusive: a file exactly at `min_file_size` or
    /// `max_file_size` is eligible. Content type matching ignores case.
    #[must_use]
    pub fn should_deduplicate(&self, size: u64, content_type: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if size < self.min_file_size {
            return false;
        }
        if self.max_file_size > 0 && size > self.max_file_size {
            return false;
        }

        let content_type = content_type.to_lowercase();
        !self
            .excluded_content_types
            .iter()
            .map(|pattern| pattern.trim().to_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .any(|pattern| content_type.contains(&pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DeduplicationPolicy {
        DeduplicationPolicy {
            enabled: true,
            hash_algorithm: HashAlgorithm::Sha256,
            min_file_size: 100,
            max_file_size: 1000,
            excluded_content_types: vec!["video/".to_string(), "zip".to_string()],
        }
    }

    #[test]
    fn disabled_never_deduplicates() {
        let mut p = policy();
        p.enabled = false;
        assert!(!p.should_deduplicate(500, "text/plain"));
    }

    #[test]
    fn min_boundary_is_inclusive() {
        let p = policy();
        assert!(!p.should_deduplicate(99, "text/plain"));
        assert!(p.should_deduplicate(100, "text/plain"));
    }

    #[test]
    fn max_boundary_is_inclusive() {
        let p = policy();
        assert!(p.should_deduplicate(1000, "text/plain"));
        assert!(!p.should_deduplicate(1001, "text/plain"));
    }

    #[test]
    fn zero_max_means_unlimited() {
        let mut p = policy();
        p.max_file_size = 0;
        assert!(p.should_deduplicate(u64::MAX, "text/plain"));
    }

    #[test]
    fn excluded_substrings_match_anywhere() {
        let p = policy();
        assert!(!p.should_deduplicate(500, "video/mp4"));
        assert!(!p.should_deduplicate(500, "application/zip"));
        assert!(!p.should_deduplicate(500, "application/x-zip-compressed"));
        assert!(!p.should_deduplicate(500, "VIDEO/WEBM"));
        assert!(p.should_deduplicate(500, "image/png"));
    }

    #[test]
    fn empty_pattern_is_ignored() {
        let mut p = policy();
        p.excluded_content_types = vec![String::new(), "  ".to_string()];
        assert!(p.should_deduplicate(500, "image/png"));
    }
}
