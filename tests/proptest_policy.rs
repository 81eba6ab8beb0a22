//! Property-based tests for the dedup policy predicate.
//!
//! Uses proptest to verify that:
//! - A disabled policy never deduplicates
//! - Size bounds are inclusive and zero max means unlimited
//! - Excluded substrings win regardless of case

use proptest::prelude::*;
use tracing::info;

use tracker_attachments::DeduplicationPolicy;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..Default::default()
    })]

    #[test]
    fn disabled_policy_rejects_everything(size in any::<u64>(), content_type in "[a-z]{1,10}/[a-z0-9.+-]{1,20}") {
        init_test_logging();
        let policy = DeduplicationPolicy {
            enabled: false,
            min_file_size: 0,
            ..DeduplicationPolicy::default()
        };
        prop_assert!(!policy.should_deduplicate(size, &content_type));
    }

    #[test]
    fn size_window_is_inclusive(
        min in 0u64..1_000_000,
        span in 0u64..1_000_000,
        size in 0u64..3_000_000,
    ) {
        init_test_logging();
        let max = min + span;
        let policy = DeduplicationPolicy {
            min_file_size: min,
            max_file_size: max,
            ..DeduplicationPolicy::default()
        };
        let expected = size >= min && (max == 0 || size <= max);
        info!(min, max, size, expected, "proptest_policy_window");
        prop_assert_eq!(policy.should_deduplicate(size, "application/pdf"), expected);
        prop_assert!(policy.should_deduplicate(min, "application/pdf"));
        if max > 0 {
            prop_assert!(policy.should_deduplicate(max, "application/pdf"));
        }
    }

    #[test]
    fn zero_max_means_unlimited(min in 0u64..4096, extra in 0u64..u64::MAX / 2) {
        init_test_logging();
        let policy = DeduplicationPolicy {
            min_file_size: min,
            max_file_size: 0,
            ..DeduplicationPolicy::default()
        };
        prop_assert!(policy.should_deduplicate(min + extra, "image/png"));
    }

    #[test]
    fn exclusion_matches_substring_ignoring_case(
        prefix in "[a-z]{0,5}",
        pattern in "[a-z]{2,8}",
        suffix in "[a-z]{0,5}",
        upper in any::<bool>(),
    ) {
        init_test_logging();
        let policy = DeduplicationPolicy {
            excluded_content_types: vec![pattern.clone()],
            ..DeduplicationPolicy::permissive()
        };
        let mut content_type = format!("{prefix}{pattern}{suffix}");
        if upper {
            content_type = content_type.to_uppercase();
        }
        prop_assert!(!policy.should_deduplicate(1 << 20, &content_type));
        prop_assert!(policy.should_deduplicate(1 << 20, "0/0"));
    }
}
