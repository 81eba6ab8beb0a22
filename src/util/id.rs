//! ID generation for attachments.
//!
//! Attachment IDs have the form `att-<hash>` where hash is base36 lowercase
//! (0-9, a-z) derived from issue, filename, creation time and a nonce.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Prefix for every generated attachment ID.
pub const ATTACHMENT_PREFIX: &str = "att";

/// Default hash length; extended on collision.
const DEFAULT_HASH_LENGTH: usize = 8;
const MAX_HASH_LENGTH: usize = 12;

/// Generate the seed string for ID generation.
///
/// Inputs: `issue_id | filename | created_at (ns) | nonce`
#[must_use]
pub fn generate_id_seed(
    issue_id: &str,
    filename: &str,
    created_at: DateTime<Utc>,
    nonce: u32,
) -> String {
    format!(
        "{}|{}|{}|{}",
        issue_id,
        filename,
        created_at.timestamp_nanos_opt().unwrap_or(0),
        nonce
    )
}

/// Compute a base36 hash of the input string with a specific length.
///
/// Uses SHA256 to hash the input, then converts the first 8 bytes to a u64,
/// encodes as base36, and truncates to the requested length.
#[must_use]
pub fn compute_id_hash(input: &str, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();

    let mut num = 0u64;
    for &byte in result.iter().take(8) {
        num = (num << 8) | u64::from(byte);
    }

    let mut s = base36_encode(num);
    if s.len() < length {
        s = format!("{s:0>length$}");
    }

    s.chars().take(length).collect()
}

fn base36_encode(mut num: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while num > 0 {
        chars.push(ALPHABET[(num % 36) as usize] as char);
        num /= 36;
    }
    chars.into_iter().rev().collect()
}

/// Generate an attachment ID, checking for collisions with `exists`.
pub fn generate_attachment_id<F>(
    issue_id: &str,
    filename: &str,
    created_at: DateTime<Utc>,
    exists: F,
) -> String
where
    F: Fn(&str) -> bool,
{
    for length in DEFAULT_HASH_LENGTH..=MAX_HASH_LENGTH {
        for nonce in 0..10 {
            let seed = generate_id_seed(issue_id, filename, created_at, nonce);
            let id = format!("{ATTACHMENT_PREFIX}-{}", compute_id_hash(&seed, length));
            if !exists(&id) {
                return id;
            }
        }
    }

    // Desperate fallback: append a counter to guarantee uniqueness
    let seed = generate_id_seed(issue_id, filename, created_at, 0);
    let hash = compute_id_hash(&seed, MAX_HASH_LENGTH);
    let mut counter = 0u32;
    loop {
        let id = format!("{ATTACHMENT_PREFIX}-{hash}{counter}");
        if !exists(&id) {
            return id;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600, 0).unwrap()
    }

    #[test]
    fn id_has_prefix_and_base36_hash() {
        let id = generate_attachment_id("bd-1", "report.pdf", fixed_time(), |_| false);
        let hash = id.strip_prefix("att-").expect("prefix");
        assert_eq!(hash.len(), DEFAULT_HASH_LENGTH);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn id_is_deterministic_for_same_inputs() {
        let a = generate_attachment_id("bd-1", "a.txt", fixed_time(), |_| false);
        let b = generate_attachment_id("bd-1", "a.txt", fixed_time(), |_| false);
        assert_eq!(a, b);
    }

    #[test]
    fn collision_moves_to_next_candidate() {
        let first = generate_attachment_id("bd-1", "a.txt", fixed_time(), |_| false);
        let second = generate_attachment_id("bd-1", "a.txt", fixed_time(), |id| id == first);
        assert_ne!(first, second);
    }

    #[test]
    fn ids_never_contain_underscore() {
        let id = generate_attachment_id("bd_1", "a_b.txt", fixed_time(), |_| false);
        assert!(!id.contains('_'));
    }
}
