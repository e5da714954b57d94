//! Content hashing for change detection.
//!
//! Uses SHA256 over normalized text so that formatting-only round-trips
//! (line endings, trailing whitespace, surrounding blank lines) hash equal.

use sha2::{Digest, Sha256};

/// Normalize text before hashing.
///
/// - CRLF and lone CR become LF
/// - Trailing whitespace is trimmed on every line
/// - Leading and trailing blank lines are dropped
#[must_use]
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();

    let start = lines.iter().position(|l| !l.is_empty());
    let end = lines.iter().rposition(|l| !l.is_empty());

    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

/// Compute the SHA256 hex digest of normalized content.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(content).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True if `value` looks like a SHA256 hex digest.
#[must_use]
pub fn is_valid_hash(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
