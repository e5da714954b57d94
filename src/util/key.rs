//! Feature and story key normalization.
//!
//! The two sides name the same feature differently: the plan uses
//! `FEATURE-AUTH` or `FEATURE-001`, the spec tool uses `001_auth` or
//! `001-user-auth`. Keys are reduced to an upper-case alphanumeric token
//! and compared on that token.
//!
//! Prefix matching (`USERAUTH` vs `USERAUTHENTICATION`) is only allowed when
//! one of the raw keys carried a numeric prefix. Without that guard
//! `FEATURE-ENFORCEMENT` would swallow `FEATURE-ENFORCEMENTCONFIG`.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static NUMERIC_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:feature|feat|story|us)[-_. ]*)?(\d+)(?:[-_. ]+|$)")
        .expect("numeric prefix regex is valid")
});

#[allow(clippy::expect_used)]
static WORD_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:feature|story)[-_. ]+").expect("word prefix regex is valid")
});

/// A key reduced to its comparable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedKey {
    /// The key as written on its side.
    pub raw: String,
    /// Upper-case alphanumeric token.
    pub token: String,
    /// Whether the raw key started with a sequence number.
    pub had_numeric_prefix: bool,
}

impl NormalizedKey {
    /// Guarded match against another key. See [`matches`].
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if self.token.is_empty() || other.token.is_empty() {
            return false;
        }
        if self.token == other.token {
            return true;
        }
        (self.had_numeric_prefix || other.had_numeric_prefix)
            && (self.token.starts_with(&other.token) || other.token.starts_with(&self.token))
    }

    /// True if the tokens are identical (no prefix relaxation).
    #[must_use]
    pub fn is_exact(&self, other: &Self) -> bool {
        !self.token.is_empty() && self.token == other.token
    }
}

fn to_token(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Normalize a raw key.
///
/// # Examples
///
/// ```
/// use specsync::util::key::normalize;
///
/// assert_eq!(normalize("001_user-auth").token, "USERAUTH");
/// assert_eq!(normalize("FEATURE-AUTH").token, "AUTH");
/// assert!(normalize("FEATURE-001").had_numeric_prefix);
/// assert!(!normalize("FEATURE-AUTH").had_numeric_prefix);
/// ```
#[must_use]
pub fn normalize(raw: &str) -> NormalizedKey {
    let trimmed = raw.trim();

    if let Some(caps) = NUMERIC_PREFIX.captures(trimmed) {
        let whole = caps.get(0).map_or(0, |m| m.end());
        let rest = &trimmed[whole..];
        let token = if rest.is_empty() {
            caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
        } else {
            to_token(rest)
        };
        return NormalizedKey {
            raw: raw.to_string(),
            token,
            had_numeric_prefix: true,
        };
    }

    let rest = WORD_PREFIX.find(trimmed).map_or(trimmed, |m| &trimmed[m.end()..]);
    NormalizedKey {
        raw: raw.to_string(),
        token: to_token(rest),
        had_numeric_prefix: false,
    }
}

/// True if two raw keys refer to the same entity.
///
/// Symmetric. Equal non-empty tokens always match; a prefix relation only
/// matches when at least one key had a numeric prefix.
#[must_use]
pub fn matches(a: &str, b: &str) -> bool {
    normalize(a).matches(&normalize(b))
}

/// Ordering used to pick between competing candidate pairs.
///
/// Exact token matches beat prefix matches, closer token lengths beat
/// distant ones, and the raw keys break remaining ties. Every component is
/// computed the same way whichever side a key came from.
fn candidate_rank(a: &NormalizedKey, b: &NormalizedKey) -> (bool, usize, String, String) {
    let (lo, hi) = if a.raw <= b.raw {
        (&a.raw, &b.raw)
    } else {
        (&b.raw, &a.raw)
    };
    (
        !a.is_exact(b),
        a.token.len().abs_diff(b.token.len()),
        lo.clone(),
        hi.clone(),
    )
}

/// Build a one-to-one matching between two key lists.
///
/// Returns `(left_index, right_index)` pairs sorted by left index. Keys left
/// out of every pair had no partner. `match_pairs(b, a)` yields the mirrored
/// pairs of `match_pairs(a, b)` whenever raw keys are unique within each list.
#[must_use]
pub fn match_pairs<L, R>(left: &[L], right: &[R]) -> Vec<(usize, usize)>
where
    L: AsRef<str>,
    R: AsRef<str>,
{
    let left: Vec<NormalizedKey> = left.iter().map(|k| normalize(k.as_ref())).collect();
    let right: Vec<NormalizedKey> = right.iter().map(|k| normalize(k.as_ref())).collect();

    let mut candidates = Vec::new();
    for (i, l) in left.iter().enumerate() {
        for (j, r) in right.iter().enumerate() {
            if l.matches(r) {
                candidates.push((candidate_rank(l, r), i, j));
            }
        }
    }
    candidates.sort_by(|a, b| match a.0.cmp(&b.0) {
        Ordering::Equal => (a.1.min(a.2), a.1.max(a.2)).cmp(&(b.1.min(b.2), b.1.max(b.2))),
        other => other,
    });

    let mut left_used = vec![false; left.len()];
    let mut right_used = vec![false; right.len()];
    let mut pairs = Vec::new();
    for (_, i, j) in candidates {
        if left_used[i] || right_used[j] {
            continue;
        }
        left_used[i] = true;
        right_used[j] = true;
        pairs.push((i, j));
    }
    pairs.sort_unstable();
    pairs
}
