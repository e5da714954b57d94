//! Change detection against stored fingerprints.

use super::fingerprint::StoredPair;
use crate::model::ChangeClassification;

/// Classify an artifact pair from its current hashes and stored fingerprints.
///
/// `None` for a current hash means the artifact is absent on that side.
/// Matching hashes on both sides still count as `ChangedBoth` when both
/// moved away from their fingerprints; convergent edits are resolved like
/// any other conflict.
#[must_use]
pub fn classify(
    current_local: Option<&str>,
    current_remote: Option<&str>,
    stored: &StoredPair,
) -> ChangeClassification {
    if stored.local.is_none() && stored.remote.is_none() {
        return ChangeClassification::New;
    }

    let local_gone = stored.local.is_some() && current_local.is_none();
    let remote_gone = stored.remote.is_some() && current_remote.is_none();
    if local_gone || remote_gone {
        return ChangeClassification::Deleted;
    }

    let changed = |current: Option<&str>, stored: Option<&str>| match (current, stored) {
        (Some(current), Some(stored)) => current != stored,
        // Present now, never fingerprinted on this side.
        (Some(_), None) => true,
        (None, _) => false,
    };
    let local_changed = changed(
        current_local,
        stored.local.as_ref().map(|fp| fp.content_hash.as_str()),
    );
    let remote_changed = changed(
        current_remote,
        stored.remote.as_ref().map(|fp| fp.content_hash.as_str()),
    );

    match (local_changed, remote_changed) {
        (false, false) => ChangeClassification::Unchanged,
        (true, false) => ChangeClassification::ChangedLocal,
        (false, true) => ChangeClassification::ChangedRemote,
        (true, true) => ChangeClassification::ChangedBoth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactFingerprint, Side};
    use chrono::Utc;

    fn fp(side: Side, hash: &str) -> ArtifactFingerprint {
        ArtifactFingerprint {
            artifact_id: "x".to_string(),
            side,
            content_hash: hash.to_string(),
            logical_version: 1,
            last_synced_at: Utc::now(),
        }
    }

    fn stored(local: Option<&str>, remote: Option<&str>) -> StoredPair {
        StoredPair {
            local: local.map(|h| fp(Side::Internal, h)),
            remote: remote.map(|h| fp(Side::External, h)),
        }
    }

    #[test]
    fn no_fingerprints_is_new() {
        let pair = stored(None, None);
        assert_eq!(classify(Some("a"), Some("b"), &pair), ChangeClassification::New);
        assert_eq!(classify(Some("a"), None, &pair), ChangeClassification::New);
        assert_eq!(classify(None, Some("b"), &pair), ChangeClassification::New);
    }

    #[test]
    fn vanished_side_is_deleted() {
        let pair = stored(Some("a"), Some("b"));
        assert_eq!(classify(None, Some("b"), &pair), ChangeClassification::Deleted);
        assert_eq!(classify(Some("a"), None, &pair), ChangeClassification::Deleted);
        assert_eq!(classify(None, None, &pair), ChangeClassification::Deleted);
    }

    #[test]
    fn hash_comparison_per_side() {
        let pair = stored(Some("a"), Some("b"));
        assert_eq!(classify(Some("a"), Some("b"), &pair), ChangeClassification::Unchanged);
        assert_eq!(classify(Some("a2"), Some("b"), &pair), ChangeClassification::ChangedLocal);
        assert_eq!(classify(Some("a"), Some("b2"), &pair), ChangeClassification::ChangedRemote);
        assert_eq!(classify(Some("a2"), Some("b2"), &pair), ChangeClassification::ChangedBoth);
    }

    #[test]
    fn convergent_edits_still_conflict() {
        let pair = stored(Some("a"), Some("b"));
        assert_eq!(classify(Some("c"), Some("c"), &pair), ChangeClassification::ChangedBoth);
    }

    #[test]
    fn one_sided_history() {
        // Only the internal side was ever synced; external now appears.
        let pair = stored(Some("a"), None);
        assert_eq!(classify(Some("a"), Some("b"), &pair), ChangeClassification::ChangedRemote);
        assert_eq!(classify(Some("a"), None, &pair), ChangeClassification::Unchanged);
        assert_eq!(classify(Some("a2"), None, &pair), ChangeClassification::ChangedLocal);
    }
}
