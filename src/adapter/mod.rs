//! Side adapters.
//!
//! An adapter turns one side's files into a canonical [`DocumentSet`] and
//! writes a [`PlanDocument`] back in that side's native format. There is one
//! concrete type per tool; nothing downstream branches on which tool it is.

pub mod markdown;
pub mod plan;
pub mod speckit;

pub use plan::PlanAdapter;
pub use speckit::SpecKitAdapter;

use crate::error::Result;
use crate::model::{ArtifactRef, DocumentSet, PlanDocument};
use serde::Serialize;

/// Reads and writes one side of the sync.
pub trait Adapter {
    /// Read the side into canonical form. Never modifies anything.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::AdapterRead` if a file cannot be read or parsed.
    fn read(&self) -> Result<DocumentSet>;

    /// Write a plan back, one artifact at a time.
    ///
    /// Each artifact is replaced atomically. Artifacts whose content already
    /// matches are left alone. Writing stops at the first failure, which is
    /// reported in [`WriteReport::failure`]; artifacts written before it stay
    /// written.
    fn write(&self, plan: &PlanDocument) -> WriteReport;

    /// Current content hash of one artifact, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact exists but cannot be read.
    fn fingerprint(&self, artifact_id: &str) -> Result<Option<String>>;
}

/// The artifact a write stopped at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    pub artifact_id: String,
    pub message: String,
}

/// What one `write` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Artifacts whose content was replaced or created.
    pub written: Vec<ArtifactRef>,
    /// Artifacts whose content already matched.
    pub unchanged: usize,
    /// Artifact ids removed because the plan no longer contains them.
    pub removed: Vec<String>,
    pub failure: Option<WriteFailure>,
}

impl WriteReport {
    /// True if every artifact was handled.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub(crate) fn fail(&mut self, artifact_id: impl Into<String>, err: impl ToString) {
        let failure = WriteFailure {
            artifact_id: artifact_id.into(),
            message: err.to_string(),
        };
        tracing::warn!(
            artifact_id = %failure.artifact_id,
            error = %failure.message,
            "Artifact write failed"
        );
        self.failure = Some(failure);
    }
}

/// File-name-safe form of a key.
#[must_use]
pub fn sanitize_file_stem(key: &str) -> String {
    let stem: String = key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('.').to_string();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_file_stem("FEATURE-AUTH"), "FEATURE-AUTH");
        assert_eq!(sanitize_file_stem("feature auth/v2"), "feature_auth_v2");
        assert_eq!(sanitize_file_stem("../etc"), "_etc");
        assert_eq!(sanitize_file_stem(""), "unnamed");
    }

    #[test]
    fn report_failure_marks_incomplete() {
        let mut report = WriteReport::default();
        assert!(report.is_complete());
        report.fail("features/X.yaml", "disk full");
        assert!(!report.is_complete());
        assert_eq!(
            report.failure.as_ref().map(|f| f.message.as_str()),
            Some("disk full")
        );
    }
}
