//! Category-keyed conflict resolution.
//!
//! When both sides changed an artifact, the winner is looked up in a
//! priority table keyed by artifact category. A category with no entry is
//! never settled automatically.

use crate::model::{ArtifactCategory, ConflictRecord, Resolution};
use std::collections::BTreeMap;

/// Category → winning side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    entries: BTreeMap<ArtifactCategory, Resolution>,
}

impl Default for PriorityTable {
    /// Plan wins for specifications, the external tool wins for memory.
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ArtifactCategory::SPECIFICATION, Resolution::LocalWins);
        entries.insert(ArtifactCategory::MEMORY, Resolution::RemoteWins);
        Self { entries }
    }
}

impl PriorityTable {
    /// A table with no entries; every conflict becomes manual.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, category: ArtifactCategory, resolution: Resolution) {
        self.entries.insert(category, resolution);
    }

    pub fn remove(&mut self, category: &ArtifactCategory) {
        self.entries.remove(category);
    }

    #[must_use]
    pub fn get(&self, category: &ArtifactCategory) -> Option<Resolution> {
        self.entries.get(category).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactCategory, Resolution)> {
        self.entries.iter().map(|(c, r)| (c, *r))
    }
}

/// Decides which side wins a conflict.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    table: PriorityTable,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(table: PriorityTable) -> Self {
        Self { table }
    }

    #[must_use]
    pub const fn table(&self) -> &PriorityTable {
        &self.table
    }

    /// Resolve a conflict. Only the category is consulted.
    #[must_use]
    pub fn resolve(&self, category: &ArtifactCategory, _conflict: &ConflictRecord) -> Resolution {
        self.resolution_for(category)
    }

    /// Table lookup with the manual fallback.
    #[must_use]
    pub fn resolution_for(&self, category: &ArtifactCategory) -> Resolution {
        self.table.get(category).unwrap_or(Resolution::Manual)
    }

    /// Human-readable reason for a decision.
    #[must_use]
    pub fn reason(&self, category: &ArtifactCategory, resolution: Resolution) -> String {
        match (self.table.get(category), resolution) {
            (None, _) => format!("no priority rule for category '{category}'"),
            (Some(_), Resolution::LocalWins) => {
                format!("priority rule: internal plan wins for '{category}'")
            }
            (Some(_), Resolution::RemoteWins) => {
                format!("priority rule: external tool wins for '{category}'")
            }
            (Some(_), Resolution::Manual) => {
                format!("priority rule: '{category}' requires manual resolution")
            }
        }
    }

    /// Build a resolved conflict record for an artifact.
    #[must_use]
    pub fn record(
        &self,
        artifact_id: impl Into<String>,
        category: &ArtifactCategory,
        local_hash: Option<String>,
        remote_hash: Option<String>,
    ) -> ConflictRecord {
        let mut record = ConflictRecord {
            artifact_id: artifact_id.into(),
            category: category.clone(),
            local_hash,
            remote_hash,
            resolution: Resolution::Manual,
            reason: String::new(),
        };
        record.resolution = self.resolve(category, &record);
        record.reason = self.reason(category, record.resolution);
        record
    }
}
