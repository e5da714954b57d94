//! Core data types for `specsync`.
//!
//! This module defines the fundamental types used throughout the application:
//! - `PlanDocument` - The canonical in-memory plan produced by every adapter
//! - `Feature` / `Story` - The entities the merge engine reconciles
//! - `ArtifactRef` / `DocumentSet` - What a side looks like on disk
//! - `ArtifactFingerprint` / `ChangeClassification` - Change detection state
//! - `ConflictRecord` / `Resolution` - Audit trail for disputed artifacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

const fn default_confidence() -> f64 {
    1.0
}

fn default_version() -> String {
    PlanDocument::CURRENT_VERSION.to_string()
}

/// Which side of the sync an artifact lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The structured plan bundle (`.specfact/`).
    Internal,
    /// The external spec tool's markdown tree.
    External,
}

impl Side {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "internal" | "local" | "plan" => Ok(Self::Internal),
            "external" | "remote" | "tool" => Ok(Self::External),
            other => Err(crate::error::SyncError::Config(format!(
                "Invalid side: {other}. Must be one of: internal, external"
            ))),
        }
    }
}

/// Category of a tracked artifact.
///
/// The set is open: categories are plain data and the conflict priority
/// table decides what each one means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactCategory(Cow<'static, str>);

impl ArtifactCategory {
    /// Feature and story content.
    pub const SPECIFICATION: Self = Self(Cow::Borrowed("specification"));
    /// Shared memory / governance documents (e.g. a project constitution).
    pub const MEMORY: Self = Self(Cow::Borrowed("memory"));

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into().trim().to_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The product idea behind a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Idea {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub narrative: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
}

/// Business context for a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Business {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub solutions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub differentiation: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
}

/// A planned release.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
}

/// Product themes and releases.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub releases: Vec<Release>,
}

/// A user story inside a feature.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Story {
    pub key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub draft: bool,
}

impl Story {
    #[must_use]
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Fields the external markdown format can carry.
    #[must_use]
    pub fn external_view(&self) -> StoryView<'_> {
        StoryView {
            title: &self.title,
            acceptance: &self.acceptance,
            tags: &self.tags,
        }
    }
}

/// A planned feature with its stories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub draft: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stories: Vec<Story>,
}

impl Default for Feature {
    fn default() -> Self {
        Self {
            key: String::new(),
            title: String::new(),
            outcomes: Vec::new(),
            acceptance: Vec::new(),
            constraints: Vec::new(),
            confidence: default_confidence(),
            draft: false,
            stories: Vec::new(),
        }
    }
}

impl Feature {
    #[must_use]
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Fields the external markdown format can carry.
    ///
    /// Two features with equal views are indistinguishable from the external
    /// side, whatever their confidence, draft flag, or story points.
    #[must_use]
    pub fn external_view(&self) -> FeatureView<'_> {
        FeatureView {
            title: &self.title,
            outcomes: &self.outcomes,
            acceptance: &self.acceptance,
            constraints: &self.constraints,
            stories: self
                .stories
                .iter()
                .map(|story| (story.key.as_str(), story.external_view()))
                .collect(),
        }
    }

    #[must_use]
    pub fn story(&self, key: &str) -> Option<&Story> {
        self.stories.iter().find(|story| story.key == key)
    }
}

/// Borrowed projection of a story onto the external format.
#[derive(Debug, PartialEq, Eq)]
pub struct StoryView<'a> {
    pub title: &'a str,
    pub acceptance: &'a [String],
    pub tags: &'a BTreeSet<String>,
}

/// Borrowed projection of a feature onto the external format.
#[derive(Debug, PartialEq, Eq)]
pub struct FeatureView<'a> {
    pub title: &'a str,
    pub outcomes: &'a [String],
    pub acceptance: &'a [String],
    pub constraints: &'a [String],
    pub stories: Vec<(&'a str, StoryView<'a>)>,
}

/// The canonical in-memory plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea: Option<Idea>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<Business>,
    #[serde(default)]
    pub product: Product,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<Feature>,
    /// Named shared documents (e.g. `constitution`), raw markdown.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub memory: BTreeMap<String, String>,
}

impl Default for PlanDocument {
    fn default() -> Self {
        Self {
            version: default_version(),
            idea: None,
            business: None,
            product: Product::default(),
            features: Vec::new(),
            memory: BTreeMap::new(),
        }
    }
}

impl PlanDocument {
    pub const CURRENT_VERSION: &'static str = "1.0";

    #[must_use]
    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.key == key)
    }

    #[must_use]
    pub fn feature_keys(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.key.as_str()).collect()
    }

    /// Copy of this plan without features or memory (the header fields).
    #[must_use]
    pub fn header(&self) -> Self {
        Self {
            version: self.version.clone(),
            idea: self.idea.clone(),
            business: self.business.clone(),
            product: self.product.clone(),
            features: Vec::new(),
            memory: BTreeMap::new(),
        }
    }
}

/// The logical thing an artifact holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ArtifactSubject {
    /// One feature, identified by its raw key on that side.
    Feature(String),
    /// One named memory document.
    Memory(String),
}

impl ArtifactSubject {
    /// Feature key or memory name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Feature(name) | Self::Memory(name) => name,
        }
    }

    #[must_use]
    pub const fn is_feature(&self) -> bool {
        matches!(self, Self::Feature(_))
    }
}

impl fmt::Display for ArtifactSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feature(key) => write!(f, "feature:{key}"),
            Self::Memory(name) => write!(f, "memory:{name}"),
        }
    }
}

/// A tracked artifact as produced by an adapter read or write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Side-relative path, `/`-separated.
    pub id: String,
    pub side: Side,
    pub category: ArtifactCategory,
    pub subject: ArtifactSubject,
    /// SHA-256 over the normalized file content.
    pub content_hash: String,
}

/// One side, read into canonical form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSet {
    pub plan: PlanDocument,
    pub artifacts: Vec<ArtifactRef>,
}

/// Persisted change-detection record for one artifact on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFingerprint {
    pub artifact_id: String,
    pub side: Side,
    pub content_hash: String,
    pub logical_version: i64,
    pub last_synced_at: DateTime<Utc>,
}

/// Per-cycle classification of an artifact pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClassification {
    Unchanged,
    /// Only the internal plan changed.
    ChangedLocal,
    /// Only the external tool side changed.
    ChangedRemote,
    ChangedBoth,
    /// No fingerprint on record yet.
    New,
    /// A side that had a fingerprint no longer has the artifact.
    Deleted,
}

impl ChangeClassification {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::ChangedLocal => "changed_local",
            Self::ChangedRemote => "changed_remote",
            Self::ChangedBoth => "changed_both",
            Self::New => "new",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Internal plan wins.
    LocalWins,
    /// External tool side wins.
    RemoteWins,
    /// Neither side is applied; a human has to decide.
    Manual,
}

impl Resolution {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "internal" | "local" | "local_wins" | "plan" => Ok(Self::LocalWins),
            "external" | "remote" | "remote_wins" | "tool" => Ok(Self::RemoteWins),
            "manual" => Ok(Self::Manual),
            other => Err(crate::error::SyncError::Config(format!(
                "Invalid resolution: {other}. Must be one of: internal, external, manual"
            ))),
        }
    }
}

/// Audit record for an artifact both sides changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub artifact_id: String,
    pub category: ArtifactCategory,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub resolution: Resolution,
    pub reason: String,
}

impl ConflictRecord {
    #[must_use]
    pub const fn is_manual(&self) -> bool {
        matches!(self.resolution, Resolution::Manual)
    }
}
