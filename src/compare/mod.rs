//! Structural comparison of two plans.
//!
//! `manual` is the plan a human maintains, `auto` the one derived from the
//! implementation (or the other side of a sync). Features are paired with the
//! same key matching the merge engine uses, so `FEATURE-AUTH` and `001_auth`
//! compare as one feature.

use crate::error::{Result, SyncError};
use crate::model::{Feature, PlanDocument};
use crate::util::key::match_pairs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Kind of structural difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationType {
    /// In `manual`, not in `auto`.
    MissingFeature,
    /// In `auto`, not in `manual`.
    ExtraImplementation,
    /// Present in both but different.
    Mismatch,
}

impl DeviationType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingFeature => "missing_feature",
            Self::ExtraImplementation => "extra_implementation",
            Self::Mismatch => "mismatch",
        }
    }
}

/// Severity tier. Ordered so that `High` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "med" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(SyncError::Config(format!(
                "Invalid severity: {other}. Must be one of: low, medium, high"
            ))),
        }
    }
}

/// One classified difference between two plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deviation {
    #[serde(rename = "type")]
    pub deviation_type: DeviationType,
    pub severity: Severity,
    pub description: String,
    /// Dotted path, e.g. `features.FEATURE-AUTH.acceptance`.
    pub location: String,
}

impl Deviation {
    fn new(
        deviation_type: DeviationType,
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            deviation_type,
            severity,
            description: description.into(),
            location: location.into(),
        }
    }
}

fn feature_mismatches(manual: &Feature, auto: &Feature, out: &mut Vec<Deviation>) {
    let location = format!("features.{}", manual.key);
    if manual.title.trim() != auto.title.trim() {
        out.push(Deviation::new(
            DeviationType::Mismatch,
            Severity::Low,
            format!("{location}.title"),
            format!("Title differs: '{}' vs '{}'", manual.title, auto.title),
        ));
    }
    if manual.outcomes != auto.outcomes {
        out.push(Deviation::new(
            DeviationType::Mismatch,
            Severity::Low,
            format!("{location}.outcomes"),
            format!(
                "Outcomes differ ({} vs {} items)",
                manual.outcomes.len(),
                auto.outcomes.len()
            ),
        ));
    }
    if manual.acceptance != auto.acceptance {
        out.push(Deviation::new(
            DeviationType::Mismatch,
            Severity::Medium,
            format!("{location}.acceptance"),
            format!(
                "Acceptance criteria differ ({} vs {} items)",
                manual.acceptance.len(),
                auto.acceptance.len()
            ),
        ));
    }
}

fn idea_title(plan: &PlanDocument) -> &str {
    plan.idea.as_ref().map_or("", |idea| idea.title.trim())
}

/// Compare two plans. Neither input is modified.
///
/// Deviations are ordered: metadata first, then features in `manual` order,
/// then features that only `auto` has.
#[must_use]
pub fn compare(manual: &PlanDocument, auto: &PlanDocument) -> Vec<Deviation> {
    let mut deviations = Vec::new();

    // A missing idea reads as an empty title.
    let manual_idea = idea_title(manual);
    let auto_idea = idea_title(auto);
    if manual_idea != auto_idea {
        deviations.push(Deviation::new(
            DeviationType::Mismatch,
            Severity::Low,
            "idea.title",
            format!("Idea title differs: '{manual_idea}' vs '{auto_idea}'"),
        ));
    }
    if manual.product.themes != auto.product.themes {
        deviations.push(Deviation::new(
            DeviationType::Mismatch,
            Severity::Low,
            "product.themes",
            format!(
                "Product themes differ: [{}] vs [{}]",
                manual.product.themes.join(", "),
                auto.product.themes.join(", ")
            ),
        ));
    }

    let pairs = match_pairs(&manual.feature_keys(), &auto.feature_keys());
    let matched_auto: HashSet<usize> = pairs.iter().map(|&(_, j)| j).collect();

    for (i, feature) in manual.features.iter().enumerate() {
        match pairs.iter().find(|&&(m, _)| m == i) {
            Some(&(_, j)) => feature_mismatches(feature, &auto.features[j], &mut deviations),
            None => deviations.push(Deviation::new(
                DeviationType::MissingFeature,
                Severity::High,
                format!("features.{}", feature.key),
                format!("Feature '{}' ({}) is not implemented", feature.key, feature.title),
            )),
        }
    }

    for (j, feature) in auto.features.iter().enumerate() {
        if !matched_auto.contains(&j) {
            deviations.push(Deviation::new(
                DeviationType::ExtraImplementation,
                Severity::Medium,
                format!("features.{}", feature.key),
                format!("Feature '{}' ({}) is not in the plan", feature.key, feature.title),
            ));
        }
    }

    deviations
}

/// Counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationSummary {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl DeviationSummary {
    #[must_use]
    pub fn from_deviations(deviations: &[Deviation]) -> Self {
        let mut summary = Self::default();
        for deviation in deviations {
            summary.total += 1;
            match deviation.severity {
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
        }
        summary
    }
}

/// What enforcement does with one deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementAction {
    Block,
    Warn,
    Log,
}

impl EnforcementAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Warn => "warn",
            Self::Log => "log",
        }
    }
}

/// Severity thresholds for blocking and warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementPolicy {
    pub name: String,
    /// Deviations at or above this severity block. `None` never blocks.
    pub block_on: Option<Severity>,
    /// Deviations at or above this severity warn.
    pub warn_on: Option<Severity>,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self::balanced()
    }
}

impl EnforcementPolicy {
    pub const PRESETS: [&'static str; 3] = ["minimal", "balanced", "strict"];

    /// Never blocks, warns on high severity.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            name: "minimal".to_string(),
            block_on: None,
            warn_on: Some(Severity::High),
        }
    }

    /// Blocks high, warns medium.
    #[must_use]
    pub fn balanced() -> Self {
        Self {
            name: "balanced".to_string(),
            block_on: Some(Severity::High),
            warn_on: Some(Severity::Medium),
        }
    }

    /// Blocks medium and up, warns on everything else.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            name: "strict".to_string(),
            block_on: Some(Severity::Medium),
            warn_on: Some(Severity::Low),
        }
    }

    /// Look up a preset by name.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for an unknown name.
    pub fn preset(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "minimal" => Ok(Self::minimal()),
            "balanced" => Ok(Self::balanced()),
            "strict" => Ok(Self::strict()),
            other => Err(SyncError::Config(format!(
                "Unknown enforcement policy: {other}. Must be one of: {}",
                Self::PRESETS.join(", ")
            ))),
        }
    }

    #[must_use]
    pub fn action_for(&self, severity: Severity) -> EnforcementAction {
        if self.block_on.is_some_and(|threshold| severity >= threshold) {
            EnforcementAction::Block
        } else if self.warn_on.is_some_and(|threshold| severity >= threshold) {
            EnforcementAction::Warn
        } else {
            EnforcementAction::Log
        }
    }

    /// Number of deviations this policy blocks.
    #[must_use]
    pub fn blocked(&self, deviations: &[Deviation]) -> usize {
        deviations
            .iter()
            .filter(|d| self.action_for(d.severity) == EnforcementAction::Block)
            .count()
    }
}

#[derive(Serialize)]
struct ReportEntry<'a> {
    #[serde(flatten)]
    deviation: &'a Deviation,
    action: EnforcementAction,
}

/// Serializable deviation report.
#[derive(Serialize)]
pub struct DeviationReport<'a> {
    policy: &'a str,
    summary: DeviationSummary,
    blocked: usize,
    deviations: Vec<ReportEntry<'a>>,
}

impl<'a> DeviationReport<'a> {
    #[must_use]
    pub fn new(deviations: &'a [Deviation], policy: &'a EnforcementPolicy) -> Self {
        Self {
            policy: &policy.name,
            summary: DeviationSummary::from_deviations(deviations),
            blocked: policy.blocked(deviations),
            deviations: deviations
                .iter()
                .map(|deviation| ReportEntry {
                    deviation,
                    action: policy.action_for(deviation.severity),
                })
                .collect(),
        }
    }

    /// Plain text rendering, one line per deviation.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if self.deviations.is_empty() {
            out.push_str("No deviations found.\n");
            return out;
        }
        for entry in &self.deviations {
            let d = entry.deviation;
            let _ = writeln!(
                out,
                "[{:<5}] {:<6} {:<20} {}: {}",
                entry.action.as_str().to_uppercase(),
                d.severity.as_str(),
                d.deviation_type.as_str(),
                d.location,
                d.description
            );
        }
        let _ = writeln!(
            out,
            "\n{} deviation(s): {} high, {} medium, {} low. Policy '{}' blocks {}.",
            self.summary.total,
            self.summary.high,
            self.summary.medium,
            self.summary.low,
            self.policy,
            self.blocked
        );
        out
    }

    /// JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
