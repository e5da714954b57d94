//! Entity-level merge of an internal and an external plan.
//!
//! Pure: no I/O, no clock, no environment. Inputs are borrowed and a new
//! reconciled plan is returned.
//!
//! Features are paired across naming conventions with
//! [`match_pairs`](crate::util::key::match_pairs). Unpaired features on
//! either side are carried through unchanged, so disjoint plans merge into
//! their union.

use super::resolve::ConflictResolver;
use crate::model::{
    ArtifactCategory, ArtifactSubject, ChangeClassification, ConflictRecord, Feature,
    PlanDocument, Resolution, Side, Story,
};
use crate::util::key::{match_pairs, normalize};
use crate::util::normalize_content;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Classification of one paired artifact, keyed by its internal subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairState {
    /// Artifact id used in conflict records (the internal artifact's id).
    pub artifact_id: String,
    pub classification: ChangeClassification,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
}

/// Per-pair classifications for one cycle. A missing entry means `New`.
pub type Classifications = HashMap<ArtifactSubject, PairState>;

/// An entity left at its pre-cycle state on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualHold {
    pub internal: ArtifactSubject,
    pub external: ArtifactSubject,
}

/// Result of one merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub plan: PlanDocument,
    pub conflicts: Vec<ConflictRecord>,
    /// Features that exist only on the external side and were added.
    pub features_added: usize,
    /// Paired features whose internal content changed.
    pub features_updated: usize,
    pub duplicates_removed: usize,
    pub warnings: Vec<String>,
    pub manual: Vec<ManualHold>,
}

impl MergeOutcome {
    #[must_use]
    pub fn manual_conflicts(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_manual()).count()
    }
}

/// Which copy a merge step keeps.
enum Pick {
    Internal,
    External,
    /// Both changed and nobody wins.
    Hold,
}

/// A reconciled feature plus where it came from.
struct Entry {
    feature: Feature,
    /// Key as written on its source side.
    source_key: String,
    origin: Side,
}

/// Internal key for a feature that so far only exists externally.
///
/// `001_user-auth` becomes `FEATURE-USERAUTH`, so the next cycle pairs the
/// two copies on an exact token match.
#[must_use]
pub fn internal_key_for(external_key: &str) -> String {
    let token = normalize(external_key).token;
    if token.is_empty() {
        external_key.to_string()
    } else {
        format!("FEATURE-{token}")
    }
}

/// Copy of `internal` with the externally expressible fields of `external`.
///
/// Confidence, draft flags and story points stay as they were internally.
#[must_use]
pub fn adopt_external(internal: &Feature, external: &Feature) -> Feature {
    let mut merged = internal.clone();
    merged.title.clone_from(&external.title);
    merged.outcomes.clone_from(&external.outcomes);
    merged.acceptance.clone_from(&external.acceptance);
    merged.constraints.clone_from(&external.constraints);
    merged.stories = adopt_stories(&internal.stories, &external.stories);
    merged
}

fn adopt_stories(internal: &[Story], external: &[Story]) -> Vec<Story> {
    let internal_keys: Vec<&str> = internal.iter().map(|s| s.key.as_str()).collect();
    let external_keys: Vec<&str> = external.iter().map(|s| s.key.as_str()).collect();
    let pairs: HashMap<usize, usize> = match_pairs(&internal_keys, &external_keys)
        .into_iter()
        .collect();
    let matched_external: HashSet<usize> = pairs.values().copied().collect();

    let mut stories: Vec<Story> = internal
        .iter()
        .enumerate()
        .map(|(i, story)| match pairs.get(&i) {
            Some(&j) => {
                let theirs = &external[j];
                let mut merged = story.clone();
                merged.title.clone_from(&theirs.title);
                merged.acceptance.clone_from(&theirs.acceptance);
                merged.tags.clone_from(&theirs.tags);
                merged
            }
            None => story.clone(),
        })
        .collect();

    stories.extend(
        external
            .iter()
            .enumerate()
            .filter(|(j, _)| !matched_external.contains(j))
            .map(|(_, story)| story.clone()),
    );
    stories
}

struct Merger<'a> {
    classifications: &'a Classifications,
    resolver: &'a ConflictResolver,
    outcome: MergeOutcome,
}

impl Merger<'_> {
    /// Decide which copy of a paired artifact survives.
    fn pick(
        &mut self,
        subject: &ArtifactSubject,
        category: &ArtifactCategory,
        same_content: bool,
    ) -> Pick {
        let state = self.classifications.get(subject);
        let classification = state.map_or(ChangeClassification::New, |s| s.classification);

        match classification {
            ChangeClassification::Unchanged
            | ChangeClassification::ChangedLocal
            | ChangeClassification::Deleted => Pick::Internal,
            ChangeClassification::ChangedRemote => Pick::External,
            ChangeClassification::New if same_content => Pick::Internal,
            ChangeClassification::New | ChangeClassification::ChangedBoth => {
                let artifact_id = state.map_or_else(|| subject.to_string(), |s| s.artifact_id.clone());
                let record = self.resolver.record(
                    artifact_id,
                    category,
                    state.and_then(|s| s.local_hash.clone()),
                    state.and_then(|s| s.remote_hash.clone()),
                );
                debug!(
                    artifact_id = %record.artifact_id,
                    %classification,
                    resolution = %record.resolution,
                    "Conflict resolved"
                );
                let pick = match record.resolution {
                    Resolution::LocalWins => Pick::Internal,
                    Resolution::RemoteWins => Pick::External,
                    Resolution::Manual => Pick::Hold,
                };
                self.outcome.conflicts.push(record);
                pick
            }
        }
    }

    fn merge_features(&mut self, internal: &PlanDocument, external: &PlanDocument) -> Vec<Entry> {
        let pairs: HashMap<usize, usize> =
            match_pairs(&internal.feature_keys(), &external.feature_keys())
                .into_iter()
                .collect();
        let matched_external: HashSet<usize> = pairs.values().copied().collect();

        let mut entries = Vec::with_capacity(internal.features.len() + external.features.len());
        for (i, ours) in internal.features.iter().enumerate() {
            let feature = match pairs.get(&i) {
                None => ours.clone(),
                Some(&j) => {
                    let theirs = &external.features[j];
                    let subject = ArtifactSubject::Feature(ours.key.clone());
                    let same = ours.external_view() == theirs.external_view();
                    match self.pick(&subject, &ArtifactCategory::SPECIFICATION, same) {
                        Pick::Internal => ours.clone(),
                        Pick::External => adopt_external(ours, theirs),
                        Pick::Hold => {
                            self.outcome.manual.push(ManualHold {
                                internal: subject,
                                external: ArtifactSubject::Feature(theirs.key.clone()),
                            });
                            ours.clone()
                        }
                    }
                }
            };
            if feature != *ours {
                self.outcome.features_updated += 1;
            }
            entries.push(Entry {
                feature,
                source_key: ours.key.clone(),
                origin: Side::Internal,
            });
        }

        let mut taken: HashSet<String> = entries.iter().map(|e| e.feature.key.clone()).collect();
        for (j, theirs) in external.features.iter().enumerate() {
            if matched_external.contains(&j) {
                continue;
            }
            let mut feature = theirs.clone();
            let key = internal_key_for(&theirs.key);
            if !taken.contains(&key) {
                feature.key = key;
            }
            taken.insert(feature.key.clone());
            self.outcome.features_added += 1;
            entries.push(Entry {
                feature,
                source_key: theirs.key.clone(),
                origin: Side::External,
            });
        }

        entries
    }

    /// Collapse features that normalize to the same token.
    fn dedup(&mut self, entries: Vec<Entry>) -> Vec<Feature> {
        let mut groups: Vec<Vec<Entry>> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for entry in entries {
            let token = normalize(&entry.source_key).token;
            if token.is_empty() {
                groups.push(vec![entry]);
                continue;
            }
            if let Some(&idx) = group_of.get(&token) {
                groups[idx].push(entry);
            } else {
                group_of.insert(token, groups.len());
                groups.push(vec![entry]);
            }
        }

        let mut features = Vec::new();
        for group in groups {
            if group.len() == 1 {
                features.extend(group.into_iter().map(|e| e.feature));
                continue;
            }

            let numbered = group
                .iter()
                .any(|e| normalize(&e.source_key).had_numeric_prefix);
            if numbered {
                let mut iter = group.into_iter();
                if let Some(keeper) = iter.next() {
                    for dropped in iter {
                        debug!(
                            kept = %keeper.feature.key,
                            dropped = %dropped.source_key,
                            "Duplicate feature removed"
                        );
                        self.outcome.duplicates_removed += 1;
                        if dropped.origin == Side::External {
                            self.outcome.features_added =
                                self.outcome.features_added.saturating_sub(1);
                        }
                    }
                    features.push(keeper.feature);
                }
            } else {
                let keys: Vec<&str> = group.iter().map(|e| e.source_key.as_str()).collect();
                let token = normalize(keys[0]).token;
                let message = format!(
                    "normalization ambiguity: {} share normalized key '{token}' and were kept apart",
                    keys.join(", ")
                );
                warn!("{message}");
                self.outcome.warnings.push(message);
                features.extend(group.into_iter().map(|e| e.feature));
            }
        }
        features
    }

    fn merge_memory(&mut self, internal: &PlanDocument, external: &PlanDocument) {
        let names: BTreeSet<&String> = internal.memory.keys().chain(external.memory.keys()).collect();

        for name in names {
            let merged = match (internal.memory.get(name), external.memory.get(name)) {
                (Some(ours), None) => ours.clone(),
                (None, Some(theirs)) => theirs.clone(),
                (None, None) => continue,
                (Some(ours), Some(theirs)) => {
                    let subject = ArtifactSubject::Memory(name.clone());
                    let same = normalize_content(ours) == normalize_content(theirs);
                    match self.pick(&subject, &ArtifactCategory::MEMORY, same) {
                        Pick::Internal => ours.clone(),
                        Pick::External => theirs.clone(),
                        Pick::Hold => {
                            self.outcome.manual.push(ManualHold {
                                internal: subject.clone(),
                                external: subject,
                            });
                            ours.clone()
                        }
                    }
                }
            };
            self.outcome.plan.memory.insert(name.clone(), merged);
        }
    }
}

/// Merge two plans.
///
/// The header (idea, business, product) always comes from `internal`; the
/// external format cannot express it.
#[must_use]
pub fn merge(
    internal: &PlanDocument,
    external: &PlanDocument,
    classifications: &Classifications,
    resolver: &ConflictResolver,
) -> MergeOutcome {
    let mut merger = Merger {
        classifications,
        resolver,
        outcome: MergeOutcome {
            plan: internal.header(),
            ..MergeOutcome::default()
        },
    };

    let entries = merger.merge_features(internal, external);
    let features = merger.dedup(entries);
    merger.outcome.plan.features = features;
    merger.merge_memory(internal, external);

    debug!(
        features = merger.outcome.plan.features.len(),
        added = merger.outcome.features_added,
        updated = merger.outcome.features_updated,
        conflicts = merger.outcome.conflicts.len(),
        "Merge complete"
    );
    merger.outcome
}

/// Replace the internal features and memory with the external side's.
///
/// Used by overwrite mode: no detection, no resolution. External features
/// that pair with an internal one keep the internal key; the rest get an
/// internal key from [`internal_key_for`]. Internal-only features are
/// dropped. The header still comes from `internal`.
#[must_use]
pub fn replace_with_external(internal: &PlanDocument, external: &PlanDocument) -> MergeOutcome {
    let pairs: HashMap<usize, usize> =
        match_pairs(&external.feature_keys(), &internal.feature_keys())
            .into_iter()
            .collect();

    let mut outcome = MergeOutcome {
        plan: internal.header(),
        ..MergeOutcome::default()
    };
    let mut taken: HashSet<String> = HashSet::new();
    for (j, theirs) in external.features.iter().enumerate() {
        let mut feature = theirs.clone();
        if let Some(ours) = pairs.get(&j).map(|&i| &internal.features[i]) {
            feature.key.clone_from(&ours.key);
            if feature != *ours {
                outcome.features_updated += 1;
            }
        } else {
            let key = internal_key_for(&theirs.key);
            if !taken.contains(&key) {
                feature.key = key;
            }
            outcome.features_added += 1;
        }
        if !taken.insert(feature.key.clone()) {
            outcome.duplicates_removed += 1;
            continue;
        }
        outcome.plan.features.push(feature);
    }
    outcome.plan.memory.clone_from(&external.memory);

    debug!(
        features = outcome.plan.features.len(),
        added = outcome.features_added,
        updated = outcome.features_updated,
        "Overwrite plan built"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Idea;
    use crate::sync::resolve::PriorityTable;

    fn feature(key: &str, title: &str) -> Feature {
        Feature::new(key, title)
    }

    fn plan(features: Vec<Feature>) -> PlanDocument {
        PlanDocument {
            features,
            ..PlanDocument::default()
        }
    }

    fn state(classification: ChangeClassification) -> PairState {
        PairState {
            artifact_id: "features/FEATURE-AUTH.yaml".to_string(),
            classification,
            local_hash: Some("a".repeat(64)),
            remote_hash: Some("b".repeat(64)),
        }
    }

    fn classified(key: &str, classification: ChangeClassification) -> Classifications {
        let mut map = Classifications::new();
        map.insert(ArtifactSubject::Feature(key.to_string()), state(classification));
        map
    }

    fn auth_pair() -> (PlanDocument, PlanDocument) {
        let mut ours = feature("FEATURE-AUTH", "Auth");
        ours.confidence = 0.8;
        ours.acceptance = vec!["Old rule".to_string()];
        let mut story = Story::new("STORY-1", "Login");
        story.story_points = Some(3);
        ours.stories.push(story);

        let mut theirs = feature("001_auth", "Authentication");
        theirs.acceptance = vec!["Users log in with email".to_string()];
        let mut story = Story::new("STORY-1", "Log in");
        story.tags.insert("security".to_string());
        theirs.stories.push(story);
        theirs.stories.push(Story::new("STORY-2", "Log out"));

        (plan(vec![ours]), plan(vec![theirs]))
    }

    #[test]
    fn changed_remote_adopts_expressible_fields() {
        let (internal, external) = auth_pair();
        let outcome = merge(
            &internal,
            &external,
            &classified("FEATURE-AUTH", ChangeClassification::ChangedRemote),
            &ConflictResolver::default(),
        );

        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.features_updated, 1);
        assert_eq!(outcome.features_added, 0);
        let merged = outcome.plan.feature("FEATURE-AUTH").expect("kept internal key");
        assert_eq!(merged.title, "Authentication");
        assert_eq!(merged.acceptance, vec!["Users log in with email".to_string()]);
        assert!((merged.confidence - 0.8).abs() < f64::EPSILON);

        let login = merged.story("STORY-1").expect("story");
        assert_eq!(login.title, "Log in");
        assert_eq!(login.story_points, Some(3));
        assert!(login.tags.contains("security"));
        assert!(merged.story("STORY-2").is_some());
    }

    #[test]
    fn unchanged_and_changed_local_keep_internal() {
        let (internal, external) = auth_pair();
        for classification in [
            ChangeClassification::Unchanged,
            ChangeClassification::ChangedLocal,
        ] {
            let outcome = merge(
                &internal,
                &external,
                &classified("FEATURE-AUTH", classification),
                &ConflictResolver::default(),
            );
            assert_eq!(outcome.plan.features, internal.features);
            assert_eq!(outcome.features_updated, 0);
            assert!(outcome.conflicts.is_empty());
        }
    }

    #[test]
    fn changed_both_logs_conflict_even_when_local_wins() {
        let (internal, external) = auth_pair();
        let outcome = merge(
            &internal,
            &external,
            &classified("FEATURE-AUTH", ChangeClassification::ChangedBoth),
            &ConflictResolver::default(),
        );
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].resolution, Resolution::LocalWins);
        assert_eq!(outcome.conflicts[0].artifact_id, "features/FEATURE-AUTH.yaml");
        assert_eq!(outcome.plan.features, internal.features);
        assert!(outcome.manual.is_empty());
    }

    #[test]
    fn changed_both_without_rule_is_held() {
        let (internal, external) = auth_pair();
        let outcome = merge(
            &internal,
            &external,
            &classified("FEATURE-AUTH", ChangeClassification::ChangedBoth),
            &ConflictResolver::new(PriorityTable::empty()),
        );
        assert_eq!(outcome.manual_conflicts(), 1);
        assert_eq!(outcome.plan.features, internal.features);
        assert_eq!(
            outcome.manual,
            vec![ManualHold {
                internal: ArtifactSubject::Feature("FEATURE-AUTH".to_string()),
                external: ArtifactSubject::Feature("001_auth".to_string()),
            }]
        );
    }

    #[test]
    fn new_pair_with_equal_view_is_silent() {
        let mut ours = feature("FEATURE-AUTH", "Auth");
        ours.draft = true;
        let theirs = feature("001_auth", "Auth");
        let outcome = merge(
            &plan(vec![ours.clone()]),
            &plan(vec![theirs]),
            &Classifications::new(),
            &ConflictResolver::new(PriorityTable::empty()),
        );
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.plan.features, vec![ours]);
    }

    #[test]
    fn new_pair_with_different_content_is_resolved() {
        let (internal, external) = auth_pair();
        let mut table = PriorityTable::empty();
        table.set(ArtifactCategory::SPECIFICATION, Resolution::RemoteWins);
        let outcome = merge(
            &internal,
            &external,
            &Classifications::new(),
            &ConflictResolver::new(table),
        );
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].artifact_id, "feature:FEATURE-AUTH");
        assert_eq!(outcome.plan.features[0].title, "Authentication");
    }

    #[test]
    fn disjoint_plans_merge_into_union() {
        let internal = plan(vec![feature("FEATURE-AUTH", "Auth")]);
        let external = plan(vec![feature("002_billing", "Billing")]);
        let outcome = merge(
            &internal,
            &external,
            &Classifications::new(),
            &ConflictResolver::default(),
        );
        assert_eq!(outcome.features_added, 1);
        assert_eq!(
            outcome.plan.feature_keys(),
            vec!["FEATURE-AUTH", "FEATURE-BILLING"]
        );
        assert_eq!(outcome.plan.features[1].title, "Billing");
    }

    #[test]
    fn enforcement_keys_stay_apart() {
        let internal = plan(vec![feature("FEATURE-ENFORCEMENT", "Enforcement")]);
        let external = plan(vec![feature("FEATURE-ENFORCEMENTCONFIG", "Config")]);
        let outcome = merge(
            &internal,
            &external,
            &Classifications::new(),
            &ConflictResolver::default(),
        );
        assert_eq!(outcome.plan.features.len(), 2);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn numbered_duplicates_collapse() {
        let internal = plan(vec![feature("FEATURE-AUTH", "Auth")]);
        let external = plan(vec![
            feature("001_auth", "Auth"),
            feature("007_auth", "Auth again"),
        ]);
        let outcome = merge(
            &internal,
            &external,
            &Classifications::new(),
            &ConflictResolver::default(),
        );
        assert_eq!(outcome.plan.feature_keys(), vec!["FEATURE-AUTH"]);
        assert_eq!(outcome.duplicates_removed, 1);
        assert_eq!(outcome.features_added, 0);
    }

    #[test]
    fn unnumbered_same_token_is_ambiguous() {
        let internal = plan(vec![
            feature("FEATURE-AUTH", "Auth"),
            feature("auth", "Other auth"),
        ]);
        let outcome = merge(
            &internal,
            &PlanDocument::default(),
            &Classifications::new(),
            &ConflictResolver::default(),
        );
        assert_eq!(outcome.plan.features.len(), 2);
        assert_eq!(outcome.duplicates_removed, 0);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("normalization ambiguity"));
    }

    #[test]
    fn memory_follows_category_rules() {
        let mut internal = PlanDocument::default();
        internal
            .memory
            .insert("constitution".to_string(), "# Rules\n- old".to_string());
        internal
            .memory
            .insert("glossary".to_string(), "# Terms".to_string());
        let mut external = PlanDocument::default();
        external
            .memory
            .insert("constitution".to_string(), "# Rules\n- new".to_string());

        let mut classifications = Classifications::new();
        classifications.insert(
            ArtifactSubject::Memory("constitution".to_string()),
            state(ChangeClassification::ChangedBoth),
        );

        let outcome = merge(
            &internal,
            &external,
            &classifications,
            &ConflictResolver::default(),
        );
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].category, ArtifactCategory::MEMORY);
        assert_eq!(outcome.plan.memory["constitution"], "# Rules\n- new");
        assert_eq!(outcome.plan.memory["glossary"], "# Terms");
    }

    #[test]
    fn overwrite_replaces_features_and_memory() {
        let mut internal = plan(vec![
            feature("FEATURE-AUTH", "Auth"),
            feature("FEATURE-LEGACY", "Legacy"),
        ]);
        internal.idea = Some(Idea {
            title: "Keep me".to_string(),
            ..Idea::default()
        });
        internal
            .memory
            .insert("glossary".to_string(), "# Terms".to_string());
        let mut external = plan(vec![
            feature("001_auth", "Authentication"),
            feature("002_billing", "Billing"),
        ]);
        external
            .memory
            .insert("constitution".to_string(), "# Rules".to_string());

        let outcome = replace_with_external(&internal, &external);
        assert_eq!(
            outcome.plan.feature_keys(),
            vec!["FEATURE-AUTH", "FEATURE-BILLING"]
        );
        assert_eq!(outcome.plan.features[0].title, "Authentication");
        assert_eq!(outcome.features_updated, 1);
        assert_eq!(outcome.features_added, 1);
        assert_eq!(
            outcome.plan.idea.as_ref().map(|idea| idea.title.as_str()),
            Some("Keep me")
        );
        assert!(outcome.plan.memory.contains_key("constitution"));
        assert!(!outcome.plan.memory.contains_key("glossary"));
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn header_comes_from_internal() {
        let mut internal = PlanDocument::default();
        internal.product.themes = vec!["Reliability".to_string()];
        let mut external = PlanDocument::default();
        external.product.themes = vec!["Speed".to_string()];
        let outcome = merge(
            &internal,
            &external,
            &Classifications::new(),
            &ConflictResolver::default(),
        );
        assert_eq!(outcome.plan.product.themes, vec!["Reliability".to_string()]);
    }
}
