//! Sync orchestration for `specsync`.
//!
//! One [`SyncEngine::sync`] call runs a full cycle:
//! - Read both sides into canonical documents
//! - Pair artifacts across sides and classify each pair against the
//!   fingerprint store
//! - Merge (or, in overwrite mode, replace) into a reconciled plan
//! - Write back per artifact and refresh fingerprints
//! - Report
//!
//! The engine never reads the environment. Run mode, options and the
//! priority table are passed in by the caller.

pub mod detect;
pub mod fingerprint;
pub mod merge;
pub mod resolve;
pub mod watch;

pub use fingerprint::{FingerprintStore, FingerprintUpdate, StoredPair};
pub use merge::{Classifications, ManualHold, MergeOutcome, PairState};
pub use resolve::{ConflictResolver, PriorityTable};
pub use watch::{CancellationToken, PollingWatcher, Trigger, WatchConfig, WatchSummary, run_watch};

use crate::adapter::{Adapter, WriteFailure, WriteReport};
use crate::compare::{Deviation, compare};
use crate::error::{Result, SyncError};
use crate::model::{
    ArtifactRef, ArtifactSubject, ChangeClassification, ConflictRecord, PlanDocument, Side,
};
use crate::util::key::match_pairs;
use crate::util::progress::ProgressTracker;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, trace, warn};

/// How the engine talks to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Progress spinner on stderr.
    #[default]
    Interactive,
    /// No progress output.
    Ci,
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Reading,
    Classifying,
    Resolving,
    Merging,
    WritingBack,
    Reporting,
    /// The last cycle stopped on an error.
    Failed,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Classifying => "classifying",
            Self::Resolving => "resolving",
            Self::Merging => "merging",
            Self::WritingBack => "writing_back",
            Self::Reporting => "reporting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-cycle options.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Also write the reconciled plan back to the external side.
    pub bidirectional: bool,
    /// Replace internal features and memory with the external side's.
    pub overwrite: bool,
    /// Compare the pre-merge internal plan against the external plan.
    pub compare: bool,
}

/// Which way data flowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ExternalToInternal,
    Bidirectional,
}

/// Artifact counts per side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideCounts {
    pub internal: usize,
    pub external: usize,
}

/// Number of pairs per classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationCounts {
    pub unchanged: usize,
    pub changed_local: usize,
    pub changed_remote: usize,
    pub changed_both: usize,
    pub new: usize,
    pub deleted: usize,
}

impl ClassificationCounts {
    fn add(&mut self, classification: ChangeClassification) {
        match classification {
            ChangeClassification::Unchanged => self.unchanged += 1,
            ChangeClassification::ChangedLocal => self.changed_local += 1,
            ChangeClassification::ChangedRemote => self.changed_remote += 1,
            ChangeClassification::ChangedBoth => self.changed_both += 1,
            ChangeClassification::New => self.new += 1,
            ChangeClassification::Deleted => self.deleted += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.unchanged
            + self.changed_local
            + self.changed_remote
            + self.changed_both
            + self.new
            + self.deleted
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub direction: SyncDirection,
    pub mode: RunMode,
    pub overwrite: bool,
    pub artifacts_read: SideCounts,
    pub classifications: ClassificationCounts,
    pub conflicts: Vec<ConflictRecord>,
    /// Pairs left at their pre-cycle state for a human to decide.
    pub manual: Vec<ManualHold>,
    pub features_added: usize,
    pub features_updated: usize,
    pub features_removed: usize,
    pub duplicates_removed: usize,
    pub warnings: Vec<String>,
    pub artifacts_written: Vec<ArtifactRef>,
    pub artifacts_unchanged: usize,
    pub fingerprints_updated: usize,
    /// Present when comparison was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviations: Option<Vec<Deviation>>,
}

impl SyncReport {
    /// Conflicts nobody won.
    #[must_use]
    pub fn manual_conflicts(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_manual()).count()
    }

    /// True if the cycle changed any file.
    #[must_use]
    pub fn wrote_anything(&self) -> bool {
        !self.artifacts_written.is_empty() || self.features_removed > 0
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} written, {} added, {} updated, {} conflict(s) ({} manual)",
            self.artifacts_written.len(),
            self.features_added,
            self.features_updated,
            self.conflicts.len(),
            self.manual_conflicts()
        )
    }
}

/// Classification of one artifact pair, without writing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairStatus {
    pub subject: ArtifactSubject,
    pub internal_id: Option<String>,
    pub external_id: Option<String>,
    pub classification: ChangeClassification,
}

/// Read-only status of every pair.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub pairs: Vec<PairStatus>,
    pub counts: ClassificationCounts,
}

/// One artifact pair across sides. Either side may be absent.
#[derive(Debug, Clone)]
struct ArtifactPair {
    internal: Option<ArtifactRef>,
    external: Option<ArtifactRef>,
}

impl ArtifactPair {
    fn subject(&self) -> Option<&ArtifactSubject> {
        self.internal
            .as_ref()
            .or(self.external.as_ref())
            .map(|a| &a.subject)
    }
}

/// Pair features by key matching and memory documents by name.
fn pair_artifacts(internal: &[ArtifactRef], external: &[ArtifactRef]) -> Vec<ArtifactPair> {
    let features = |refs: &'_ [ArtifactRef]| -> Vec<ArtifactRef> {
        refs.iter().filter(|a| a.subject.is_feature()).cloned().collect()
    };
    let ours = features(internal);
    let theirs = features(external);
    let our_keys: Vec<&str> = ours.iter().map(|a| a.subject.name()).collect();
    let their_keys: Vec<&str> = theirs.iter().map(|a| a.subject.name()).collect();
    let matched: HashMap<usize, usize> = match_pairs(&our_keys, &their_keys).into_iter().collect();
    let matched_theirs: HashSet<usize> = matched.values().copied().collect();

    let mut pairs: Vec<ArtifactPair> = ours
        .iter()
        .enumerate()
        .map(|(i, a)| ArtifactPair {
            internal: Some(a.clone()),
            external: matched.get(&i).map(|&j| theirs[j].clone()),
        })
        .collect();
    pairs.extend(
        theirs
            .iter()
            .enumerate()
            .filter(|(j, _)| !matched_theirs.contains(j))
            .map(|(_, a)| ArtifactPair {
                internal: None,
                external: Some(a.clone()),
            }),
    );

    let memory = |refs: &'_ [ArtifactRef]| -> BTreeMap<String, ArtifactRef> {
        refs.iter()
            .filter(|a| !a.subject.is_feature())
            .map(|a| (a.subject.name().to_string(), a.clone()))
            .collect()
    };
    let mut ours = memory(internal);
    let mut theirs = memory(external);
    let names: BTreeSet<String> = ours.keys().chain(theirs.keys()).cloned().collect();
    for name in names {
        pairs.push(ArtifactPair {
            internal: ours.remove(&name),
            external: theirs.remove(&name),
        });
    }
    pairs
}

/// Latest known refs for a side after its write.
fn final_refs(read: &[ArtifactRef], report: Option<&WriteReport>) -> Vec<ArtifactRef> {
    let mut by_id: BTreeMap<String, ArtifactRef> =
        read.iter().map(|a| (a.id.clone(), a.clone())).collect();
    if let Some(report) = report {
        for id in &report.removed {
            by_id.remove(id);
        }
        for artifact in &report.written {
            by_id.insert(artifact.id.clone(), artifact.clone());
        }
    }
    by_id.into_values().collect()
}

fn write_error(side: Side, failure: &WriteFailure) -> SyncError {
    SyncError::AdapterWrite {
        side,
        artifact_id: failure.artifact_id.clone(),
        reason: failure.message.clone(),
    }
}

/// Fail if any artifact changed on disk since it was read.
fn ensure_unchanged<A: Adapter>(adapter: &A, side: Side, read: &[ArtifactRef]) -> Result<()> {
    for artifact in read {
        let current = adapter.fingerprint(&artifact.id)?;
        if current.as_deref() != Some(artifact.content_hash.as_str()) {
            return Err(SyncError::AdapterWrite {
                side,
                artifact_id: artifact.id.clone(),
                reason: "changed on disk during the sync cycle; re-run to pick up the edit"
                    .to_string(),
            });
        }
    }
    Ok(())
}

/// Copy of the reconciled plan with held pairs set back to the external
/// copy, so writing it leaves the external side's edits alone.
fn external_bound(outcome: &MergeOutcome, external: &PlanDocument) -> PlanDocument {
    let mut doc = outcome.plan.clone();
    for hold in &outcome.manual {
        match (&hold.internal, &hold.external) {
            (ArtifactSubject::Feature(ours), ArtifactSubject::Feature(theirs)) => {
                let slot = doc.features.iter_mut().find(|f| &f.key == ours);
                if let (Some(slot), Some(theirs)) = (slot, external.feature(theirs)) {
                    *slot = merge::adopt_external(slot, theirs);
                }
            }
            (ArtifactSubject::Memory(name), _) => {
                if let Some(text) = external.memory.get(name) {
                    doc.memory.insert(name.clone(), text.clone());
                }
            }
            (ArtifactSubject::Feature(_), ArtifactSubject::Memory(_)) => {}
        }
    }
    doc
}

/// Fingerprint rows for the final state of every pair.
///
/// Held pairs are skipped so they come back as conflicts next cycle. With
/// `only`, rows are limited to those artifact ids (the ones actually
/// written before a failure).
fn fingerprint_updates(
    pairs: &[ArtifactPair],
    manual: &[ManualHold],
    only: Option<&HashSet<(Side, String)>>,
) -> Vec<FingerprintUpdate> {
    let held_internal: HashSet<&ArtifactSubject> = manual.iter().map(|h| &h.internal).collect();
    let held_external: HashSet<&ArtifactSubject> = manual.iter().map(|h| &h.external).collect();
    let allowed = |side: Side, id: &str| only.is_none_or(|set| set.contains(&(side, id.to_string())));

    let mut updates = Vec::new();
    for pair in pairs {
        let held = pair
            .internal
            .as_ref()
            .is_some_and(|a| held_internal.contains(&a.subject))
            || pair
                .external
                .as_ref()
                .is_some_and(|a| held_external.contains(&a.subject));
        if held {
            continue;
        }
        let internal_id = pair.internal.as_ref().map(|a| a.id.clone());
        let external_id = pair.external.as_ref().map(|a| a.id.clone());
        if let Some(a) = &pair.internal {
            if allowed(Side::Internal, &a.id) {
                updates.push(FingerprintUpdate {
                    side: Side::Internal,
                    artifact_id: a.id.clone(),
                    content_hash: a.content_hash.clone(),
                    partner_id: external_id.clone(),
                });
            }
        }
        if let Some(a) = &pair.external {
            if allowed(Side::External, &a.id) {
                updates.push(FingerprintUpdate {
                    side: Side::External,
                    artifact_id: a.id.clone(),
                    content_hash: a.content_hash.clone(),
                    partner_id: internal_id,
                });
            }
        }
    }
    updates
}

/// Runs sync cycles between one internal and one external adapter.
pub struct SyncEngine<I: Adapter, E: Adapter> {
    internal: I,
    external: E,
    store: FingerprintStore,
    resolver: ConflictResolver,
    mode: RunMode,
    cancel: CancellationToken,
    state: SyncState,
}

impl<I: Adapter, E: Adapter> SyncEngine<I, E> {
    #[must_use]
    pub fn new(
        internal: I,
        external: E,
        store: FingerprintStore,
        resolver: ConflictResolver,
        mode: RunMode,
    ) -> Self {
        Self {
            internal,
            external,
            store,
            resolver,
            mode,
            cancel: CancellationToken::new(),
            state: SyncState::Idle,
        }
    }

    /// Share a cancellation token with a watch loop or signal handler.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub const fn store(&self) -> &FingerprintStore {
        &self.store
    }

    fn transition(&mut self, next: SyncState) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                state: next.to_string(),
            });
        }
        trace!(from = %self.state, to = %next, "Sync state");
        self.state = next;
        Ok(())
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.state = match &result {
            Ok(_) | Err(SyncError::Cancelled { .. }) => SyncState::Idle,
            Err(err) => {
                warn!(error = %err, "Sync cycle failed");
                SyncState::Failed
            }
        };
        result
    }

    fn classify_pairs(&self, pairs: &[ArtifactPair]) -> Result<Vec<ChangeClassification>> {
        pairs
            .iter()
            .map(|pair| {
                let local = pair.internal.as_ref();
                let remote = pair.external.as_ref();
                let stored = self
                    .store
                    .pair(local.map(|a| a.id.as_str()), remote.map(|a| a.id.as_str()))?;
                let classification = detect::classify(
                    local.map(|a| a.content_hash.as_str()),
                    remote.map(|a| a.content_hash.as_str()),
                    &stored,
                );
                trace!(
                    internal = ?local.map(|a| &a.id),
                    external = ?remote.map(|a| &a.id),
                    %classification,
                    "Classified pair"
                );
                Ok(classification)
            })
            .collect()
    }

    /// Run one full cycle.
    ///
    /// # Errors
    ///
    /// - `AdapterRead` if either side cannot be read; nothing is written
    /// - `AdapterWrite` if a write fails; earlier artifacts keep their
    ///   updates and fingerprints
    /// - `Cancelled` if the token fires between states
    /// - `Database` if the fingerprint store fails
    pub fn sync(&mut self, options: &SyncOptions) -> Result<SyncReport> {
        let progress = ProgressTracker::spinner("Syncing", self.mode == RunMode::Interactive);
        let result = self.run(options, &progress);
        progress.finish_and_clear();
        self.finish(result)
    }

    fn run(&mut self, options: &SyncOptions, progress: &ProgressTracker) -> Result<SyncReport> {
        self.transition(SyncState::Reading)?;
        progress.set_message("Reading plan and spec artifacts");
        let internal = self.internal.read()?;
        let external = self.external.read()?;

        self.transition(SyncState::Classifying)?;
        progress.set_message("Classifying changes");
        let pairs = pair_artifacts(&internal.artifacts, &external.artifacts);
        let classified = if options.overwrite {
            Vec::new()
        } else {
            self.classify_pairs(&pairs)?
        };
        let mut counts = ClassificationCounts::default();
        let mut classifications = Classifications::new();
        for (pair, &classification) in pairs.iter().zip(&classified) {
            counts.add(classification);
            if let (Some(ours), Some(theirs)) = (&pair.internal, &pair.external) {
                classifications.insert(
                    ours.subject.clone(),
                    PairState {
                        artifact_id: ours.id.clone(),
                        classification,
                        local_hash: Some(ours.content_hash.clone()),
                        remote_hash: Some(theirs.content_hash.clone()),
                    },
                );
            }
        }

        self.transition(SyncState::Resolving)?;
        let contested = classifications
            .values()
            .filter(|s| {
                matches!(
                    s.classification,
                    ChangeClassification::ChangedBoth | ChangeClassification::New
                )
            })
            .count();
        debug!(contested, "Pairs needing resolution");

        self.transition(SyncState::Merging)?;
        progress.set_message("Merging");
        let outcome = if options.overwrite {
            merge::replace_with_external(&internal.plan, &external.plan)
        } else {
            merge::merge(&internal.plan, &external.plan, &classifications, &self.resolver)
        };
        let deviations = options
            .compare
            .then(|| compare(&internal.plan, &external.plan));

        self.transition(SyncState::WritingBack)?;
        progress.set_message("Writing artifacts");
        ensure_unchanged(&self.internal, Side::Internal, &internal.artifacts)?;
        let internal_report = self.internal.write(&outcome.plan);
        let mut error = internal_report
            .failure
            .as_ref()
            .map(|f| write_error(Side::Internal, f));

        let write_external = options.bidirectional && !options.overwrite;
        let mut external_report = None;
        if error.is_none() && write_external {
            match ensure_unchanged(&self.external, Side::External, &external.artifacts) {
                Ok(()) => {
                    let report = self.external.write(&external_bound(&outcome, &external.plan));
                    error = report.failure.as_ref().map(|f| write_error(Side::External, f));
                    external_report = Some(report);
                }
                Err(err) => error = Some(err),
            }
        }

        let final_pairs = pair_artifacts(
            &final_refs(&internal.artifacts, Some(&internal_report)),
            &final_refs(&external.artifacts, external_report.as_ref()),
        );
        let written: Vec<ArtifactRef> = internal_report
            .written
            .iter()
            .chain(external_report.iter().flat_map(|r| r.written.iter()))
            .cloned()
            .collect();
        let written_ids: Option<HashSet<(Side, String)>> = error
            .as_ref()
            .map(|_| written.iter().map(|a| (a.side, a.id.clone())).collect());
        let updates = fingerprint_updates(&final_pairs, &outcome.manual, written_ids.as_ref());
        let fingerprints_updated = self.store.record_batch(&updates, Utc::now())?;

        if let Some(err) = error {
            return Err(err);
        }

        self.transition(SyncState::Reporting)?;
        let report = SyncReport {
            direction: if write_external {
                SyncDirection::Bidirectional
            } else {
                SyncDirection::ExternalToInternal
            },
            mode: self.mode,
            overwrite: options.overwrite,
            artifacts_read: SideCounts {
                internal: internal.artifacts.len(),
                external: external.artifacts.len(),
            },
            classifications: counts,
            conflicts: outcome.conflicts,
            manual: outcome.manual,
            features_added: outcome.features_added,
            features_updated: outcome.features_updated,
            features_removed: internal_report.removed.len(),
            duplicates_removed: outcome.duplicates_removed,
            warnings: outcome.warnings,
            artifacts_written: written,
            artifacts_unchanged: internal_report.unchanged
                + external_report.as_ref().map_or(0, |r| r.unchanged),
            fingerprints_updated,
            deviations,
        };

        info!(
            written = report.artifacts_written.len(),
            added = report.features_added,
            updated = report.features_updated,
            conflicts = report.conflicts.len(),
            manual = report.manual_conflicts(),
            "Sync cycle complete"
        );
        Ok(report)
    }

    /// Read both sides and classify every pair. Writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `AdapterRead`, `Database` or `Cancelled`.
    pub fn status(&mut self) -> Result<StatusReport> {
        let result = self.run_status();
        self.finish(result)
    }

    fn run_status(&mut self) -> Result<StatusReport> {
        self.transition(SyncState::Reading)?;
        let internal = self.internal.read()?;
        let external = self.external.read()?;

        self.transition(SyncState::Classifying)?;
        let pairs = pair_artifacts(&internal.artifacts, &external.artifacts);
        let classified = self.classify_pairs(&pairs)?;

        let mut counts = ClassificationCounts::default();
        let mut statuses = Vec::with_capacity(pairs.len());
        for (pair, classification) in pairs.iter().zip(classified) {
            counts.add(classification);
            let Some(subject) = pair.subject() else {
                continue;
            };
            statuses.push(PairStatus {
                subject: subject.clone(),
                internal_id: pair.internal.as_ref().map(|a| a.id.clone()),
                external_id: pair.external.as_ref().map(|a| a.id.clone()),
                classification,
            });
        }
        Ok(StatusReport {
            pairs: statuses,
            counts,
        })
    }
}
