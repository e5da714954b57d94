//! Multi-cycle sync scenarios against real adapters on a temp directory.

mod common;

use common::{feature, read_file, seed_feature, write_file};
use specsync::adapter::{Adapter, PlanAdapter, SpecKitAdapter, WriteFailure, WriteReport};
use specsync::model::{DocumentSet, PlanDocument, Resolution, Side, Story};
use specsync::sync::{
    ConflictResolver, FingerprintStore, PriorityTable, RunMode, SyncEngine, SyncOptions, SyncState,
};
use specsync::util::content_hash;
use specsync::{Result, SyncError};
use std::path::Path;
use tempfile::TempDir;

fn bidirectional() -> SyncOptions {
    SyncOptions {
        bidirectional: true,
        ..SyncOptions::default()
    }
}

fn engine_with<E: Adapter>(root: &Path, external: E, table: PriorityTable) -> SyncEngine<PlanAdapter, E> {
    let store = FingerprintStore::open(&FingerprintStore::default_path(root)).expect("store");
    SyncEngine::new(
        PlanAdapter::new(root),
        external,
        store,
        ConflictResolver::new(table),
        RunMode::Ci,
    )
}

fn engine(root: &Path) -> SyncEngine<PlanAdapter, SpecKitAdapter> {
    engine_with(root, SpecKitAdapter::new(root), PriorityTable::default())
}

/// Reads through to the real tree but refuses every write.
struct ReadOnlySpecs(SpecKitAdapter);

impl Adapter for ReadOnlySpecs {
    fn read(&self) -> Result<DocumentSet> {
        self.0.read()
    }

    fn write(&self, _plan: &PlanDocument) -> WriteReport {
        WriteReport {
            failure: Some(WriteFailure {
                artifact_id: "specs/002_BILLING.md".to_string(),
                message: "permission denied".to_string(),
            }),
            ..WriteReport::default()
        }
    }

    fn fingerprint(&self, artifact_id: &str) -> Result<Option<String>> {
        self.0.fingerprint(artifact_id)
    }
}

#[test]
fn remote_edit_is_adopted_without_conflict() {
    let _log = common::test_log("remote_edit_is_adopted_without_conflict");
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    seed_feature(root, &feature("FEATURE-AUTH", "Auth", &["Passwords are hashed"]));
    write_file(
        root,
        "specs/001_auth.md",
        "# Feature: Auth\n\n## Acceptance Criteria\n\n- Passwords are hashed\n",
    );

    let baseline = engine(root).sync(&bidirectional()).expect("baseline");
    assert!(baseline.conflicts.is_empty());

    let edited = "# Feature: Auth v2\n\n## Acceptance Criteria\n\n- Passwords are hashed\n- Sessions expire\n";
    write_file(root, "specs/001_auth.md", edited);

    let mut engine = engine(root);
    let report = engine.sync(&bidirectional()).expect("sync");
    assert_eq!(report.classifications.changed_remote, 1);
    assert!(report.conflicts.is_empty());
    assert_eq!(report.features_updated, 1);

    let internal = read_file(root, ".specfact/plan/features/FEATURE-AUTH.yaml");
    assert!(internal.contains("Auth v2"));
    assert!(internal.contains("Sessions expire"));

    // The external file already held the winning content.
    assert_eq!(read_file(root, "specs/001_auth.md"), edited);
    let stored = engine
        .store()
        .get(Side::External, "specs/001_auth.md")
        .expect("lookup")
        .expect("fingerprint");
    assert_eq!(stored.content_hash, content_hash(edited));
}

#[test]
fn local_edit_reaches_the_spec_tool() {
    let _log = common::test_log("local_edit_reaches_the_spec_tool");
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    seed_feature(root, &feature("FEATURE-AUTH", "Auth", &[]));
    write_file(root, "specs/001_auth.md", "# Feature: Auth\n");
    engine(root).sync(&bidirectional()).expect("baseline");

    seed_feature(root, &feature("FEATURE-AUTH", "Auth", &["Tokens rotate daily"]));
    let report = engine(root).sync(&bidirectional()).expect("sync");
    assert_eq!(report.classifications.changed_local, 1);
    assert!(report.conflicts.is_empty());
    assert!(read_file(root, "specs/001_auth.md").contains("- Tokens rotate daily"));

    let again = engine(root).sync(&bidirectional()).expect("settled");
    assert_eq!(again.classifications.unchanged, 1);
    assert!(!again.wrote_anything());
}

#[test]
fn both_sides_changed_follow_the_priority_table() {
    let _log = common::test_log("both_sides_changed_follow_the_priority_table");
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    seed_feature(root, &feature("FEATURE-AUTH", "Auth", &[]));
    write_file(root, "specs/001_auth.md", "# Feature: Auth\n");
    engine(root).sync(&bidirectional()).expect("baseline");

    seed_feature(root, &feature("FEATURE-AUTH", "Auth (plan)", &[]));
    write_file(root, "specs/001_auth.md", "# Feature: Auth (spec)\n");

    let mut table = PriorityTable::default();
    table.set(specsync::model::ArtifactCategory::SPECIFICATION, Resolution::RemoteWins);
    let report = engine_with(root, SpecKitAdapter::new(root), table)
        .sync(&bidirectional())
        .expect("sync");
    assert_eq!(report.classifications.changed_both, 1);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].resolution, Resolution::RemoteWins);
    assert_eq!(report.manual_conflicts(), 0);
    assert!(read_file(root, ".specfact/plan/features/FEATURE-AUTH.yaml").contains("Auth (spec)"));
}

#[test]
fn text_markdown_cannot_hold_settles_after_one_write() {
    let _log = common::test_log("text_markdown_cannot_hold_settles_after_one_write");
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let mut auth = feature(
        "FEATURE-AUTH",
        "  Auth  ",
        &["Users log in\nwith email", "[ ] Draft criterion", ""],
    );
    auth.stories.push(Story::new("STORY:1", "Login"));
    seed_feature(root, &auth);

    let first = engine(root).sync(&bidirectional()).expect("first sync");
    assert!(first.conflicts.is_empty());
    assert!(
        first
            .artifacts_written
            .iter()
            .any(|a| a.id == "specs/001_AUTH.md")
    );
    let spec = read_file(root, "specs/001_AUTH.md");
    assert!(spec.contains("- Users log in with email"));

    for cycle in 2..=4 {
        let report = engine(root).sync(&bidirectional()).expect("sync");
        assert!(
            report.artifacts_written.is_empty(),
            "cycle {cycle} rewrote {:?}",
            report.artifacts_written
        );
        assert!(report.conflicts.is_empty());
        assert_eq!(report.features_updated, 0);
    }

    // The plan side keeps the original text.
    let internal = read_file(root, ".specfact/plan/features/FEATURE-AUTH.yaml");
    assert!(internal.contains("with email"));
    assert!(internal.contains("STORY:1"));
    assert_eq!(read_file(root, "specs/001_AUTH.md"), spec);
}

#[test]
fn memory_documents_flow_in_from_the_spec_tool() {
    let _log = common::test_log("memory_documents_flow_in_from_the_spec_tool");
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    write_file(root, "specs/001_auth.md", "# Feature: Auth\n");
    write_file(
        root,
        ".specify/memory/constitution.md",
        "# Constitution\n\nTests come first.\n",
    );

    let report = engine(root).sync(&SyncOptions::default()).expect("sync");
    assert_eq!(report.artifacts_read.external, 2);
    assert!(read_file(root, ".specfact/memory/constitution.md").contains("Tests come first."));
}

#[test]
fn failed_external_write_keeps_only_written_fingerprints() {
    let _log = common::test_log("failed_external_write_keeps_only_written_fingerprints");
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    seed_feature(root, &feature("FEATURE-BILLING", "Billing", &[]));
    write_file(root, "specs/001_auth.md", "# Feature: Auth\n");

    let mut failing = engine_with(
        root,
        ReadOnlySpecs(SpecKitAdapter::new(root)),
        PriorityTable::default(),
    );
    let err = failing.sync(&bidirectional()).expect_err("external write fails");
    assert!(matches!(
        err,
        SyncError::AdapterWrite {
            side: Side::External,
            ..
        }
    ));
    assert_eq!(failing.state(), SyncState::Failed);

    // The internal side was written and fingerprinted; the external side was not.
    assert!(root.join(".specfact/plan/features/FEATURE-AUTH.yaml").is_file());
    let store = failing.store();
    assert!(
        store
            .get(Side::Internal, "features/FEATURE-AUTH.yaml")
            .expect("lookup")
            .is_some()
    );
    assert!(
        store
            .get(Side::External, "specs/001_auth.md")
            .expect("lookup")
            .is_none()
    );
    drop(failing);

    let mut retry = engine(root);
    let report = retry.sync(&bidirectional()).expect("retry");
    assert_eq!(report.manual_conflicts(), 0);
    assert!(root.join("specs/002_BILLING.md").is_file());
    assert!(
        retry
            .store()
            .get(Side::External, "specs/001_auth.md")
            .expect("lookup")
            .is_some()
    );
}

#[test]
fn cancellation_between_cycles_leaves_engine_reusable() {
    let _log = common::test_log("cancellation_between_cycles_leaves_engine_reusable");
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    seed_feature(root, &feature("FEATURE-AUTH", "Auth", &[]));

    let token = specsync::sync::CancellationToken::new();
    let mut engine = engine(root).with_cancellation(token.clone());
    token.cancel();
    let err = engine.sync(&bidirectional()).expect_err("cancelled");
    assert!(matches!(err, SyncError::Cancelled { .. }));
    assert_eq!(engine.state(), SyncState::Idle);
    assert!(!root.join("specs").exists());
}
