//! Internal plan bundle adapter.
//!
//! Layout under a repository:
//!
//! ```text
//! .specfact/
//!   plan/
//!     plan.yaml              version, idea, business, product
//!     features/<KEY>.yaml    one feature per file
//!   memory/<name>.md         shared memory documents
//! ```
//!
//! `plan.yaml` is read and written but not tracked as an artifact; only
//! features and memory documents take part in change detection.

use super::{Adapter, WriteReport, sanitize_file_stem};
use crate::config::SPECFACT_DIR;
use crate::error::{Result, SyncError};
use crate::model::{
    ArtifactCategory, ArtifactRef, ArtifactSubject, DocumentSet, Feature, PlanDocument, Side,
};
use crate::util::{content_hash, normalize_content, relative_id, write_atomic};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub const PLAN_FILE: &str = "plan.yaml";
pub const FEATURES_DIR: &str = "features";
pub const MEMORY_DIR: &str = "memory";

/// Reads and writes the `.specfact` plan bundle.
#[derive(Debug, Clone)]
pub struct PlanAdapter {
    plan_dir: PathBuf,
    memory_dir: PathBuf,
}

impl PlanAdapter {
    /// Adapter for the bundle inside a repository.
    #[must_use]
    pub fn new(repo_root: &Path) -> Self {
        let specfact = repo_root.join(SPECFACT_DIR);
        Self {
            plan_dir: specfact.join("plan"),
            memory_dir: specfact.join(MEMORY_DIR),
        }
    }

    /// Adapter for a standalone bundle directory (`plan.yaml` + `features/`).
    #[must_use]
    pub fn at_bundle(bundle_dir: &Path) -> Self {
        Self {
            plan_dir: bundle_dir.to_path_buf(),
            memory_dir: bundle_dir.join(MEMORY_DIR),
        }
    }

    #[must_use]
    pub fn plan_dir(&self) -> &Path {
        &self.plan_dir
    }

    /// True if a bundle exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.plan_dir.join(PLAN_FILE).is_file() || self.plan_dir.join(FEATURES_DIR).is_dir()
    }

    fn features_dir(&self) -> PathBuf {
        self.plan_dir.join(FEATURES_DIR)
    }

    /// Filesystem path of an artifact id.
    fn path_for(&self, artifact_id: &str) -> PathBuf {
        artifact_id.strip_prefix("memory/").map_or_else(
            || self.plan_dir.join(artifact_id),
            |name| self.memory_dir.join(name),
        )
    }

    fn feature_id(key: &str) -> String {
        format!("{FEATURES_DIR}/{}.yaml", sanitize_file_stem(key))
    }

    fn memory_id(name: &str) -> String {
        format!("{MEMORY_DIR}/{}.md", sanitize_file_stem(name))
    }

    fn read_text(path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| SyncError::read(Side::Internal, path, e))
    }

    fn read_header(&self) -> Result<PlanDocument> {
        let path = self.plan_dir.join(PLAN_FILE);
        if !path.is_file() {
            return Ok(PlanDocument::default());
        }
        let text = Self::read_text(&path)?;
        if text.trim().is_empty() {
            return Ok(PlanDocument::default());
        }
        let doc: PlanDocument =
            serde_yaml::from_str(&text).map_err(|e| SyncError::read(Side::Internal, &path, e))?;
        Ok(doc.header())
    }

    fn read_features(&self, set: &mut DocumentSet) -> Result<()> {
        let dir = self.features_dir();
        for path in sorted_files(&dir, "yaml", Side::Internal)? {
            let text = Self::read_text(&path)?;
            let feature: Feature = serde_yaml::from_str(&text)
                .map_err(|e| SyncError::read(Side::Internal, &path, e))?;
            trace!(path = %path.display(), key = %feature.key, "Read feature");
            set.artifacts.push(ArtifactRef {
                id: relative_id(&self.plan_dir, &path),
                side: Side::Internal,
                category: ArtifactCategory::SPECIFICATION,
                subject: ArtifactSubject::Feature(feature.key.clone()),
                content_hash: content_hash(&text),
            });
            set.plan.features.push(feature);
        }
        Ok(())
    }

    fn read_memory(&self, set: &mut DocumentSet) -> Result<()> {
        for path in sorted_files(&self.memory_dir, "md", Side::Internal)? {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let text = Self::read_text(&path)?;
            set.artifacts.push(ArtifactRef {
                id: Self::memory_id(&name),
                side: Side::Internal,
                category: ArtifactCategory::MEMORY,
                subject: ArtifactSubject::Memory(name.clone()),
                content_hash: content_hash(&text),
            });
            set.plan.memory.insert(name, text);
        }
        Ok(())
    }

    fn write_header(&self, plan: &PlanDocument, report: &mut WriteReport) -> bool {
        let path = self.plan_dir.join(PLAN_FILE);
        let header = plan.header();
        if let Ok(existing) = self.read_header() {
            if existing == header && path.is_file() {
                return true;
            }
        }
        let yaml = match serde_yaml::to_string(&header) {
            Ok(yaml) => yaml,
            Err(err) => {
                report.fail(PLAN_FILE, err);
                return false;
            }
        };
        if let Err(err) = write_atomic(&path, &yaml) {
            report.fail(PLAN_FILE, err);
            return false;
        }
        true
    }

    fn write_features(&self, plan: &PlanDocument, report: &mut WriteReport) -> bool {
        let mut keep = HashSet::new();
        for feature in &plan.features {
            let id = Self::feature_id(&feature.key);
            let path = self.path_for(&id);
            keep.insert(id.clone());

            let existing = fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_yaml::from_str::<Feature>(&text).ok());
            if existing.as_ref() == Some(feature) {
                report.unchanged += 1;
                continue;
            }

            let yaml = match serde_yaml::to_string(feature) {
                Ok(yaml) => yaml,
                Err(err) => {
                    report.fail(id, err);
                    return false;
                }
            };
            if let Err(err) = write_atomic(&path, &yaml) {
                report.fail(id, err);
                return false;
            }
            debug!(artifact_id = %id, "Wrote feature");
            report.written.push(ArtifactRef {
                id,
                side: Side::Internal,
                category: ArtifactCategory::SPECIFICATION,
                subject: ArtifactSubject::Feature(feature.key.clone()),
                content_hash: content_hash(&yaml),
            });
        }

        // Files for features the plan no longer holds (collapsed duplicates).
        let Ok(existing) = sorted_files(&self.features_dir(), "yaml", Side::Internal) else {
            return true;
        };
        for path in existing {
            let id = relative_id(&self.plan_dir, &path);
            if keep.contains(&id) {
                continue;
            }
            if let Err(err) = fs::remove_file(&path) {
                report.fail(id, err);
                return false;
            }
            debug!(artifact_id = %id, "Removed feature file");
            report.removed.push(id);
        }
        true
    }

    fn write_memory(&self, plan: &PlanDocument, report: &mut WriteReport) {
        for (name, text) in &plan.memory {
            let id = Self::memory_id(name);
            let path = self.path_for(&id);
            let current = fs::read_to_string(&path).ok();
            if current.is_some_and(|c| normalize_content(&c) == normalize_content(text)) {
                report.unchanged += 1;
                continue;
            }
            if let Err(err) = write_atomic(&path, text) {
                report.fail(id, err);
                return;
            }
            debug!(artifact_id = %id, "Wrote memory document");
            report.written.push(ArtifactRef {
                id,
                side: Side::Internal,
                category: ArtifactCategory::MEMORY,
                subject: ArtifactSubject::Memory(name.clone()),
                content_hash: content_hash(text),
            });
        }
    }
}

impl Adapter for PlanAdapter {
    fn read(&self) -> Result<DocumentSet> {
        let mut set = DocumentSet {
            plan: self.read_header()?,
            artifacts: Vec::new(),
        };
        self.read_features(&mut set)?;
        self.read_memory(&mut set)?;
        debug!(
            dir = %self.plan_dir.display(),
            features = set.plan.features.len(),
            memory = set.plan.memory.len(),
            "Read plan bundle"
        );
        Ok(set)
    }

    fn write(&self, plan: &PlanDocument) -> WriteReport {
        let mut report = WriteReport::default();
        if self.write_header(plan, &mut report) && self.write_features(plan, &mut report) {
            self.write_memory(plan, &mut report);
        }
        report
    }

    fn fingerprint(&self, artifact_id: &str) -> Result<Option<String>> {
        let path = self.path_for(artifact_id);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(content_hash(&Self::read_text(&path)?)))
    }
}

/// Files with `extension` directly inside `dir`, sorted. Missing dir → empty.
pub(crate) fn sorted_files(dir: &Path, extension: &str, side: Side) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| SyncError::read(side, dir, e))?;
        let path = entry.path();
        let is_match = entry.file_type().is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if is_match && !hidden {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
