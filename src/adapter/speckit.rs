//! Spec-tool markdown adapter.
//!
//! Layout under the external root:
//!
//! ```text
//! specs/
//!   001_auth.md            one feature per numbered file, or
//!   002-billing/spec.md    one feature per numbered directory
//! .specify/memory/<name>.md
//! ```
//!
//! The feature key is the file stem (or directory name). New features are
//! written as `specs/<NNN>_<TOKEN>.md` with the next free sequence number.
//! This adapter never deletes files.

use super::markdown::{parse_feature, render_feature, round_trips};
use super::plan::sorted_files;
use super::{Adapter, WriteReport, sanitize_file_stem};
use crate::error::{Result, SyncError};
use crate::model::{
    ArtifactCategory, ArtifactRef, ArtifactSubject, DocumentSet, Feature, PlanDocument, Side,
};
use crate::util::key::{match_pairs, normalize};
use crate::util::{content_hash, normalize_content, relative_id, write_atomic};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

pub const SPECS_DIR: &str = "specs";
pub const SPEC_FILE: &str = "spec.md";
pub const MEMORY_DIR: &str = ".specify/memory";

/// A feature file found on disk.
#[derive(Debug, Clone)]
struct SpecFile {
    key: String,
    path: PathBuf,
}

/// One parsed feature file.
struct Parsed {
    artifact: ArtifactRef,
    feature: Feature,
}

/// Reads and writes a spec-tool markdown tree.
#[derive(Debug, Clone)]
pub struct SpecKitAdapter {
    root: PathBuf,
    read_workers: usize,
}

impl SpecKitAdapter {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            read_workers: 4,
        }
    }

    /// Bound the number of threads parsing feature files.
    #[must_use]
    pub fn with_read_workers(mut self, workers: usize) -> Self {
        self.read_workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if a `specs/` directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.root.join(SPECS_DIR).is_dir()
    }

    fn specs_dir(&self) -> PathBuf {
        self.root.join(SPECS_DIR)
    }

    fn memory_dir(&self) -> PathBuf {
        self.root.join(MEMORY_DIR)
    }

    /// Feature files, sorted by path.
    fn scan(&self) -> Result<Vec<SpecFile>> {
        let dir = self.specs_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(2) {
            let entry = entry.map_err(|e| SyncError::read(Side::External, &dir, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                continue;
            }

            let key = if entry.depth() == 1 {
                let is_md = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("md"));
                if !is_md || name.eq_ignore_ascii_case("README.md") {
                    continue;
                }
                path.file_stem().map(|s| s.to_string_lossy().into_owned())
            } else if name == SPEC_FILE {
                path.parent()
                    .and_then(Path::file_name)
                    .map(|s| s.to_string_lossy().into_owned())
            } else {
                None
            };

            if let Some(key) = key {
                files.push(SpecFile {
                    key,
                    path: path.to_path_buf(),
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn parse_one(&self, file: &SpecFile) -> Result<Parsed> {
        let text = fs::read_to_string(&file.path)
            .map_err(|e| SyncError::read(Side::External, &file.path, e))?;
        trace!(path = %file.path.display(), key = %file.key, "Read spec");
        Ok(Parsed {
            artifact: ArtifactRef {
                id: relative_id(&self.root, &file.path),
                side: Side::External,
                category: ArtifactCategory::SPECIFICATION,
                subject: ArtifactSubject::Feature(file.key.clone()),
                content_hash: content_hash(&text),
            },
            feature: parse_feature(&file.key, &text),
        })
    }

    /// Parse files on a bounded pool of scoped threads, preserving order.
    fn parse_all(&self, files: &[SpecFile]) -> Result<Vec<Parsed>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.read_workers.min(files.len());
        let chunk_size = files.len().div_ceil(workers);

        let chunks: Vec<Result<Vec<Parsed>>> = thread::scope(|scope| {
            let handles: Vec<_> = files
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|file| self.parse_one(file))
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(SyncError::read(
                            Side::External,
                            self.specs_dir(),
                            "reader thread panicked",
                        ))
                    })
                })
                .collect()
        });

        let mut parsed = Vec::with_capacity(files.len());
        for chunk in chunks {
            parsed.extend(chunk?);
        }
        Ok(parsed)
    }

    fn read_memory(&self, set: &mut DocumentSet) -> Result<()> {
        for path in sorted_files(&self.memory_dir(), "md", Side::External)? {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let text = fs::read_to_string(&path)
                .map_err(|e| SyncError::read(Side::External, &path, e))?;
            set.artifacts.push(ArtifactRef {
                id: relative_id(&self.root, &path),
                side: Side::External,
                category: ArtifactCategory::MEMORY,
                subject: ArtifactSubject::Memory(name.clone()),
                content_hash: content_hash(&text),
            });
            set.plan.memory.insert(name, text);
        }
        Ok(())
    }

    /// Next free sequence number in `specs/`.
    fn next_sequence(existing: &[SpecFile]) -> u32 {
        existing
            .iter()
            .filter_map(|f| {
                let digits: String = f.key.chars().take_while(char::is_ascii_digit).collect();
                digits.parse::<u32>().ok()
            })
            .max()
            .map_or(1, |n| n.saturating_add(1))
    }

    fn new_file_stem(seq: u32, key: &str) -> String {
        let token = normalize(key).token;
        let name = if token.is_empty() {
            sanitize_file_stem(key)
        } else {
            token
        };
        format!("{seq:03}_{name}")
    }

    fn write_features(&self, plan: &PlanDocument, report: &mut WriteReport) -> bool {
        let existing = match self.scan() {
            Ok(files) => files,
            Err(err) => {
                report.fail(SPECS_DIR, err);
                return false;
            }
        };
        let plan_keys = plan.feature_keys();
        let existing_keys: Vec<&str> = existing.iter().map(|f| f.key.as_str()).collect();
        let pairs = match_pairs(&plan_keys, &existing_keys);
        let mut next_seq = Self::next_sequence(&existing);

        for (i, feature) in plan.features.iter().enumerate() {
            let target = pairs
                .iter()
                .find(|(p, _)| *p == i)
                .map(|&(_, e)| existing[e].clone());
            let rendered = render_feature(feature);

            let file = if let Some(file) = target {
                // Skip when the file already says the same thing, either as
                // parsed fields or as the exact text we would write.
                let unchanged = fs::read_to_string(&file.path).ok().is_some_and(|text| {
                    normalize_content(&text) == normalize_content(&rendered)
                        || parse_feature(&file.key, &text).external_view()
                            == feature.external_view()
                });
                if unchanged {
                    report.unchanged += 1;
                    continue;
                }
                file
            } else {
                let stem = Self::new_file_stem(next_seq, &feature.key);
                next_seq = next_seq.saturating_add(1);
                SpecFile {
                    path: self.specs_dir().join(format!("{stem}.md")),
                    key: stem,
                }
            };

            let id = relative_id(&self.root, &file.path);
            if !round_trips(feature) {
                warn!(
                    artifact_id = %id,
                    key = %feature.key,
                    "Feature text flattened to fit the markdown layout"
                );
            }
            if let Err(err) = write_atomic(&file.path, &rendered) {
                report.fail(id, err);
                return false;
            }
            debug!(artifact_id = %id, key = %feature.key, "Wrote spec");
            report.written.push(ArtifactRef {
                id,
                side: Side::External,
                category: ArtifactCategory::SPECIFICATION,
                subject: ArtifactSubject::Feature(file.key),
                content_hash: content_hash(&rendered),
            });
        }
        true
    }

    fn write_memory(&self, plan: &PlanDocument, report: &mut WriteReport) {
        for (name, text) in &plan.memory {
            let path = self.memory_dir().join(format!("{}.md", sanitize_file_stem(name)));
            let id = relative_id(&self.root, &path);
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
                side: Side::External,
                category: ArtifactCategory::MEMORY,
                subject: ArtifactSubject::Memory(name.clone()),
                content_hash: content_hash(text),
            });
        }
    }
}

impl Adapter for SpecKitAdapter {
    fn read(&self) -> Result<DocumentSet> {
        let files = self.scan()?;
        let parsed = self.parse_all(&files)?;

        let mut set = DocumentSet::default();
        for Parsed { artifact, feature } in parsed {
            set.artifacts.push(artifact);
            set.plan.features.push(feature);
        }
        self.read_memory(&mut set)?;

        debug!(
            root = %self.root.display(),
            features = set.plan.features.len(),
            memory = set.plan.memory.len(),
            workers = self.read_workers,
            "Read spec tree"
        );
        Ok(set)
    }

    fn write(&self, plan: &PlanDocument) -> WriteReport {
        let mut report = WriteReport::default();
        if self.write_features(plan, &mut report) {
            self.write_memory(plan, &mut report);
        }
        report
    }

    fn fingerprint(&self, artifact_id: &str) -> Result<Option<String>> {
        let path = self.root.join(artifact_id);
        if !path.is_file() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&path).map_err(|e| SyncError::read(Side::External, &path, e))?;
        Ok(Some(content_hash(&text)))
    }
}
