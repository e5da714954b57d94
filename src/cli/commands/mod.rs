//! Command implementations.

pub mod compare;
pub mod status;
pub mod sync;
pub mod version;

use crate::adapter::{PlanAdapter, SpecKitAdapter};
use crate::cli::AdapterKind;
use crate::config::{self, CliOverrides, SyncConfig};
use crate::error::{Result, SyncError};
use crate::sync::{ConflictResolver, FingerprintStore, RunMode, SyncEngine};
use crate::util::progress::should_show_progress;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A repository ready to sync.
pub(crate) struct Workspace {
    pub root: PathBuf,
    pub config: SyncConfig,
}

impl Workspace {
    /// Load configuration for `root` and check there is something to sync.
    pub fn open(root: &Path, overrides: &CliOverrides) -> Result<Self> {
        let layer = config::load_config(root, overrides)?;
        let config = SyncConfig::from_layer(&layer)?;
        let workspace = Self {
            root: root.to_path_buf(),
            config,
        };
        let has_plan = PlanAdapter::new(root).exists();
        let has_specs = workspace.external_adapter(AdapterKind::Speckit).exists();
        if !has_plan && !has_specs {
            return Err(SyncError::NotInitialized {
                path: root.to_path_buf(),
            });
        }
        debug!(root = %root.display(), has_plan, has_specs, "Workspace opened");
        Ok(workspace)
    }

    pub fn external_root(&self) -> PathBuf {
        self.config.external_root_for(&self.root)
    }

    pub fn external_adapter(&self, kind: AdapterKind) -> SpecKitAdapter {
        match kind {
            AdapterKind::Speckit => SpecKitAdapter::new(&self.external_root())
                .with_read_workers(self.config.read_workers),
        }
    }

    /// Engine over this workspace with its persistent fingerprint store.
    pub fn engine(
        &self,
        kind: AdapterKind,
        mode: RunMode,
    ) -> Result<SyncEngine<PlanAdapter, SpecKitAdapter>> {
        let store = FingerprintStore::open(&FingerprintStore::default_path(&self.root))?;
        Ok(SyncEngine::new(
            PlanAdapter::new(&self.root),
            self.external_adapter(kind),
            store,
            ConflictResolver::new(self.config.priority.clone()),
            mode,
        ))
    }
}

/// Interactive only when asked and stderr is a terminal.
pub(crate) fn run_mode(ci: bool) -> RunMode {
    if ci || !should_show_progress() {
        RunMode::Ci
    } else {
        RunMode::Interactive
    }
}
