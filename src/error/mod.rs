//! Error types and handling for `specsync`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration for wrapped collaborator errors
//! - Provides recovery hints for user-facing errors
//! - Maps every error to a stable exit code for the CLI

mod structured;

pub use structured::{ErrorCode, StructuredError};

use crate::model::Side;
use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `specsync` operations.
#[derive(Error, Debug)]
pub enum SyncError {
    // === Adapter Errors ===
    /// Reading one side failed (I/O or parse). Aborts the cycle.
    #[error("Failed to read {side} side at '{path}': {reason}")]
    AdapterRead {
        side: Side,
        path: PathBuf,
        reason: String,
    },

    /// Writing one artifact back failed. Earlier artifacts keep their updates.
    #[error("Failed to write {side} artifact '{artifact_id}': {reason}")]
    AdapterWrite {
        side: Side,
        artifact_id: String,
        reason: String,
    },

    // === Cycle Errors ===
    /// Cancellation was honored at a state transition.
    #[error("Sync cancelled before entering state {state}")]
    Cancelled { state: String },

    /// The cycle finished with conflicts that need a human decision.
    #[error("{count} conflict(s) require manual resolution")]
    UnresolvedConflicts { count: usize },

    /// Drift between plans exceeded the enforcement policy.
    #[error("{count} deviation(s) blocked by the '{policy}' enforcement policy")]
    PolicyViolation { count: usize, policy: String },

    // === Configuration Errors ===
    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No plan bundle or spec tree found where one was required.
    #[error("Nothing to sync at '{path}'")]
    NotInitialized { path: PathBuf },

    // === Fingerprint Store Errors ===
    /// `SQLite` error from the fingerprint store.
    #[error("Fingerprint store error: {0}")]
    Database(#[from] rusqlite::Error),

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::UnresolvedConflicts { .. } => Some(
                "Edit one side so both agree, add a sync.priority rule for the category, or re-run with --overwrite",
            ),
            Self::PolicyViolation { .. } => {
                Some("Inspect the deviation report or relax the policy with --policy")
            }
            Self::NotInitialized { .. } => {
                Some("Create .specfact/plan or a specs/ directory before syncing")
            }
            Self::AdapterWrite { .. } => {
                Some("Fix the file permissions and re-run; written artifacts are kept")
            }
            _ => None,
        }
    }

    /// Build an adapter read error from any displayable cause.
    #[must_use]
    pub fn read(side: Side, path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::AdapterRead {
            side,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Get the exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        ErrorCode::from_error(self).exit_code()
    }
}

/// Result type using `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;
