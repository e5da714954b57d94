//! Structured error output for scripted callers.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Sync outcome (exit codes 2-3) ===
    /// Manual conflicts remain after the cycle
    UnresolvedConflicts,
    /// Enforcement policy blocked on deviations
    PolicyViolation,

    // === Adapter Errors (exit code 4) ===
    /// Reading a side failed
    AdapterReadError,
    /// Writing an artifact failed
    AdapterWriteError,
    /// Nothing to sync at the given path
    NotInitialized,

    // === Cycle control (exit code 5) ===
    /// Cancelled at a state transition
    Cancelled,

    // === Fingerprint store (exit code 6) ===
    /// `SQLite` failure in the fingerprint store
    DatabaseError,

    // === Config Errors (exit code 7) ===
    /// Configuration error
    ConfigError,

    // === I/O Errors (exit code 8) ===
    /// File I/O error
    IoError,
    /// JSON serialization error
    JsonError,
    /// YAML parsing error
    YamlError,

    // === Internal Errors (exit code 1) ===
    /// Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Classify a `SyncError`.
    #[must_use]
    pub const fn from_error(err: &SyncError) -> Self {
        match err {
            SyncError::UnresolvedConflicts { .. } => Self::UnresolvedConflicts,
            SyncError::PolicyViolation { .. } => Self::PolicyViolation,
            SyncError::AdapterRead { .. } => Self::AdapterReadError,
            SyncError::AdapterWrite { .. } => Self::AdapterWriteError,
            SyncError::NotInitialized { .. } => Self::NotInitialized,
            SyncError::Cancelled { .. } => Self::Cancelled,
            SyncError::Database(_) => Self::DatabaseError,
            SyncError::Config(_) => Self::ConfigError,
            SyncError::Io(_) => Self::IoError,
            SyncError::Json(_) => Self::JsonError,
            SyncError::Yaml(_) => Self::YamlError,
            SyncError::Other(_) => Self::InternalError,
        }
    }

    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnresolvedConflicts => "UNRESOLVED_CONFLICTS",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::AdapterReadError => "ADAPTER_READ_ERROR",
            Self::AdapterWriteError => "ADAPTER_WRITE_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Cancelled => "CANCELLED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is potentially retryable.
    ///
    /// Write failures and cancelled cycles pick up where they stopped on the
    /// next run, because per-artifact fingerprints are only refreshed for
    /// artifacts that were actually written.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdapterWriteError | Self::Cancelled | Self::DatabaseError
        )
    }

    /// Get the exit code for this error category.
    ///
    /// - 1: Internal/unknown errors
    /// - 2: Unresolved manual conflicts
    /// - 3: Enforcement policy violation
    /// - 4: Adapter errors
    /// - 5: Cancellation
    /// - 6: Fingerprint store errors
    /// - 7: Config errors
    /// - 8: I/O errors
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::UnresolvedConflicts => 2,
            Self::PolicyViolation => 3,
            Self::AdapterReadError | Self::AdapterWriteError | Self::NotInitialized => 4,
            Self::Cancelled => 5,
            Self::DatabaseError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `SyncError`.
    #[must_use]
    pub fn from_error(err: &SyncError) -> Self {
        let code = ErrorCode::from_error(err);
        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion().map(ToString::to_string),
            retryable: code.is_retryable(),
            context: Self::extract_context(err),
        }
    }

    /// Convert to a JSON value for output.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }

        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }

    fn extract_context(err: &SyncError) -> Option<Value> {
        match err {
            SyncError::AdapterRead { side, path, .. } => Some(json!({
                "side": side.as_str(),
                "path": path.display().to_string(),
            })),
            SyncError::AdapterWrite {
                side, artifact_id, ..
            } => Some(json!({
                "side": side.as_str(),
                "artifact_id": artifact_id,
            })),
            SyncError::Cancelled { state } => Some(json!({ "state": state })),
            SyncError::UnresolvedConflicts { count } => Some(json!({ "conflicts": count })),
            SyncError::PolicyViolation { count, policy } => Some(json!({
                "blocked_deviations": count,
                "policy": policy,
            })),
            SyncError::NotInitialized { path } => {
                Some(json!({ "path": path.display().to_string() }))
            }
            _ => None,
        }
    }
}
