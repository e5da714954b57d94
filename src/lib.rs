//! `specsync`: bidirectional sync between a structured plan bundle and
//! spec-tool markdown.
//!
//! The internal side is a YAML plan under `.specfact/`; the external side is
//! a tree of numbered markdown specs plus shared memory documents. A sync
//! cycle detects which side changed since the last run using content
//! fingerprints, resolves conflicts per artifact category, merges the two
//! feature graphs across naming conventions, and writes the result back.

pub mod adapter;
pub mod cli;
pub mod compare;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod sync;
pub mod util;

pub use error::{ErrorCode, Result, StructuredError, SyncError};
