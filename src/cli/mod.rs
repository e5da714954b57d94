//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// Keep a structured plan bundle and spec-tool markdown in sync
#[derive(Parser, Debug)]
#[command(name = "ssync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs as JSON lines to this file
    #[arg(long, global = true, env = "SPECSYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the plan bundle with the spec tool's artifacts
    Sync(SyncArgs),

    /// Show how every artifact pair changed since the last sync (read-only)
    Status(StatusArgs),

    /// Compare two plan bundles and report deviations
    Compare(CompareArgs),

    /// Show version information
    Version,
}

/// External tool format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterKind {
    /// `specs/NNN_name.md` and `.specify/memory/`
    #[default]
    Speckit,
}

/// Arguments for the sync command.
#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncArgs {
    /// Repository root
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// External tool format
    #[arg(long, value_enum, default_value_t)]
    pub adapter: AdapterKind,

    /// Root of the external tool tree (default: the repository)
    #[arg(long)]
    pub external_root: Option<PathBuf>,

    /// Also write the reconciled plan back to the external side
    #[arg(long)]
    pub bidirectional: bool,

    /// Replace internal features and memory with the external side's
    ///
    /// Skips change detection and conflict resolution.
    #[arg(long, conflicts_with = "bidirectional")]
    pub overwrite: bool,

    /// Keep running: sync on an interval and whenever files change
    #[arg(long)]
    pub watch: bool,

    /// Seconds between watch cycles
    #[arg(long, requires = "watch")]
    pub interval: Option<u64>,

    /// Stop watching after this many cycles
    #[arg(long, requires = "watch", hide = true)]
    pub max_cycles: Option<usize>,

    /// Compare the internal plan against the external side before merging
    #[arg(long)]
    pub compare: bool,

    /// Enforcement policy for --compare: minimal, balanced, strict
    #[arg(long)]
    pub policy: Option<String>,

    /// Non-interactive mode: no progress output
    #[arg(long)]
    pub ci: bool,
}

/// Arguments for the status command.
#[derive(Args, Debug, Clone, Default)]
pub struct StatusArgs {
    /// Repository root
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// External tool format
    #[arg(long, value_enum, default_value_t)]
    pub adapter: AdapterKind,

    /// Root of the external tool tree (default: the repository)
    #[arg(long)]
    pub external_root: Option<PathBuf>,
}

/// Arguments for the compare command.
#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// Plan bundle directory maintained by hand
    pub manual: PathBuf,

    /// Plan bundle directory derived from the implementation
    pub auto: PathBuf,

    /// Enforcement policy: minimal, balanced, strict
    #[arg(long)]
    pub policy: Option<String>,
}
