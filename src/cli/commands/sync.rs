//! Sync command implementation.

use super::{Workspace, run_mode};
use crate::adapter::Adapter;
use crate::cli::SyncArgs;
use crate::compare::{DeviationReport, EnforcementPolicy};
use crate::config::CliOverrides;
use crate::error::{Result, SyncError};
use crate::sync::{
    PollingWatcher, SyncDirection, SyncEngine, SyncOptions, SyncReport, WatchConfig, run_watch,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::mpsc;
use tracing::{info, warn};

#[derive(Serialize)]
struct SyncOutput<'a> {
    #[serde(flatten)]
    report: &'a SyncReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked: Option<usize>,
}

/// Execute the sync command.
///
/// # Errors
///
/// Returns `UnresolvedConflicts` when manual conflicts remain and
/// `PolicyViolation` when `--compare` finds deviations the policy blocks,
/// after printing the report. In watch mode the last completed cycle decides.
/// Adapter, store and config errors propagate.
pub fn execute(args: &SyncArgs, json: bool, quiet: bool) -> Result<()> {
    let overrides = CliOverrides {
        external_root: args.external_root.clone(),
        bidirectional: args.bidirectional.then_some(true),
        interval_secs: args.interval,
        policy: args.policy.clone(),
    };
    let workspace = Workspace::open(&args.path, &overrides)?;
    let options = SyncOptions {
        bidirectional: workspace.config.bidirectional,
        overwrite: args.overwrite,
        compare: args.compare,
    };
    let mut engine = workspace.engine(args.adapter, run_mode(args.ci))?;

    if args.watch {
        return watch(&workspace, &mut engine, &options, args, json, quiet);
    }

    let report = engine.sync(&options)?;
    let policy = &workspace.config.policy;
    if json {
        print_json(&report, policy, true)?;
    } else if !quiet {
        print!("{}", render_text(&report, &workspace.root, policy));
    }
    check_outcome(&report, policy)
}

fn watch<I: Adapter, E: Adapter>(
    workspace: &Workspace,
    engine: &mut SyncEngine<I, E>,
    options: &SyncOptions,
    args: &SyncArgs,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let cancel = engine.cancellation_token();
    let (sender, triggers) = mpsc::channel();

    let external_root = workspace.external_root();
    let roots = vec![
        workspace.root.join(".specfact").join("plan"),
        workspace.root.join(".specfact").join("memory"),
        external_root.join("specs"),
        external_root.join(".specify").join("memory"),
    ];
    let poller = PollingWatcher::new(roots).spawn(workspace.config.debounce, sender, cancel.clone());

    let config = WatchConfig {
        interval: workspace.config.interval,
        debounce: workspace.config.debounce,
        max_cycles: args.max_cycles,
    };
    info!(
        interval_secs = config.interval.as_secs(),
        root = %workspace.root.display(),
        "Watching for changes"
    );

    let policy = &workspace.config.policy;
    let mut last: Option<SyncReport> = None;
    let summary = run_watch(&config, &cancel, &triggers, |cycle| {
        let report = engine.sync(options)?;
        info!(cycle, summary = %report.summary(), "Watch cycle finished");
        if json {
            print_json(&report, policy, false)?;
        } else if !quiet && (cycle == 1 || report.wrote_anything() || !report.conflicts.is_empty()) {
            print!("{}", render_text(&report, &workspace.root, policy));
        }
        if report.manual_conflicts() > 0 {
            warn!(count = report.manual_conflicts(), "Manual conflicts remain");
        }
        last = Some(report);
        Ok(())
    });

    cancel.cancel();
    if poller.join().is_err() {
        warn!("Polling watcher thread panicked");
    }
    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else if !quiet {
        println!(
            "Stopped after {} cycle(s): {} succeeded, {} failed.",
            summary.cycles, summary.succeeded, summary.failed
        );
    }
    // Exit status follows the last completed cycle.
    last.map_or(Ok(()), |report| check_outcome(&report, policy))
}

fn print_json(report: &SyncReport, policy: &EnforcementPolicy, pretty: bool) -> Result<()> {
    let output = SyncOutput {
        report,
        policy: report.deviations.as_ref().map(|_| policy.name.as_str()),
        blocked: report.deviations.as_ref().map(|d| policy.blocked(d)),
    };
    let payload = if pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{payload}");
    Ok(())
}

fn render_text(report: &SyncReport, root: &Path, policy: &EnforcementPolicy) -> String {
    let mut out = String::new();
    let direction = match report.direction {
        SyncDirection::Bidirectional => "bidirectional",
        SyncDirection::ExternalToInternal => "external -> internal",
    };
    let mode = if report.overwrite { ", overwrite" } else { "" };
    let _ = writeln!(out, "Synced {} ({direction}{mode})", root.display());
    let _ = writeln!(
        out,
        "  read: {} internal, {} external",
        report.artifacts_read.internal, report.artifacts_read.external
    );

    let c = &report.classifications;
    if c.total() > 0 {
        let _ = writeln!(
            out,
            "  changes: {} unchanged, {} local, {} remote, {} both, {} new, {} deleted",
            c.unchanged, c.changed_local, c.changed_remote, c.changed_both, c.new, c.deleted
        );
    }
    let _ = writeln!(
        out,
        "  features: {} added, {} updated, {} removed, {} duplicate(s) collapsed",
        report.features_added,
        report.features_updated,
        report.features_removed,
        report.duplicates_removed
    );

    for artifact in &report.artifacts_written {
        let _ = writeln!(out, "  wrote {} {}", artifact.side, artifact.id);
    }
    for conflict in &report.conflicts {
        let _ = writeln!(
            out,
            "  conflict {} [{}]: {} ({})",
            conflict.artifact_id, conflict.category, conflict.resolution, conflict.reason
        );
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "  warning: {warning}");
    }

    if let Some(deviations) = &report.deviations {
        out.push('\n');
        out.push_str(&DeviationReport::new(deviations, policy).to_text());
    }
    out
}

/// Map the report to the command's exit status.
fn check_outcome(report: &SyncReport, policy: &EnforcementPolicy) -> Result<()> {
    let manual = report.manual_conflicts();
    if manual > 0 {
        return Err(SyncError::UnresolvedConflicts { count: manual });
    }
    if let Some(deviations) = &report.deviations {
        let blocked = policy.blocked(deviations);
        if blocked > 0 {
            return Err(SyncError::PolicyViolation {
                count: blocked,
                policy: policy.name.clone(),
            });
        }
    }
    Ok(())
}
