//! Status command implementation.

use super::Workspace;
use crate::cli::StatusArgs;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::sync::RunMode;

/// Execute the status command. Reads both sides, writes nothing.
///
/// # Errors
///
/// Returns an error if either side cannot be read or the fingerprint store
/// cannot be opened.
pub fn execute(args: &StatusArgs, json: bool) -> Result<()> {
    let overrides = CliOverrides {
        external_root: args.external_root.clone(),
        ..CliOverrides::default()
    };
    let workspace = Workspace::open(&args.path, &overrides)?;
    let mut engine = workspace.engine(args.adapter, RunMode::Ci)?;
    let status = engine.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for pair in &status.pairs {
        println!(
            "{:<15} {:<40} {}",
            pair.classification.as_str(),
            pair.internal_id.as_deref().unwrap_or("-"),
            pair.external_id.as_deref().unwrap_or("-")
        );
    }
    let c = status.counts;
    println!(
        "\n{} pair(s): {} unchanged, {} local, {} remote, {} both, {} new, {} deleted",
        c.total(),
        c.unchanged,
        c.changed_local,
        c.changed_remote,
        c.changed_both,
        c.new,
        c.deleted
    );
    Ok(())
}
