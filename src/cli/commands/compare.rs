//! Compare command implementation.

use crate::adapter::{Adapter, PlanAdapter};
use crate::cli::CompareArgs;
use crate::compare::{DeviationReport, EnforcementPolicy, compare};
use crate::error::{Result, SyncError};
use std::path::Path;

fn read_bundle(dir: &Path) -> Result<crate::model::PlanDocument> {
    let adapter = PlanAdapter::at_bundle(dir);
    if !adapter.exists() {
        return Err(SyncError::NotInitialized {
            path: dir.to_path_buf(),
        });
    }
    Ok(adapter.read()?.plan)
}

/// Execute the compare command.
///
/// # Errors
///
/// Returns `PolicyViolation` after printing the report when the policy
/// blocks any deviation, or an error if a bundle cannot be read.
pub fn execute(args: &CompareArgs, json: bool) -> Result<()> {
    let policy = match &args.policy {
        Some(name) => EnforcementPolicy::preset(name)?,
        None => EnforcementPolicy::balanced(),
    };
    let manual = read_bundle(&args.manual)?;
    let auto = read_bundle(&args.auto)?;

    let deviations = compare(&manual, &auto);
    let report = DeviationReport::new(&deviations, &policy);
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.to_text());
    }

    let blocked = policy.blocked(&deviations);
    if blocked > 0 {
        return Err(SyncError::PolicyViolation {
            count: blocked,
            policy: policy.name,
        });
    }
    Ok(())
}
