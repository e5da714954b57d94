//! Version command implementation.

use crate::error::Result;
use crate::model::PlanDocument;
use crate::sync::fingerprint::CURRENT_SCHEMA_VERSION;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    /// Plan bundle format written by this binary.
    plan_format: &'a str,
    /// Fingerprint store schema.
    store_schema: i32,
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let output = VersionOutput {
        version: env!("CARGO_PKG_VERSION"),
        build: if cfg!(debug_assertions) { "dev" } else { "release" },
        plan_format: PlanDocument::CURRENT_VERSION,
        store_schema: CURRENT_SCHEMA_VERSION,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "ssync version {} ({}), plan format {}, store schema {}",
            output.version, output.build, output.plan_format, output.store_schema
        );
    }
    Ok(())
}
