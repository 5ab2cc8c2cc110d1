//! changelog command - Print change logs from the revision journal

use super::{open_sync_service, print_json, LimitArg};
use crate::cli::Context;
use crate::core::types::Revision;
use crate::sync::ChangeLogQuery;
use anyhow::{bail, Result};

/// Print change logs after `from`.
///
/// Unset options fall back to the `[sync]` config section.
pub fn changelog(
    ctx: &Context,
    from: Revision,
    limit: LimitArg,
    scopes: Vec<String>,
    ignored: Vec<String>,
    squash: Option<bool>,
) -> Result<()> {
    let mut query = ChangeLogQuery::from_config(from, &ctx.config.sync);
    match limit {
        LimitArg::Configured => {}
        LimitArg::Explicit(0) => bail!("--limit must be greater than zero"),
        LimitArg::Explicit(n) => query.soft_limit = Some(n),
        LimitArg::Unlimited => query.soft_limit = None,
    }
    if let Some(scope) = scopes.iter().find(|s| !s.starts_with('/')) {
        bail!("Scope '{}' must be an absolute path", scope);
    }
    if !scopes.is_empty() {
        query.scopes = scopes;
    }
    query.ignored_property_names.extend(ignored);
    if let Some(squash) = squash {
        query.squash_events = squash;
    }

    let service = open_sync_service(ctx)?;
    let logs = service.change_logs(&query)?;

    if ctx.json {
        return print_json(&logs);
    }

    for log in &logs {
        if log.is_empty() {
            if !ctx.quiet {
                println!("no changes after revision {}", log.end_revision());
            }
            continue;
        }
        println!(
            "revisions {}..{} ({} records)",
            log.start_revision(),
            log.end_revision(),
            log.len()
        );
        for record in log.records() {
            println!(
                "  {:>8}  {:<16}  {}  {}",
                record.revision,
                record.record_type.as_str(),
                record.path,
                record.identifier
            );
        }
    }
    Ok(())
}
