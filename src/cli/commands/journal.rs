//! journal command - Inspect and clean up the revision journal

use super::{open_sync_service, print_json};
use crate::cli::Context;
use crate::journal::{JournalJanitor, RevisionJournal};
use anyhow::{Context as _, Result};

/// Print the newest revision.
pub fn head(ctx: &Context) -> Result<()> {
    let service = open_sync_service(ctx)?;
    let head = service
        .journal()
        .head_revision()
        .context("Failed to read journal")?;

    if ctx.json {
        return print_json(&serde_json::json!({ "head": head }));
    }
    match head {
        Some(revision) => println!("{}", revision),
        None => {
            if !ctx.quiet {
                println!("Journal is empty.");
            }
        }
    }
    Ok(())
}

/// Delete entries every consumer has processed.
pub fn cleanup(ctx: &Context) -> Result<()> {
    let service = open_sync_service(ctx)?;
    let report = JournalJanitor::new(service.journal(), service.revisions())
        .with_batch_size(ctx.config.journal.cleanup_batch)
        .clean()
        .context("Journal cleanup failed")?;

    if ctx.json {
        return print_json(&report);
    }
    if ctx.quiet {
        return Ok(());
    }
    match report.lowest_revision {
        None => println!("No revision markers; nothing deleted."),
        Some(lowest) => {
            println!(
                "Deleted {} entries below revision {}.",
                report.deleted, lowest
            );
            if !report.blocked_by.is_empty() {
                println!("Oldest marker: {}", report.blocked_by.join(", "));
            }
        }
    }
    Ok(())
}
