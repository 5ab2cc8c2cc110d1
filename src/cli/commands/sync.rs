//! sync command - Read and write external sync revisions

use super::{open_sync_service, print_json};
use crate::cli::Context;
use crate::core::types::Revision;
use anyhow::{bail, Result};

/// Print a consumer's revision.
pub fn get(ctx: &Context, key: &str) -> Result<()> {
    let service = open_sync_service(ctx)?;
    let marker = service.sync_revision(key)?;

    if !marker.exists()? {
        bail!("No sync revision stored for '{}'", key);
    }
    let revision = marker.get()?;

    if ctx.json {
        return print_json(&serde_json::json!({ "key": key, "revision": revision }));
    }
    println!("{}", revision);
    Ok(())
}

/// Store a consumer's revision.
pub fn set(ctx: &Context, key: &str, revision: Revision) -> Result<()> {
    let service = open_sync_service(ctx)?;
    service.sync_revision(key)?.set(revision)?;

    if !ctx.quiet && !ctx.json {
        println!("Set {} = {}", key, revision);
    }
    Ok(())
}

/// List all consumers.
pub fn list(ctx: &Context) -> Result<()> {
    let service = open_sync_service(ctx)?;
    let markers = service.sync_markers()?;

    if ctx.json {
        return print_json(&markers);
    }
    if markers.is_empty() && !ctx.quiet {
        println!("No sync revisions stored.");
    }
    for marker in &markers {
        println!("{}  {}", marker.key, marker.revision);
    }
    Ok(())
}
