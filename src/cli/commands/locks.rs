//! locks command - Inspect and repair the lock database

use super::{open_lock_store, print_json};
use crate::cli::Context;
use crate::lock::{create_lock_manager, LockError, LockManager};
use anyhow::{Context as _, Result};
use serde::Serialize;

/// List claimed keys.
pub fn list(ctx: &Context) -> Result<()> {
    let store = open_lock_store(ctx)?;
    let rows = store.claimed_rows().context("Failed to read lock table")?;

    if ctx.json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        if !ctx.quiet {
            println!("No claimed locks.");
        }
        return Ok(());
    }

    let width = rows.iter().map(|r| r.key.len()).max().unwrap_or(0);
    for row in &rows {
        let since = row
            .lock_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<width$}  {}  {}", row.key, row.owner, since, width = width);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProbeResult<'a> {
    key: &'a str,
    free: bool,
    holder: Option<String>,
}

/// Lock and unlock `key` through the configured manager.
pub fn probe(ctx: &Context, key: &str) -> Result<()> {
    let manager = create_lock_manager(&ctx.config.lock).context("Failed to start lock manager")?;

    let result = match manager.lock(key) {
        Ok(()) => {
            manager.unlock(key)?;
            ProbeResult {
                key,
                free: true,
                holder: None,
            }
        }
        Err(LockError::Held { owner, .. }) => ProbeResult {
            key,
            free: false,
            holder: Some(owner),
        },
        Err(e) => return Err(e.into()),
    };
    manager.destroy();

    if ctx.json {
        return print_json(&result);
    }
    match &result.holder {
        None => println!("{} is free", key),
        Some(holder) => println!("{} is held by {}", key, holder),
    }
    Ok(())
}

/// Clear the claim on `key`.
pub fn release(ctx: &Context, key: &str) -> Result<()> {
    let store = open_lock_store(ctx)?;
    let released = store
        .force_release(key)
        .with_context(|| format!("Failed to release {}", key))?;

    if ctx.json {
        return print_json(&serde_json::json!({ "key": key, "released": released }));
    }
    if !ctx.quiet {
        if released {
            println!("Released claim on {}", key);
        } else {
            println!("{} is not claimed", key);
        }
    }
    Ok(())
}
