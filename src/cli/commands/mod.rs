//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Opens the store it needs from the loaded configuration
//! 2. Calls the library
//! 3. Formats and displays output, as JSON when `--json` is set
//!
//! Confirmation messages are suppressed by `--quiet`; requested data is
//! always printed.

mod changelog;
mod completion;
mod config_cmd;
mod journal;
mod locks;
mod sync;

// Re-export command functions for testing and direct invocation
pub use changelog::changelog;
pub use completion::completion;
pub use config_cmd::{init as config_init, show as config_show};
pub use journal::{cleanup as journal_cleanup, head as journal_head};
pub use locks::{list as locks_list, probe as locks_probe, release as locks_release};
pub use sync::{get as sync_get, list as sync_list, set as sync_set};

use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use serde::Serialize;

use crate::cli::args::{Command, ConfigAction, JournalAction, LocksAction, SyncAction};
use crate::cli::Context;
use crate::journal::SqliteJournal;
use crate::lock::SqliteRowLockStore;
use crate::sync::SyncRevisionService;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Locks { action } => match action {
            LocksAction::List => locks::list(ctx),
            LocksAction::Probe { key } => locks::probe(ctx, &key),
            LocksAction::Release { key } => locks::release(ctx, &key),
        },
        Command::Sync { action } => match action {
            SyncAction::Get { key } => sync::get(ctx, &key),
            SyncAction::Set { key, revision } => sync::set(ctx, &key, revision),
            SyncAction::List => sync::list(ctx),
        },
        Command::Changelog {
            from,
            limit,
            no_limit,
            scopes,
            ignored,
            squash,
            no_squash,
        } => {
            let squash = if squash {
                Some(true)
            } else if no_squash {
                Some(false)
            } else {
                None
            };
            let limit = if no_limit {
                LimitArg::Unlimited
            } else {
                limit.map_or(LimitArg::Configured, LimitArg::Explicit)
            };
            changelog::changelog(ctx, from, limit, scopes, ignored, squash)
        }
        Command::Journal { action } => match action {
            JournalAction::Head => journal::head(ctx),
            JournalAction::Cleanup => journal::cleanup(ctx),
        },
        Command::Config { action } => match action {
            ConfigAction::Init { force, data_dir } => {
                config_cmd::init(ctx, force, data_dir.as_deref())
            }
            ConfigAction::Show => config_cmd::show(ctx),
        },
        Command::Completion { shell } => completion::completion(shell),
    }
}

/// Soft limit requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitArg {
    /// Use `sync.soft_limit` from the config
    Configured,
    Explicit(usize),
    Unlimited,
}

/// Open the configured lock database.
fn open_lock_store(ctx: &Context) -> Result<SqliteRowLockStore> {
    let path = ctx
        .config
        .lock
        .database
        .as_deref()
        .ok_or_else(|| anyhow!("No lock database configured. Set lock.database in the config file."))?;
    SqliteRowLockStore::open(path, ctx.config.lock.statement_timeout())
        .with_context(|| format!("Failed to open lock database {}", path.display()))
}

/// Open the configured journal as a sync service.
fn open_sync_service(
    ctx: &Context,
) -> Result<SyncRevisionService<Arc<SqliteJournal>, Arc<SqliteJournal>>> {
    let path = ctx
        .config
        .journal
        .database
        .as_deref()
        .ok_or_else(|| anyhow!("No journal configured. Set journal.database in the config file."))?;
    let journal = SqliteJournal::open(path)
        .with_context(|| format!("Failed to open journal {}", path.display()))?;
    let journal = Arc::new(journal);
    Ok(SyncRevisionService::new(Arc::clone(&journal), journal))
}

/// Print `value` as pretty JSON.
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
