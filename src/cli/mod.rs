//! cli
//!
//! Command-line interface layer for hippolock.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load configuration and initialize logging
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. Handlers open the configured lock database or
//! journal and call the library; all lock and journal semantics live in
//! [`crate::lock`], [`crate::journal`] and [`crate::sync`].

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::cli::args::{Command, ConfigAction};
use crate::core::config::{Config, ConfigLoadResult};
use crate::logging;

/// Settings shared by every command handler.
#[derive(Debug, Clone)]
pub struct Context {
    /// The loaded configuration
    pub config: Config,
    /// Where it was loaded from, if anywhere
    pub config_path: Option<PathBuf>,
    pub debug: bool,
    pub quiet: bool,
    pub json: bool,
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();

    // `config init` creates the file the other commands load.
    let loaded = if matches!(
        cli.command,
        Command::Config {
            action: ConfigAction::Init { .. }
        }
    ) {
        ConfigLoadResult {
            config: Config::default(),
            path: cli.config.clone(),
        }
    } else {
        Config::load(cli.config.as_deref()).context("Failed to load config")?
    };
    logging::init(
        loaded.config.logging.filter.as_deref(),
        loaded.config.logging.format,
        cli.debug,
    );
    if let Some(path) = &loaded.path {
        tracing::debug!(path = %path.display(), "loaded config");
    }

    let ctx = Context {
        config: loaded.config,
        config_path: loaded.path,
        debug: cli.debug,
        quiet: cli.quiet,
        json: cli.json,
    };

    commands::dispatch(cli.command, &ctx)
}
