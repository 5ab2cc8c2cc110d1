//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Use this config file
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output
//! - `--json`: Machine-readable output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::types::Revision;

/// hippolock - advisory locks and revision change logs
#[derive(Parser, Debug)]
#[command(name = "hippolock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Use this config file instead of the default locations
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect and repair the lock database
    #[command(
        name = "locks",
        long_about = "Inspect and repair the lock database.\n\n\
            Every process using the database lock backend claims a row in the \
            lock table while it holds a key. Claims of a process that crashed \
            are taken over by the next lock attempt on the same host; release \
            clears any claim by hand.",
        after_help = "\
WORKFLOW EXAMPLES:
    # See which keys are claimed and by whom
    hippolock locks list

    # Check whether a key can be taken right now
    hippolock locks probe /content/documents/news

    # Clear a claim by hand
    hippolock locks release /content/documents/news"
    )]
    Locks {
        #[command(subcommand)]
        action: LocksAction,
    },

    /// Read and write external sync revisions
    #[command(
        name = "sync",
        long_about = "Read and write external sync revisions.\n\n\
            An external consumer records the last revision it processed under \
            a key. Journal cleanup never deletes entries a consumer has not \
            processed, so a stale revision here blocks cleanup.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Show all external consumers and their revisions
    hippolock sync list

    # Advance a consumer by hand
    hippolock sync set replicator 1042"
    )]
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Print change logs from the revision journal
    #[command(
        name = "changelog",
        long_about = "Print change logs from the revision journal.\n\n\
            Replays the journal after a revision and prints one change log per \
            commit group. Defaults for the limit, scopes, ignored properties \
            and squashing come from the [sync] section of the config file.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Everything since revision 1000, one record per changed node
    hippolock changelog --from 1000

    # Only documents, raw event types, at most about 50 records
    hippolock changelog --scope /content/documents --no-squash --limit 50"
    )]
    Changelog {
        /// Report changes after this revision
        #[arg(long, default_value_t = 0, value_name = "REVISION")]
        from: Revision,

        /// Soft cap on the number of records
        #[arg(long, value_name = "N", conflicts_with = "no_limit")]
        limit: Option<usize>,

        /// Ignore the configured soft limit
        #[arg(long)]
        no_limit: bool,

        /// Only report changes at or below this path (repeatable)
        #[arg(long = "scope", value_name = "PATH")]
        scopes: Vec<String>,

        /// Never report changes to this property (repeatable)
        #[arg(long = "ignore", value_name = "NAME")]
        ignored: Vec<String>,

        /// Collapse property changes into one record per node
        #[arg(long, conflicts_with = "no_squash")]
        squash: bool,

        /// Report raw property events
        #[arg(long)]
        no_squash: bool,
    },

    /// Inspect and clean up the revision journal
    #[command(name = "journal")]
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },

    /// Create or show the configuration file
    #[command(
        name = "config",
        after_help = "\
WORKFLOW EXAMPLES:
    # Start a config using the database backend under /var/lib/hippo
    hippolock config init --data-dir /var/lib/hippo

    # Show the configuration hippolock would use
    hippolock config show"
    )]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts
    #[command(name = "completion")]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Locks subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum LocksAction {
    /// List claimed keys in the lock database
    List,
    /// Lock and immediately unlock a key through the configured manager
    Probe {
        /// Lock key
        key: String,
    },
    /// Clear the claim on a key regardless of who holds it
    Release {
        /// Lock key
        key: String,
    },
}

/// Sync subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SyncAction {
    /// Print a consumer's revision
    Get {
        /// Consumer key
        key: String,
    },
    /// Store a consumer's revision
    Set {
        /// Consumer key
        key: String,
        /// Revision to store
        revision: Revision,
    },
    /// List all consumers and their revisions
    List,
}

/// Journal subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum JournalAction {
    /// Print the newest revision
    Head,
    /// Delete entries every consumer has processed
    Cleanup,
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Write a starter config file (to --config, or ~/.hippolock/config.toml)
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Use the database lock backend with its databases in this directory
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Print the effective configuration
    Show,
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
