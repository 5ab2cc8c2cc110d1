//! config command - Create or show the configuration file

use std::path::Path;

use super::print_json;
use crate::cli::Context;
use crate::core::config::{Config, LockBackendKind};
use anyhow::{bail, Context as _, Result};

/// Write a starter config file.
///
/// Goes to `--config` when given, otherwise to `~/.hippolock/config.toml`.
/// With `data_dir`, the database lock backend and the journal are pointed
/// at `locks.db` and `journal.db` inside it.
pub fn init(ctx: &Context, force: bool, data_dir: Option<&Path>) -> Result<()> {
    let path = match &ctx.config_path {
        Some(path) => path.clone(),
        None => Config::default_path().context("Cannot determine config location")?,
    };
    if path.exists() && !force {
        bail!(
            "Config file {} already exists. Use --force to overwrite it.",
            path.display()
        );
    }

    let mut config = Config::default();
    if let Some(dir) = data_dir {
        config.lock.backend = LockBackendKind::Database;
        config.lock.database = Some(dir.join("locks.db"));
        config.journal.database = Some(dir.join("journal.db"));
    }
    config.validate()?;
    config
        .write(&path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;

    if !ctx.quiet && !ctx.json {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

/// Print the effective configuration and where it came from.
pub fn show(ctx: &Context) -> Result<()> {
    if ctx.json {
        return print_json(&serde_json::json!({
            "path": ctx.config_path,
            "config": ctx.config,
        }));
    }

    if !ctx.quiet {
        match &ctx.config_path {
            Some(path) => println!("# {}", path.display()),
            None => println!("# no config file, using defaults"),
        }
    }
    let rendered = toml::to_string_pretty(&ctx.config).context("Failed to render config")?;
    print!("{}", rendered);
    Ok(())
}
