//! core
//!
//! Shared domain types and configuration for hippolock.
//!
//! # Modules
//!
//! - [`types`] - Revisions and timestamps
//! - [`config`] - Configuration schema and loading

pub mod config;
pub mod types;
