//! hippolock - advisory locking and revision change logs for content repositories
//!
//! hippolock provides the coordination core a content repository needs around
//! its mutation paths: named advisory locks that editors, workflows and
//! background modules take before touching shared state, and a change-log
//! service that lets external consumers (replication, indexing) follow the
//! repository's revision journal incrementally.
//!
//! # Architecture
//!
//! - [`lock`] - Reentrant, thread-owned advisory locks (in-memory and database-backed)
//! - [`changelog`] - Deduplicating, squashable change records bounded by revisions
//! - [`journal`] - Revision journal and per-consumer revision markers
//! - [`sync`] - External sync revisions and change-log production
//! - [`core`] - Shared types and configuration
//! - [`logging`] - Tracing subscriber setup
//! - [`cli`] - Operator command-line interface
//!
//! # Correctness Invariants
//!
//! 1. At most one lock exists per key, owned by exactly one live thread
//! 2. A held lock always has a hold count of at least one
//! 3. Change logs split only on commit-group boundaries
//! 4. Journal entries are never cleaned up past any consumer's revision marker

pub mod changelog;
pub mod cli;
pub mod core;
pub mod journal;
pub mod lock;
pub mod logging;
pub mod sync;
