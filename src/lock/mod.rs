//! lock
//!
//! Reentrant, thread-owned advisory locks keyed by string identifiers.
//!
//! # Architecture
//!
//! Locks are handed out through the [`LockManager`] trait, which has
//! several implementations composed around one shared state machine:
//!
//! - [`MemoryLockManager`]: process-local registry, no persistence
//! - [`DbLockManager`]: cross-process exclusion through row locks in a
//!   relational store (see [`RowLockStore`])
//! - [`AssertingLockManager`]: decorator validating keys before delegating
//!
//! Both backends share [`registry::LockRegistry`], which implements the
//! per-key lifecycle `Unlocked -> Locked(owner, 1) -> Locked(owner, N) ->
//! Unlocked` under a single manager-wide mutex.
//!
//! # Semantics
//!
//! - A lock is owned by the thread that acquired it; only that thread may
//!   re-acquire (incrementing the hold count) or release it.
//! - Contention with a live owner is reported as [`LockError::Held`]
//!   immediately. Nothing blocks; callers choose their own retry policy
//!   (see [`wait_for_lock`]).
//! - A lock whose owner thread has exited is recovered transparently with a
//!   warning, either by the next call touching the key or at `destroy`.
//! - Unlocking a key that is not locked is a no-op.
//!
//! # Example
//!
//! ```
//! use hippolock::lock::{AssertingLockManager, LockManager, MemoryLockManager};
//!
//! let manager = AssertingLockManager::new(MemoryLockManager::new());
//! manager.lock("/content/documents/news").unwrap();
//! assert!(manager.is_locked("/content/documents/news").unwrap());
//! manager.unlock("/content/documents/news").unwrap();
//! assert!(!manager.is_locked("/content/documents/news").unwrap());
//! ```

mod asserting;
mod db;
mod guard;
mod memory;
pub mod owner;
pub mod registry;
mod store;

pub use asserting::AssertingLockManager;
pub use db::{DbLockManager, DbLockOptions, SELF_TEST_KEY};
pub use guard::{wait_for_lock, LockGuard, LockManagerExt};
pub use memory::MemoryLockManager;
pub use store::{
    ClaimedRow, RowLockAttempt, RowLockStore, SqliteRowLock, SqliteRowLockStore, StoreError,
    DEFAULT_STATEMENT_TIMEOUT,
};

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::config::{LockBackendKind, LockConfig};
use crate::core::types::UtcTimestamp;

/// Maximum length of a lock key, in characters.
pub const MAX_KEY_LENGTH: usize = 256;

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// The key is empty or longer than [`MAX_KEY_LENGTH`] characters.
    #[error("invalid lock key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// The key is held by another live thread or process.
    #[error("lock '{key}' is already held by '{owner}'")]
    Held {
        /// The contended key.
        key: String,
        /// Display name of the current holder.
        owner: String,
    },

    /// The caller tried to release a lock owned by another live thread.
    #[error("lock '{key}' is owned by '{owner}' and cannot be unlocked by this thread")]
    NotOwner {
        /// The key the caller tried to release.
        key: String,
        /// Display name of the current holder.
        owner: String,
    },

    /// Waiting for a lock gave up.
    #[error("timed out after {waited:?} waiting for lock '{key}'")]
    Timeout {
        /// The key waited on.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The backing store failed.
    #[error("lock store error for '{key}': {source}")]
    Store {
        /// The key being operated on.
        key: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
}

impl LockError {
    /// True when the error reports contention with another holder.
    ///
    /// Contention is the only condition worth retrying.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Held { .. })
    }
}

/// Snapshot of a held lock, for diagnostics and monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct Lock {
    /// The lock key.
    pub key: String,
    /// Display name of the owning thread.
    pub owner: String,
    /// Identifier of the owning thread.
    #[serde(skip)]
    pub owner_thread: ThreadId,
    /// When the current owner acquired the lock.
    pub creation_time: UtcTimestamp,
    /// Number of nested acquisitions by the owner (always >= 1).
    pub hold_count: u32,
}

/// Advisory lock manager.
///
/// All operations on a manager are serialized against each other. Locks are
/// owned by the calling thread.
pub trait LockManager: Send + Sync {
    /// Acquire `key` for the calling thread.
    ///
    /// Re-acquiring a lock the thread already owns increments its hold count.
    ///
    /// # Errors
    ///
    /// - [`LockError::Held`] if another live thread (or process) holds the key
    /// - [`LockError::Store`] if the backing store fails
    fn lock(&self, key: &str) -> Result<(), LockError>;

    /// Release one hold of `key`.
    ///
    /// Unlocking a key that is not locked does nothing.
    ///
    /// # Errors
    ///
    /// - [`LockError::NotOwner`] if another live thread owns the key
    fn unlock(&self, key: &str) -> Result<(), LockError>;

    /// Whether `key` is currently held by a live thread.
    fn is_locked(&self, key: &str) -> Result<bool, LockError>;

    /// Snapshot of all locks held by live threads.
    fn locks(&self) -> Result<Vec<Lock>, LockError>;

    /// Release everything at shutdown, warning about each lock still held.
    fn destroy(&self);
}

impl<M: LockManager + ?Sized> LockManager for Arc<M> {
    fn lock(&self, key: &str) -> Result<(), LockError> {
        (**self).lock(key)
    }

    fn unlock(&self, key: &str) -> Result<(), LockError> {
        (**self).unlock(key)
    }

    fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        (**self).is_locked(key)
    }

    fn locks(&self) -> Result<Vec<Lock>, LockError> {
        (**self).locks()
    }

    fn destroy(&self) {
        (**self).destroy()
    }
}

impl<M: LockManager + ?Sized> LockManager for Box<M> {
    fn lock(&self, key: &str) -> Result<(), LockError> {
        (**self).lock(key)
    }

    fn unlock(&self, key: &str) -> Result<(), LockError> {
        (**self).unlock(key)
    }

    fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        (**self).is_locked(key)
    }

    fn locks(&self) -> Result<Vec<Lock>, LockError> {
        (**self).locks()
    }

    fn destroy(&self) {
        (**self).destroy()
    }
}

/// Check that `key` is a usable lock key.
///
/// # Errors
///
/// Returns [`LockError::InvalidKey`] if the key is empty or longer than
/// [`MAX_KEY_LENGTH`] characters.
pub fn validate_key(key: &str) -> Result<(), LockError> {
    if key.is_empty() {
        return Err(LockError::InvalidKey {
            reason: "key must not be empty".into(),
        });
    }
    let length = key.chars().count();
    if length > MAX_KEY_LENGTH {
        return Err(LockError::InvalidKey {
            reason: format!(
                "key is {} characters long, the maximum is {}",
                length, MAX_KEY_LENGTH
            ),
        });
    }
    Ok(())
}

/// Create the lock manager described by the configuration.
///
/// The returned manager is always wrapped in an [`AssertingLockManager`].
///
/// # Backends
///
/// - `memory`: [`MemoryLockManager`]
/// - `database`: [`DbLockManager`] over a [`SqliteRowLockStore`] at
///   `lock.database`
///
/// # Errors
///
/// - The database cannot be opened
/// - The start-up self-test fails (when `verify_on_startup` is set)
pub fn create_lock_manager(config: &LockConfig) -> Result<Box<dyn LockManager>, LockError> {
    match config.backend {
        LockBackendKind::Memory => Ok(Box::new(AssertingLockManager::new(
            MemoryLockManager::new(),
        ))),
        LockBackendKind::Database => {
            let path = config.database.as_deref().ok_or_else(|| LockError::Store {
                key: String::new(),
                source: StoreError::NotConfigured("lock.database is not set".into()),
            })?;
            let store = SqliteRowLockStore::open(path, config.statement_timeout())
                .map_err(|source| LockError::Store {
                    key: String::new(),
                    source,
                })?;
            let options = DbLockOptions {
                verify_on_startup: config.verify_on_startup,
            };
            let manager = DbLockManager::open(store, options)?;
            Ok(Box::new(AssertingLockManager::new(manager)))
        }
    }
}
