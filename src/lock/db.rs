//! lock::db
//!
//! Cross-process lock manager backed by row locks in a relational store.
//!
//! # Architecture
//!
//! The in-process hold counts and thread ownership are the same state
//! machine as [`MemoryLockManager`](super::MemoryLockManager). In addition,
//! a key going from unlocked to locked locks its row in the store, and the
//! held row lock stays open until the key is fully released (or the
//! manager destroyed). Row locks are the authoritative exclusion between
//! processes; the local registry only keeps this process's bookkeeping.
//!
//! Acquisition never waits for another holder. A busy row is reported as
//! [`LockError::Held`] and any store failure as [`LockError::Store`];
//! neither is retried here.
//!
//! Dropping the manager releases every row it still holds, as
//! [`LockManager::destroy`] does.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use super::registry::{LockBackend, LockRegistry};
use super::store::{RowLockAttempt, RowLockStore, StoreError};
use super::{Lock, LockError, LockManager};
use crate::core::types::UtcTimestamp;

/// Key locked and unlocked by the start-up self-test.
pub const SELF_TEST_KEY: &str = "hippolock.self-test";

/// Options for [`DbLockManager::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbLockOptions {
    /// Lock and unlock [`SELF_TEST_KEY`] before returning the manager,
    /// failing construction if that does not work.
    pub verify_on_startup: bool,
}

impl Default for DbLockOptions {
    fn default() -> Self {
        Self {
            verify_on_startup: true,
        }
    }
}

/// Row-lock backend for the shared registry.
struct RowLockBackend<S: RowLockStore> {
    store: S,
    tables_ready: AtomicBool,
}

impl<S: RowLockStore> RowLockBackend<S> {
    fn store_error(key: &str, source: StoreError) -> LockError {
        LockError::Store {
            key: key.to_string(),
            source,
        }
    }

    fn ensure_tables(&self, key: &str) -> Result<(), LockError> {
        // Registry calls are serialized, so a plain flag is enough.
        if !self.tables_ready.load(Ordering::Acquire) {
            self.store
                .create_tables()
                .map_err(|e| Self::store_error(key, e))?;
            self.tables_ready.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn busy(key: &str, holder: Option<String>) -> LockError {
        LockError::Held {
            key: key.to_string(),
            owner: holder.unwrap_or_else(|| "another process".to_string()),
        }
    }
}

impl<S: RowLockStore> LockBackend for RowLockBackend<S> {
    type Handle = S::Row;

    fn acquire(&self, key: &str) -> Result<S::Row, LockError> {
        self.ensure_tables(key)?;

        let row = match self
            .store
            .lock_row(key)
            .map_err(|e| Self::store_error(key, e))?
        {
            RowLockAttempt::Locked(row) => row,
            RowLockAttempt::Busy { holder } => return Err(Self::busy(key, holder)),
            RowLockAttempt::Missing => {
                debug!(key = %key, "creating lock row");
                self.store
                    .insert_row(key)
                    .map_err(|e| Self::store_error(key, e))?;
                match self
                    .store
                    .lock_row(key)
                    .map_err(|e| Self::store_error(key, e))?
                {
                    RowLockAttempt::Locked(row) => row,
                    RowLockAttempt::Busy { holder } => return Err(Self::busy(key, holder)),
                    RowLockAttempt::Missing => {
                        return Err(Self::store_error(
                            key,
                            StoreError::MissingRow(key.to_string()),
                        ))
                    }
                }
            }
        };

        if let Err(e) = self.store.touch_overview(key, UtcTimestamp::now()) {
            // The overview is informational; the row lock is what counts.
            debug!(key = %key, error = %e, "could not update lock overview");
        }
        Ok(row)
    }

    fn release(&self, key: &str, handle: S::Row) {
        if let Err(e) = self.store.release_row(handle) {
            error!(key = %key, error = %e, "failed to release lock row");
        }
    }
}

/// Lock manager whose locks exclude other processes sharing the store.
pub struct DbLockManager<S: RowLockStore> {
    registry: LockRegistry<RowLockBackend<S>>,
}

impl<S: RowLockStore> DbLockManager<S> {
    /// Create a manager over `store` without a start-up self-test.
    ///
    /// Tables are created on first use.
    pub fn new(store: S) -> Self {
        Self {
            registry: LockRegistry::new(RowLockBackend {
                store,
                tables_ready: AtomicBool::new(false),
            }),
        }
    }

    /// Create a manager over `store`, running the self-test if requested.
    ///
    /// # Errors
    ///
    /// Returns the self-test's error if [`SELF_TEST_KEY`] cannot be locked
    /// and unlocked.
    pub fn open(store: S, options: DbLockOptions) -> Result<Self, LockError> {
        let manager = Self::new(store);
        if options.verify_on_startup {
            manager.registry.lock(SELF_TEST_KEY)?;
            manager.registry.unlock(SELF_TEST_KEY)?;
            info!("database lock manager self-test passed");
        }
        Ok(manager)
    }

    /// The underlying row-lock store.
    pub fn store(&self) -> &S {
        &self.registry.backend().store
    }
}

impl<S: RowLockStore> LockManager for DbLockManager<S> {
    fn lock(&self, key: &str) -> Result<(), LockError> {
        self.registry.lock(key)
    }

    fn unlock(&self, key: &str) -> Result<(), LockError> {
        self.registry.unlock(key)
    }

    fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.registry.is_locked(key))
    }

    fn locks(&self) -> Result<Vec<Lock>, LockError> {
        Ok(self.registry.locks())
    }

    fn destroy(&self) {
        self.registry.destroy()
    }
}

impl<S: RowLockStore> Drop for DbLockManager<S> {
    fn drop(&mut self) {
        self.registry.destroy();
    }
}

impl<S: RowLockStore> std::fmt::Debug for DbLockManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbLockManager")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::store::SqliteRowLockStore;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Store whose rows live in a set; fails on demand.
    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<HashSet<String>>,
        held: Mutex<HashSet<String>>,
        fail_lock: bool,
        tables_created: Mutex<usize>,
        released: Arc<Mutex<Vec<String>>>,
    }

    impl RowLockStore for FakeStore {
        type Row = String;

        fn create_tables(&self) -> Result<(), StoreError> {
            *self.tables_created.lock() += 1;
            Ok(())
        }

        fn lock_row(&self, key: &str) -> Result<RowLockAttempt<String>, StoreError> {
            if self.fail_lock {
                return Err(StoreError::NotConfigured("database is down".into()));
            }
            if !self.rows.lock().contains(key) {
                return Ok(RowLockAttempt::Missing);
            }
            if !self.held.lock().insert(key.to_string()) {
                return Ok(RowLockAttempt::Busy { holder: None });
            }
            Ok(RowLockAttempt::Locked(key.to_string()))
        }

        fn insert_row(&self, key: &str) -> Result<(), StoreError> {
            self.rows.lock().insert(key.to_string());
            Ok(())
        }

        fn touch_overview(&self, _key: &str, _time: UtcTimestamp) -> Result<(), StoreError> {
            Ok(())
        }

        fn release_row(&self, row: String) -> Result<(), StoreError> {
            self.held.lock().remove(&row);
            self.released.lock().push(row);
            Ok(())
        }
    }

    #[test]
    fn missing_row_is_inserted_then_locked() {
        let manager = DbLockManager::new(FakeStore::default());
        manager.lock("a").unwrap();
        assert!(manager.store().rows.lock().contains("a"));
        assert!(manager.store().held.lock().contains("a"));

        manager.unlock("a").unwrap();
        assert!(!manager.store().held.lock().contains("a"));
    }

    #[test]
    fn tables_are_created_once() {
        let manager = DbLockManager::new(FakeStore::default());
        manager.lock("a").unwrap();
        manager.lock("b").unwrap();
        assert_eq!(*manager.store().tables_created.lock(), 1);
    }

    #[test]
    fn reentrant_lock_keeps_single_row_lock() {
        let manager = DbLockManager::new(FakeStore::default());
        manager.lock("a").unwrap();
        manager.lock("a").unwrap();
        manager.unlock("a").unwrap();
        assert!(manager.store().held.lock().contains("a"));
        manager.unlock("a").unwrap();
        assert!(manager.store().held.lock().is_empty());
    }

    #[test]
    fn store_failure_surfaces_as_lock_error() {
        let store = FakeStore {
            fail_lock: true,
            ..FakeStore::default()
        };
        let manager = DbLockManager::new(store);
        let err = manager.lock("a").unwrap_err();
        assert!(matches!(err, LockError::Store { .. }));
        assert!(!manager.is_locked("a").unwrap());
    }

    #[test]
    fn failing_self_test_is_fatal() {
        let store = FakeStore {
            fail_lock: true,
            ..FakeStore::default()
        };
        let result = DbLockManager::open(store, DbLockOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn self_test_leaves_nothing_locked() {
        let store = SqliteRowLockStore::open_in_memory().unwrap();
        let manager = DbLockManager::open(store, DbLockOptions::default()).unwrap();
        assert!(manager.locks().unwrap().is_empty());
        assert!(manager.store().claimed_rows().unwrap().is_empty());
    }

    #[test]
    fn dropping_the_manager_releases_row_locks() {
        let store = FakeStore::default();
        let released = Arc::clone(&store.released);
        let manager = DbLockManager::new(store);
        manager.lock("a").unwrap();
        manager.lock("a").unwrap();
        manager.lock("b").unwrap();
        drop(manager);

        let mut keys = released.lock().clone();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn destroy_releases_row_locks() {
        let manager = DbLockManager::new(FakeStore::default());
        manager.lock("a").unwrap();
        manager.lock("b").unwrap();
        manager.destroy();
        assert!(manager.store().held.lock().is_empty());
    }
}
