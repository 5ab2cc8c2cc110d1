//! lock::guard
//!
//! Scoped locking and waiting on top of any [`LockManager`].
//!
//! # Example
//!
//! ```
//! use hippolock::lock::{LockManager, LockManagerExt, MemoryLockManager};
//!
//! let manager = MemoryLockManager::new();
//! {
//!     let _guard = manager.lock_guard("/content/documents").unwrap();
//!     assert!(manager.is_locked("/content/documents").unwrap());
//! }
//! assert!(!manager.is_locked("/content/documents").unwrap());
//! ```

use std::marker::PhantomData;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{LockError, LockManager};

/// A held lock, released when dropped.
///
/// Locks belong to threads, so the guard cannot be sent to another thread.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a, M: LockManager + ?Sized> {
    manager: &'a M,
    key: String,
    _owner_thread: PhantomData<*const ()>,
}

impl<M: LockManager + ?Sized> LockGuard<'_, M> {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<M: LockManager + ?Sized> Drop for LockGuard<'_, M> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.unlock(&self.key) {
            warn!(key = %self.key, error = %e, "failed to release guarded lock");
        }
    }
}

impl<M: LockManager + ?Sized> std::fmt::Debug for LockGuard<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Scoped-lock convenience for every [`LockManager`].
pub trait LockManagerExt: LockManager {
    /// Lock `key` and return a guard that unlocks it on drop.
    fn lock_guard(&self, key: &str) -> Result<LockGuard<'_, Self>, LockError> {
        self.lock(key)?;
        Ok(LockGuard {
            manager: self,
            key: key.to_string(),
            _owner_thread: PhantomData,
        })
    }
}

impl<M: LockManager + ?Sized> LockManagerExt for M {}

/// Lock `key`, retrying every `interval` while another holder has it.
///
/// With `timeout` set, gives up with [`LockError::Timeout`] once that much
/// time has passed. Errors other than contention are returned at once.
pub fn wait_for_lock<M: LockManager + ?Sized>(
    manager: &M,
    key: &str,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<(), LockError> {
    let started = Instant::now();
    loop {
        match manager.lock(key) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_contention() => {
                let waited = started.elapsed();
                if let Some(timeout) = timeout {
                    if waited >= timeout {
                        return Err(LockError::Timeout {
                            key: key.to_string(),
                            waited,
                        });
                    }
                }
                debug!(key = %key, error = %e, "lock busy, waiting");
                thread::sleep(interval);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{AssertingLockManager, MemoryLockManager};
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn guard_unlocks_on_drop() {
        let manager = MemoryLockManager::new();
        let guard = manager.lock_guard("a").unwrap();
        assert_eq!(guard.key(), "a");
        assert!(manager.is_locked("a").unwrap());
        drop(guard);
        assert!(!manager.is_locked("a").unwrap());
    }

    #[test]
    fn nested_guards_track_hold_count() {
        let manager = MemoryLockManager::new();
        let outer = manager.lock_guard("a").unwrap();
        {
            let _inner = manager.lock_guard("a").unwrap();
            assert_eq!(manager.locks().unwrap()[0].hold_count, 2);
        }
        assert!(manager.is_locked("a").unwrap());
        drop(outer);
        assert!(!manager.is_locked("a").unwrap());
    }

    #[test]
    fn guard_works_through_trait_object() {
        let manager: Box<dyn LockManager> = Box::new(MemoryLockManager::new());
        let _guard = manager.lock_guard("a").unwrap();
        assert!(manager.is_locked("a").unwrap());
    }

    #[test]
    fn wait_for_lock_times_out_on_held_key() {
        let manager = Arc::new(MemoryLockManager::new());
        let holder = Arc::clone(&manager);
        let (locked_tx, locked_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            holder.lock("a").unwrap();
            locked_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            holder.unlock("a").unwrap();
        });
        locked_rx.recv().unwrap();

        let err = wait_for_lock(
            manager.as_ref(),
            "a",
            Duration::from_millis(5),
            Some(Duration::from_millis(30)),
        )
        .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_lock_succeeds_once_released() {
        let manager = Arc::new(MemoryLockManager::new());
        let holder = Arc::clone(&manager);
        let (locked_tx, locked_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            holder.lock("a").unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(20));
            holder.unlock("a").unwrap();
        });
        locked_rx.recv().unwrap();

        wait_for_lock(manager.as_ref(), "a", Duration::from_millis(2), None).unwrap();
        assert!(manager.is_locked("a").unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_lock_does_not_retry_invalid_keys() {
        let manager = AssertingLockManager::new(MemoryLockManager::new());
        let err = wait_for_lock(&manager, "", Duration::from_millis(1), None).unwrap_err();
        assert!(matches!(err, LockError::InvalidKey { .. }));
    }
}
