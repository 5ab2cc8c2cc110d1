//! lock::registry
//!
//! The keyed hold-count state machine shared by every lock backend.
//!
//! # States
//!
//! Per key: `Unlocked` (absent from the map) -> `Locked(owner, 1)` ->
//! `Locked(owner, N)` on reentrant acquisition -> back to `Unlocked` when
//! the hold count reaches zero. A lock is never kept at a hold count of zero.
//!
//! # Backends
//!
//! A [`LockBackend`] supplies the per-key resource that makes a lock real
//! beyond this process: nothing for the in-memory manager, a row lock for
//! the database manager. The registry acquires the resource when a key goes
//! from `Unlocked` to `Locked` and releases it when the key goes back.
//!
//! # Concurrency
//!
//! One mutex guards the whole map. Every public operation runs inside it,
//! including the backend round trip, so a single key observes one
//! linearizable history.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::owner::OwnerRef;
use super::{Lock, LockError};
use crate::core::types::UtcTimestamp;

/// Per-key resource provider for a [`LockRegistry`].
pub trait LockBackend: Send + Sync {
    /// Resource held for as long as the key is locked.
    type Handle: Send;

    /// Acquire the resource for `key`, failing fast if it is taken.
    fn acquire(&self, key: &str) -> Result<Self::Handle, LockError>;

    /// Release the resource for `key`.
    ///
    /// Failures are the backend's to log; the key is unlocked locally
    /// regardless.
    fn release(&self, key: &str, handle: Self::Handle);
}

/// Backend with no resource: the registry alone is the lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl LockBackend for LocalBackend {
    type Handle = ();

    fn acquire(&self, _key: &str) -> Result<(), LockError> {
        Ok(())
    }

    fn release(&self, _key: &str, _handle: ()) {}
}

struct HeldLock<H> {
    owner: OwnerRef,
    creation_time: UtcTimestamp,
    hold_count: u32,
    handle: H,
}

impl<H> HeldLock<H> {
    fn snapshot(&self, key: &str) -> Lock {
        Lock {
            key: key.to_string(),
            owner: self.owner.name().to_string(),
            owner_thread: self.owner.id(),
            creation_time: self.creation_time,
            hold_count: self.hold_count,
        }
    }
}

/// Registry of held locks over a backend.
pub struct LockRegistry<B: LockBackend> {
    backend: B,
    locks: Mutex<HashMap<String, HeldLock<B::Handle>>>,
}

impl<B: LockBackend> LockRegistry<B> {
    /// Create an empty registry.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The backend this registry acquires resources from.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Acquire `key` for the calling thread.
    pub fn lock(&self, key: &str) -> Result<(), LockError> {
        let me = OwnerRef::current();
        let mut locks = self.locks.lock();

        if let Some(held) = locks.get_mut(key) {
            if !held.owner.is_alive() {
                warn!(
                    key = %key,
                    previous_owner = %held.owner,
                    new_owner = %me,
                    "lock was never unlocked by its owner thread, which is gone; transferring it"
                );
                held.owner = me;
                held.hold_count = 1;
                held.creation_time = UtcTimestamp::now();
                return Ok(());
            }
            if held.owner.is_current() {
                held.hold_count += 1;
                debug!(key = %key, hold_count = held.hold_count, "lock re-entered");
                return Ok(());
            }
            return Err(LockError::Held {
                key: key.to_string(),
                owner: held.owner.name().to_string(),
            });
        }

        let handle = self.backend.acquire(key)?;
        debug!(key = %key, owner = %me, "lock acquired");
        locks.insert(
            key.to_string(),
            HeldLock {
                owner: me,
                creation_time: UtcTimestamp::now(),
                hold_count: 1,
                handle,
            },
        );
        Ok(())
    }

    /// Release one hold of `key`.
    pub fn unlock(&self, key: &str) -> Result<(), LockError> {
        let mut locks = self.locks.lock();

        let Some(held) = locks.get_mut(key) else {
            return Ok(());
        };

        if !held.owner.is_alive() {
            // Another thread may be unlocking a key that a dead thread
            // abandoned; the lock is dropped either way.
            warn!(
                key = %key,
                owner = %held.owner,
                "unlocking a lock whose owner thread is gone; removing it"
            );
            self.remove(&mut locks, key);
            return Ok(());
        }

        if !held.owner.is_current() {
            return Err(LockError::NotOwner {
                key: key.to_string(),
                owner: held.owner.name().to_string(),
            });
        }

        match held.hold_count.checked_sub(1) {
            Some(0) => {
                self.remove(&mut locks, key);
                debug!(key = %key, "lock released");
            }
            Some(remaining) => {
                held.hold_count = remaining;
                debug!(key = %key, hold_count = remaining, "lock hold released");
            }
            None => {
                error!(
                    key = %key,
                    "hold count would drop below zero; removing the lock"
                );
                self.remove(&mut locks, key);
            }
        }
        Ok(())
    }

    /// Whether `key` is held by a live thread.
    ///
    /// Locks of dead threads are swept first.
    pub fn is_locked(&self, key: &str) -> bool {
        let mut locks = self.locks.lock();
        self.sweep(&mut locks);
        locks.contains_key(key)
    }

    /// Snapshot of all locks held by live threads, sorted by key.
    pub fn locks(&self) -> Vec<Lock> {
        let mut locks = self.locks.lock();
        self.sweep(&mut locks);
        let mut snapshot: Vec<Lock> = locks
            .iter()
            .map(|(key, held)| held.snapshot(key))
            .collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    /// Release every remaining lock.
    pub fn destroy(&self) {
        let mut locks = self.locks.lock();
        for (key, held) in locks.drain() {
            warn!(
                key = %key,
                owner = %held.owner,
                hold_count = held.hold_count,
                "lock was never unlocked; releasing it at shutdown"
            );
            self.backend.release(&key, held.handle);
        }
    }

    fn remove(&self, locks: &mut HashMap<String, HeldLock<B::Handle>>, key: &str) {
        if let Some(held) = locks.remove(key) {
            self.backend.release(key, held.handle);
        }
    }

    fn sweep(&self, locks: &mut HashMap<String, HeldLock<B::Handle>>) {
        let dead: Vec<String> = locks
            .iter()
            .filter(|(_, held)| !held.owner.is_alive())
            .map(|(key, _)| key.clone())
            .collect();
        for key in dead {
            if let Some(held) = locks.get(&key) {
                warn!(
                    key = %key,
                    owner = %held.owner,
                    "removing lock of a thread that exited without unlocking it"
                );
            }
            self.remove(locks, &key);
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_abandoned(&self, key: &str, handle: B::Handle) {
        self.locks.lock().insert(
            key.to_string(),
            HeldLock {
                owner: OwnerRef::detached("abandoned"),
                creation_time: UtcTimestamp::now(),
                hold_count: 3,
                handle,
            },
        );
    }
}

impl<B: LockBackend> std::fmt::Debug for LockRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("held", &self.locks.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Backend counting acquisitions and releases.
    #[derive(Default)]
    struct CountingBackend {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl LockBackend for CountingBackend {
        type Handle = ();

        fn acquire(&self, _key: &str) -> Result<(), LockError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self, _key: &str, _handle: ()) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn reentrant_lock_acquires_backend_once() {
        let registry = LockRegistry::new(CountingBackend::default());
        registry.lock("a").unwrap();
        registry.lock("a").unwrap();
        registry.lock("a").unwrap();
        assert_eq!(registry.backend().acquired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.locks()[0].hold_count, 3);

        registry.unlock("a").unwrap();
        registry.unlock("a").unwrap();
        assert!(registry.is_locked("a"));
        assert_eq!(registry.backend().released.load(Ordering::SeqCst), 0);

        registry.unlock("a").unwrap();
        assert!(!registry.is_locked("a"));
        assert_eq!(registry.backend().released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unlock_of_absent_key_is_noop() {
        let registry = LockRegistry::new(CountingBackend::default());
        registry.unlock("missing").unwrap();
        assert_eq!(registry.backend().released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn abandoned_lock_is_transferred_with_fresh_hold_count() {
        let registry = LockRegistry::new(CountingBackend::default());
        registry.insert_abandoned("a", ());

        registry.lock("a").unwrap();
        let locks = registry.locks();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].hold_count, 1);
        assert_eq!(locks[0].owner_thread, thread::current().id());
        // The resource was already held, it is not acquired again.
        assert_eq!(registry.backend().acquired.load(Ordering::SeqCst), 0);

        registry.unlock("a").unwrap();
        assert!(!registry.is_locked("a"));
    }

    #[test]
    fn abandoned_lock_is_swept_by_is_locked() {
        let registry = LockRegistry::new(CountingBackend::default());
        registry.insert_abandoned("a", ());
        assert!(!registry.is_locked("a"));
        assert_eq!(registry.backend().released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abandoned_lock_is_removed_by_unlock_from_any_thread() {
        let registry = LockRegistry::new(CountingBackend::default());
        registry.insert_abandoned("a", ());
        registry.unlock("a").unwrap();
        assert!(registry.locks().is_empty());
    }

    #[test]
    fn other_thread_cannot_lock_or_unlock() {
        let registry = Arc::new(LockRegistry::new(CountingBackend::default()));
        registry.lock("a").unwrap();

        let other = Arc::clone(&registry);
        let (lock_result, unlock_result) = thread::spawn(move || {
            let lock_result = other.lock("a");
            let unlock_result = other.unlock("a");
            (lock_result, unlock_result)
        })
        .join()
        .unwrap();

        assert!(matches!(lock_result, Err(LockError::Held { .. })));
        assert!(matches!(unlock_result, Err(LockError::NotOwner { .. })));
        assert!(registry.is_locked("a"));
    }

    #[test]
    fn destroy_releases_everything() {
        let registry = LockRegistry::new(CountingBackend::default());
        registry.lock("a").unwrap();
        registry.lock("b").unwrap();
        registry.lock("b").unwrap();

        registry.destroy();
        assert!(registry.locks().is_empty());
        assert_eq!(registry.backend().released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn locks_are_sorted_by_key() {
        let registry = LockRegistry::new(LocalBackend);
        registry.lock("c").unwrap();
        registry.lock("a").unwrap();
        registry.lock("b").unwrap();
        let keys: Vec<String> = registry.locks().into_iter().map(|l| l.key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn failed_backend_acquire_leaves_key_unlocked() {
        struct Refusing;
        impl LockBackend for Refusing {
            type Handle = ();
            fn acquire(&self, key: &str) -> Result<(), LockError> {
                Err(LockError::Held {
                    key: key.to_string(),
                    owner: "other-process".into(),
                })
            }
            fn release(&self, _key: &str, _handle: ()) {}
        }

        let registry = LockRegistry::new(Refusing);
        assert!(matches!(registry.lock("a"), Err(LockError::Held { .. })));
        assert!(!registry.is_locked("a"));
    }
}
