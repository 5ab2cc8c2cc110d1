//! lock::asserting
//!
//! Key-validating decorator for any [`LockManager`].

use super::{validate_key, Lock, LockError, LockManager};

/// Lock manager that rejects invalid keys before the wrapped manager sees
/// them.
///
/// Keys must be non-empty and at most [`MAX_KEY_LENGTH`](super::MAX_KEY_LENGTH)
/// characters. Invalid keys fail with [`LockError::InvalidKey`], never with
/// the backend's own errors. Everything else passes straight through.
#[derive(Debug)]
pub struct AssertingLockManager<M> {
    inner: M,
}

impl<M: LockManager> AssertingLockManager<M> {
    /// Wrap `inner`.
    pub fn new(inner: M) -> Self {
        Self { inner }
    }

    /// The wrapped manager.
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: LockManager> LockManager for AssertingLockManager<M> {
    fn lock(&self, key: &str) -> Result<(), LockError> {
        validate_key(key)?;
        self.inner.lock(key)
    }

    fn unlock(&self, key: &str) -> Result<(), LockError> {
        validate_key(key)?;
        self.inner.unlock(key)
    }

    fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        validate_key(key)?;
        self.inner.is_locked(key)
    }

    fn locks(&self) -> Result<Vec<Lock>, LockError> {
        self.inner.locks()
    }

    fn destroy(&self) {
        self.inner.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MAX_KEY_LENGTH;
    use parking_lot::Mutex;

    /// Records every call that reaches it.
    #[derive(Default)]
    struct SpyManager {
        calls: Mutex<Vec<String>>,
    }

    impl SpyManager {
        fn record(&self, call: &str) {
            self.calls.lock().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl LockManager for SpyManager {
        fn lock(&self, key: &str) -> Result<(), LockError> {
            self.record(&format!("lock {}", key));
            Ok(())
        }

        fn unlock(&self, key: &str) -> Result<(), LockError> {
            self.record(&format!("unlock {}", key));
            Ok(())
        }

        fn is_locked(&self, key: &str) -> Result<bool, LockError> {
            self.record(&format!("is_locked {}", key));
            Ok(false)
        }

        fn locks(&self) -> Result<Vec<Lock>, LockError> {
            self.record("locks");
            Ok(vec![])
        }

        fn destroy(&self) {
            self.record("destroy");
        }
    }

    #[test]
    fn empty_key_never_reaches_backend() {
        let manager = AssertingLockManager::new(SpyManager::default());
        assert!(matches!(manager.lock(""), Err(LockError::InvalidKey { .. })));
        assert!(matches!(manager.unlock(""), Err(LockError::InvalidKey { .. })));
        assert!(matches!(
            manager.is_locked(""),
            Err(LockError::InvalidKey { .. })
        ));
        assert!(manager.inner().calls().is_empty());
    }

    #[test]
    fn oversized_key_never_reaches_backend() {
        let manager = AssertingLockManager::new(SpyManager::default());
        let key = "x".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(manager.lock(&key), Err(LockError::InvalidKey { .. })));
        assert!(manager.inner().calls().is_empty());
    }

    #[test]
    fn valid_calls_pass_through() {
        let manager = AssertingLockManager::new(SpyManager::default());
        let key = "x".repeat(MAX_KEY_LENGTH);
        manager.lock(&key).unwrap();
        manager.unlock("a").unwrap();
        assert!(!manager.is_locked("a").unwrap());
        manager.locks().unwrap();
        manager.destroy();
        assert_eq!(
            manager.inner().calls(),
            vec![
                format!("lock {}", key),
                "unlock a".to_string(),
                "is_locked a".to_string(),
                "locks".to_string(),
                "destroy".to_string(),
            ]
        );
    }
}
