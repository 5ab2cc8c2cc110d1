//! lock::memory
//!
//! Process-local lock manager.

use super::registry::{LocalBackend, LockRegistry};
use super::{Lock, LockError, LockManager};

/// Lock manager backed by an in-memory registry.
///
/// Suitable for single-process deployments; gives no guarantee across
/// processes.
#[derive(Debug)]
pub struct MemoryLockManager {
    registry: LockRegistry<LocalBackend>,
}

impl MemoryLockManager {
    /// Create a manager with no locks held.
    pub fn new() -> Self {
        Self {
            registry: LockRegistry::new(LocalBackend),
        }
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for MemoryLockManager {
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
