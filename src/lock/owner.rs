//! lock::owner
//!
//! Lock ownership by threads, observed without keeping threads alive.
//!
//! # Design
//!
//! Every thread lazily creates a thread-local [`ThreadMarker`] the first time
//! it takes part in locking. A lock records an [`OwnerRef`] holding only a
//! weak reference to that marker. When the thread exits, its thread-local
//! storage is torn down, the marker is dropped, and the weak reference stops
//! upgrading: the owner is considered dead and its locks can be reclaimed.
//!
//! This is best-effort leak recovery for threads that exit without
//! unlocking. It says nothing about a live thread that simply forgot to
//! unlock.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Liveness marker owned by a thread's local storage.
#[derive(Debug)]
pub struct ThreadMarker {
    id: ThreadId,
    name: String,
}

thread_local! {
    static CURRENT: Arc<ThreadMarker> = {
        let current = thread::current();
        let name = match current.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", current.id()),
        };
        Arc::new(ThreadMarker { id: current.id(), name })
    };
}

/// Reference to the thread owning a lock.
#[derive(Debug, Clone)]
pub struct OwnerRef {
    id: ThreadId,
    name: String,
    marker: Weak<ThreadMarker>,
}

impl OwnerRef {
    /// Reference to the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|marker| Self {
            id: marker.id,
            name: marker.name.clone(),
            marker: Arc::downgrade(marker),
        })
    }

    /// An owner whose thread has already exited.
    #[cfg(test)]
    pub(crate) fn detached(name: impl Into<String>) -> Self {
        let mut owner = thread::spawn(Self::current)
            .join()
            .expect("owner thread panicked");
        owner.name = name.into();
        owner
    }

    /// Whether the owning thread is still running.
    pub fn is_alive(&self) -> bool {
        self.marker.strong_count() > 0
    }

    /// Whether the owning thread is the calling thread.
    pub fn is_current(&self) -> bool {
        self.id == thread::current().id()
    }

    /// The owning thread's id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Display name: the thread name, or its id for unnamed threads.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_thread_is_alive_and_current() {
        let owner = OwnerRef::current();
        assert!(owner.is_alive());
        assert!(owner.is_current());
        assert_eq!(owner.id(), thread::current().id());
    }

    #[test]
    fn named_thread_uses_its_name() {
        let name = thread::Builder::new()
            .name("editor-7".into())
            .spawn(|| OwnerRef::current().name().to_string())
            .expect("spawn")
            .join()
            .expect("join");
        assert_eq!(name, "editor-7");
    }

    #[test]
    fn owner_dies_with_its_thread() {
        let owner = thread::spawn(OwnerRef::current).join().expect("join");
        assert!(!owner.is_alive());
        assert!(!owner.is_current());
    }

    #[test]
    fn detached_owner_is_dead() {
        let owner = OwnerRef::detached("ghost");
        assert!(!owner.is_alive());
        assert!(!owner.is_current());
        assert_eq!(owner.to_string(), "ghost");
    }
}
