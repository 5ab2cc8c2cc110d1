//! journal
//!
//! The revision journal and the per-consumer revision markers read by the
//! sync service.
//!
//! # Architecture
//!
//! - [`RevisionJournal`] - append-only, revision-numbered commit groups
//! - [`RevisionStore`] - named "last processed" revision markers, one per
//!   cluster node or external consumer
//! - [`SqliteJournal`] - both, in one SQLite database
//! - [`JournalJanitor`] - deletes entries every consumer has processed
//!
//! Each [`JournalEntry`] is one commit group: the events of a single save,
//! all sharing the entry's revision. Entry boundaries are the persist
//! boundaries change logs split on.

mod janitor;
mod sqlite;

pub use janitor::{CleanupReport, JournalJanitor, DEFAULT_CLEANUP_BATCH};
pub use sqlite::SqliteJournal;

use serde::Serialize;
use thiserror::Error;

use crate::changelog::ChangeEvent;
use crate::core::types::{Revision, UtcTimestamp};

/// Errors from journal and revision-marker storage.
#[derive(Debug, Error)]
pub enum JournalError {
    /// SQL failure.
    #[error("journal sql error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to prepare the database location.
    #[error("journal i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Events could not be encoded for storage.
    #[error("failed to encode journal events: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored entry could not be decoded.
    #[error("journal entry {revision} is corrupt: {message}")]
    Corrupt { revision: Revision, message: String },
}

/// One commit group in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    /// Revision assigned to the commit group
    pub revision: Revision,
    /// Cluster node that wrote it
    pub journal_id: String,
    /// When it was written
    pub timestamp: UtcTimestamp,
    /// The changes, in commit order
    pub events: Vec<ChangeEvent>,
}

/// Append-only journal of commit groups.
pub trait RevisionJournal: Send + Sync {
    /// Append one commit group written by `journal_id`.
    ///
    /// The events are stamped with the assigned revision and the append
    /// time. Returns the new revision.
    fn append(&self, journal_id: &str, events: &[ChangeEvent]) -> Result<Revision, JournalError>;

    /// Up to `max_entries` entries with a revision greater than `revision`,
    /// oldest first.
    fn read_after(
        &self,
        revision: Revision,
        max_entries: usize,
    ) -> Result<Vec<JournalEntry>, JournalError>;

    /// Newest revision in the journal, if any.
    fn head_revision(&self) -> Result<Option<Revision>, JournalError>;

    /// Delete up to `max_entries` of the oldest entries with a revision
    /// below `revision`. Returns the number deleted.
    fn delete_before(&self, revision: Revision, max_entries: usize) -> Result<usize, JournalError>;
}

/// Named revision markers.
pub trait RevisionStore: Send + Sync {
    /// The marker for `id`, if set.
    fn get(&self, id: &str) -> Result<Option<Revision>, JournalError>;

    /// Create or overwrite the marker for `id`.
    fn set(&self, id: &str, revision: Revision) -> Result<(), JournalError>;

    /// All markers, sorted by id.
    fn list(&self) -> Result<Vec<(String, Revision)>, JournalError>;

    /// The lowest marker across all ids, if any exist.
    fn lowest(&self) -> Result<Option<Revision>, JournalError> {
        Ok(self.list()?.into_iter().map(|(_, rev)| rev).min())
    }
}

impl<T: RevisionJournal + ?Sized> RevisionJournal for std::sync::Arc<T> {
    fn append(&self, journal_id: &str, events: &[ChangeEvent]) -> Result<Revision, JournalError> {
        (**self).append(journal_id, events)
    }

    fn read_after(
        &self,
        revision: Revision,
        max_entries: usize,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        (**self).read_after(revision, max_entries)
    }

    fn head_revision(&self) -> Result<Option<Revision>, JournalError> {
        (**self).head_revision()
    }

    fn delete_before(&self, revision: Revision, max_entries: usize) -> Result<usize, JournalError> {
        (**self).delete_before(revision, max_entries)
    }
}

impl<T: RevisionStore + ?Sized> RevisionStore for std::sync::Arc<T> {
    fn get(&self, id: &str) -> Result<Option<Revision>, JournalError> {
        (**self).get(id)
    }

    fn set(&self, id: &str, revision: Revision) -> Result<(), JournalError> {
        (**self).set(id, revision)
    }

    fn list(&self) -> Result<Vec<(String, Revision)>, JournalError> {
        (**self).list()
    }

    fn lowest(&self) -> Result<Option<Revision>, JournalError> {
        (**self).lowest()
    }
}
