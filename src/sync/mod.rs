//! sync
//!
//! Revision tracking and change logs for external consumers.
//!
//! # Architecture
//!
//! An external consumer (a replicator, an indexer) keeps its own "last
//! processed" revision as a marker in the [`RevisionStore`], next to the
//! markers of the cluster nodes. Its marker id is its key with
//! [`SYNC_REVISION_PREFIX`] in front, so the two kinds can never collide.
//! Because journal cleanup stops at the lowest marker, a consumer that
//! never advances its marker holds back cleanup indefinitely.
//!
//! [`SyncRevisionService::change_logs`] replays the journal after a
//! revision into a sequence of [`ChangeLog`]s. Each commit group ends the
//! current log (if it has records), so a log boundary never splits a
//! commit group.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hippolock::journal::SqliteJournal;
//! use hippolock::sync::{ChangeLogQuery, SyncRevisionService};
//!
//! let journal = Arc::new(SqliteJournal::open_in_memory().unwrap());
//! let service = SyncRevisionService::new(Arc::clone(&journal), journal);
//!
//! let marker = service.sync_revision("replicator").unwrap();
//! let from = if marker.exists().unwrap() { marker.get().unwrap() } else { 0 };
//! let logs = service.change_logs(&ChangeLogQuery::new(from)).unwrap();
//! marker.set(logs.last().unwrap().end_revision()).unwrap();
//! ```

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::changelog::{is_within, ChangeEvent, ChangeLog};
use crate::core::config::SyncConfig;
use crate::core::types::Revision;
use crate::journal::{JournalError, RevisionJournal, RevisionStore};

/// Prefix of every external sync marker id.
pub const SYNC_REVISION_PREFIX: &str = "_HIPPO_EXTERNAL_REPO_SYNC_";

/// Longest allowed marker id, prefix included.
pub const MAX_QUALIFIED_ID_LENGTH: usize = 255;

/// Journal entries read per round trip.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Errors from the sync service.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The key cannot be used as a marker id.
    #[error("invalid sync key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// `get` was called on a marker that was never set.
    #[error("sync revision '{0}' has not been set; check exists() first")]
    NotSet(String),

    /// Journal or marker storage failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// One external consumer's revision marker.
#[derive(Debug)]
pub struct SyncRevision<'a, S: ?Sized> {
    key: String,
    qualified_id: String,
    store: &'a S,
}

impl<S: RevisionStore + ?Sized> SyncRevision<'_, S> {
    /// The consumer's key, without the prefix.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The stored marker id.
    pub fn qualified_id(&self) -> &str {
        &self.qualified_id
    }

    /// Whether the marker has been set.
    pub fn exists(&self) -> Result<bool, SyncError> {
        Ok(self.store.get(&self.qualified_id)?.is_some())
    }

    /// The stored revision.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotSet`] if the marker does not exist yet.
    pub fn get(&self) -> Result<Revision, SyncError> {
        self.store
            .get(&self.qualified_id)?
            .ok_or_else(|| SyncError::NotSet(self.qualified_id.clone()))
    }

    /// Persist `revision` as the marker's value.
    pub fn set(&self, revision: Revision) -> Result<(), SyncError> {
        self.store.set(&self.qualified_id, revision)?;
        debug!(marker = %self.qualified_id, revision, "sync revision stored");
        Ok(())
    }
}

/// An external marker as listed for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMarker {
    /// Consumer key, without the prefix
    pub key: String,
    /// Last revision the consumer processed
    pub revision: Revision,
}

/// Parameters of a change-log query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogQuery {
    /// Report changes after this revision
    pub from_revision: Revision,
    /// Stop after the commit group that brings the record count to this
    pub soft_limit: Option<usize>,
    /// Only report changes at or below these paths; empty means everywhere
    pub scopes: Vec<String>,
    /// Never report changes to properties with these names
    pub ignored_property_names: Vec<String>,
    /// Collapse property changes into one record per node
    pub squash_events: bool,
}

impl ChangeLogQuery {
    /// Unlimited, unscoped query with squashing on.
    pub fn new(from_revision: Revision) -> Self {
        Self {
            from_revision,
            soft_limit: None,
            scopes: Vec::new(),
            ignored_property_names: Vec::new(),
            squash_events: true,
        }
    }

    /// Query using the configured defaults.
    pub fn from_config(from_revision: Revision, config: &SyncConfig) -> Self {
        Self {
            from_revision,
            soft_limit: config.soft_limit,
            scopes: config.scopes.clone(),
            ignored_property_names: config.ignored_property_names.clone(),
            squash_events: config.squash_events,
        }
    }

    /// Stop collecting at the first commit-group boundary after `soft_limit`
    /// new records.
    pub fn with_soft_limit(mut self, soft_limit: usize) -> Self {
        self.soft_limit = Some(soft_limit);
        self
    }

    /// Also report changes at or below the absolute path `scope`.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Never report changes to properties named `property_name`.
    pub fn ignoring(mut self, property_name: impl Into<String>) -> Self {
        self.ignored_property_names.push(property_name.into());
        self
    }

    /// Collapse property events into one record per node.
    pub fn squash_events(mut self, squash: bool) -> Self {
        self.squash_events = squash;
        self
    }

    fn includes(&self, event: &ChangeEvent) -> bool {
        if let Some(name) = event.property_name() {
            if self.ignored_property_names.iter().any(|n| n == name) {
                return false;
            }
        }
        self.scopes.is_empty() || self.scopes.iter().any(|s| is_within(&event.path, s))
    }
}

/// Sync markers and change logs over a journal.
#[derive(Debug)]
pub struct SyncRevisionService<J, S> {
    journal: J,
    revisions: S,
    batch_size: usize,
}

impl<J: RevisionJournal, S: RevisionStore> SyncRevisionService<J, S> {
    /// Create a service reading `journal` and storing markers in `revisions`.
    pub fn new(journal: J, revisions: S) -> Self {
        Self {
            journal,
            revisions,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Read the journal `batch_size` entries at a time.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The journal change logs are read from.
    pub fn journal(&self) -> &J {
        &self.journal
    }

    /// The store holding every revision marker.
    pub fn revisions(&self) -> &S {
        &self.revisions
    }

    /// The marker for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidKey`] if `key` is empty or the prefixed
    /// id would be longer than [`MAX_QUALIFIED_ID_LENGTH`].
    pub fn sync_revision(&self, key: &str) -> Result<SyncRevision<'_, S>, SyncError> {
        if key.is_empty() {
            return Err(SyncError::InvalidKey {
                key: key.to_string(),
                reason: "key must not be empty".into(),
            });
        }
        let qualified_id = format!("{}{}", SYNC_REVISION_PREFIX, key);
        let length = qualified_id.chars().count();
        if length > MAX_QUALIFIED_ID_LENGTH {
            return Err(SyncError::InvalidKey {
                key: key.to_string(),
                reason: format!(
                    "qualified id is {} characters, the maximum is {}",
                    length, MAX_QUALIFIED_ID_LENGTH
                ),
            });
        }
        Ok(SyncRevision {
            key: key.to_string(),
            qualified_id,
            store: &self.revisions,
        })
    }

    /// Every external marker, keys without the prefix.
    pub fn sync_markers(&self) -> Result<Vec<SyncMarker>, SyncError> {
        let markers = self
            .revisions
            .list()?
            .into_iter()
            .filter_map(|(id, revision)| {
                id.strip_prefix(SYNC_REVISION_PREFIX).map(|key| SyncMarker {
                    key: key.to_string(),
                    revision,
                })
            })
            .collect();
        Ok(markers)
    }

    /// Replay the journal after `query.from_revision` into change logs.
    ///
    /// Always returns at least one log. Logs end on commit-group
    /// boundaries, so the soft limit may be exceeded by the rest of the
    /// group that reaches it. The last log may be empty; its end revision
    /// is still where the next query should start.
    pub fn change_logs(&self, query: &ChangeLogQuery) -> Result<Vec<ChangeLog>, SyncError> {
        let mut logs = Vec::new();
        let mut current = ChangeLog::following(query.from_revision);
        let mut total = 0usize;
        let mut cursor = query.from_revision;

        'read: loop {
            let entries = self.journal.read_after(cursor, self.batch_size)?;
            if entries.is_empty() {
                break;
            }

            for entry in entries {
                cursor = entry.revision;
                for event in entry.events.iter().filter(|e| query.includes(e)) {
                    if current.record_change(event, query.squash_events) {
                        total += 1;
                    }
                }
                current.extend_to(entry.revision);

                if query.soft_limit.is_some_and(|limit| total >= limit) {
                    debug!(total, revision = entry.revision, "change-log soft limit reached");
                    break 'read;
                }
                if !current.is_empty() {
                    debug!(
                        start = current.start_revision(),
                        end = current.end_revision(),
                        records = current.len(),
                        "change log sealed"
                    );
                    let next = ChangeLog::following(current.end_revision());
                    logs.push(std::mem::replace(&mut current, next));
                }
            }
        }

        logs.push(current);
        Ok(logs)
    }
}
