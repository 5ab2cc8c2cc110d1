//! journal::janitor
//!
//! Journal cleanup bounded by consumer revision markers.
//!
//! Entries are deleted only below the lowest marker across every consumer,
//! cluster nodes and external sync processes alike. With no markers at all
//! nothing is deleted. A consumer that stops advancing its marker blocks
//! cleanup until it resumes; retention wins over reclaimed space.
//!
//! Deletion runs in batches of [`JournalJanitor::with_batch_size`] entries
//! so a long backlog never sits in one write transaction.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{JournalError, RevisionJournal, RevisionStore};
use crate::core::types::Revision;
use crate::sync::SYNC_REVISION_PREFIX;

/// Default number of entries deleted per statement.
pub const DEFAULT_CLEANUP_BATCH: usize = 1000;

/// What a cleanup pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Lowest marker found, if any
    pub lowest_revision: Option<Revision>,
    /// Markers sitting at the lowest revision
    pub blocked_by: Vec<String>,
    /// Entries deleted
    pub deleted: usize,
}

/// Deletes journal entries every consumer has processed.
#[derive(Debug)]
pub struct JournalJanitor<'a, J: ?Sized, S: ?Sized> {
    journal: &'a J,
    revisions: &'a S,
    batch_size: usize,
}

impl<'a, J, S> JournalJanitor<'a, J, S>
where
    J: RevisionJournal + ?Sized,
    S: RevisionStore + ?Sized,
{
    pub fn new(journal: &'a J, revisions: &'a S) -> Self {
        Self {
            journal,
            revisions,
            batch_size: DEFAULT_CLEANUP_BATCH,
        }
    }

    /// Delete at most `batch_size` entries per statement (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one cleanup pass.
    pub fn clean(&self) -> Result<CleanupReport, JournalError> {
        let markers = self.revisions.list()?;
        let Some(lowest) = markers.iter().map(|(_, rev)| *rev).min() else {
            debug!("no revision markers, keeping the whole journal");
            return Ok(CleanupReport {
                lowest_revision: None,
                blocked_by: Vec::new(),
                deleted: 0,
            });
        };

        let blocked_by: Vec<String> = markers
            .into_iter()
            .filter(|(_, rev)| *rev == lowest)
            .map(|(id, _)| id)
            .collect();

        if let Some(head) = self.journal.head_revision()? {
            if head > lowest {
                for id in blocked_by.iter().filter(|id| id.starts_with(SYNC_REVISION_PREFIX)) {
                    warn!(
                        marker = %id,
                        revision = lowest,
                        head,
                        "external sync marker is holding back journal cleanup"
                    );
                }
            }
        }

        let mut deleted = 0;
        loop {
            let batch = self.journal.delete_before(lowest, self.batch_size)?;
            deleted += batch;
            if batch < self.batch_size {
                break;
            }
            debug!(lowest, deleted, "journal cleanup batch done");
        }
        info!(lowest, deleted, "journal cleanup finished");
        Ok(CleanupReport {
            lowest_revision: Some(lowest),
            blocked_by,
            deleted,
        })
    }
}
