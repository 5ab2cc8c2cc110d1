//! changelog
//!
//! Compact, deduplicated change records bounded by a revision range.
//!
//! # Architecture
//!
//! A [`ChangeLog`] is built by replaying journal events through
//! [`ChangeLog::record_change`]. Records are keyed by `(identifier, type)`,
//! so a node touched many times within the log's range yields one record per
//! kind of change. With squashing enabled, every property event collapses
//! into a single [`RecordType::NodeModified`] record on the owning node.
//!
//! # Example
//!
//! ```
//! use hippolock::changelog::{ChangeEvent, ChangeLog, EventType, RecordType};
//! use hippolock::core::types::UtcTimestamp;
//!
//! let mut log = ChangeLog::new(10);
//! let now = UtcTimestamp::now();
//! log.record_change(&ChangeEvent::new("n1", "/a/b/title", EventType::PropertyChanged, 11, now), true);
//! log.record_change(&ChangeEvent::new("n1", "/a/b/body", EventType::PropertyAdded, 12, now), true);
//!
//! assert_eq!(log.len(), 1);
//! assert_eq!(log.records()[0].path, "/a/b");
//! assert_eq!(log.records()[0].record_type, RecordType::NodeModified);
//! assert_eq!(log.end_revision(), 12);
//! ```

mod event;

pub use event::{ChangeEvent, EventType};
pub(crate) use event::is_within;

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::core::types::{Revision, UtcTimestamp};

/// Kind of a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// The raw event kind
    Event(EventType),
    /// One or more property changes on a node, squashed together
    NodeModified,
}

impl RecordType {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event(event_type) => event_type.as_str(),
            Self::NodeModified => "node_modified",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RecordType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One reported change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Stable id of the changed node
    pub identifier: String,
    /// Path at the time of the latest recorded change; may no longer exist
    pub path: String,
    /// Kind of change
    pub record_type: RecordType,
    /// Latest revision this change was seen in
    pub revision: Revision,
    /// Date of that revision
    pub date: UtcTimestamp,
}

/// Records for a contiguous revision range.
///
/// Both bounds are inclusive. Invariant: `start_revision() <= r.revision <=
/// end_revision()` for every record `r`. A log made with
/// [`ChangeLog::following`] that has covered nothing yet ends one below its
/// start.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeLog {
    start_revision: Revision,
    end_revision: Revision,
    records: Vec<Record>,
    #[serde(skip)]
    index: HashMap<(String, RecordType), usize>,
}

impl ChangeLog {
    /// Create an empty log starting (and ending) at `start_revision`.
    pub fn new(start_revision: Revision) -> Self {
        Self {
            start_revision,
            end_revision: start_revision,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Create an empty log for the revisions after `revision`.
    ///
    /// It starts at `revision + 1` and ends at `revision` until an event or
    /// [`extend_to`](Self::extend_to) widens it, so its end revision is
    /// always the last revision it has processed.
    pub fn following(revision: Revision) -> Self {
        Self {
            start_revision: revision.saturating_add(1),
            end_revision: revision,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Record `event`, returning `true` if a new record was created.
    ///
    /// A repeated `(identifier, type)` updates the existing record to the
    /// event's revision, date and path and returns `false`. Persist events
    /// are boundaries, not changes, and are never recorded.
    pub fn record_change(&mut self, event: &ChangeEvent, squash_events: bool) -> bool {
        if event.event_type == EventType::Persist {
            return false;
        }

        let (record_type, path) = if squash_events && event.event_type.is_property_event() {
            (RecordType::NodeModified, event.node_path())
        } else {
            (RecordType::Event(event.event_type), event.path.as_str())
        };

        self.cover(event.revision);

        let key = (event.identifier.clone(), record_type);
        if let Some(&idx) = self.index.get(&key) {
            let record = &mut self.records[idx];
            if event.revision >= record.revision {
                record.revision = event.revision;
                record.date = event.date;
                record.path = path.to_string();
            }
            return false;
        }

        self.index.insert(key, self.records.len());
        self.records.push(Record {
            identifier: event.identifier.clone(),
            path: path.to_string(),
            record_type,
            revision: event.revision,
            date: event.date,
        });
        true
    }

    /// Extend the end of the range to `revision` without recording anything.
    ///
    /// Used to seal the log at a commit-group boundary whose events were all
    /// filtered out.
    pub fn extend_to(&mut self, revision: Revision) {
        self.cover(revision);
    }

    fn cover(&mut self, revision: Revision) {
        self.start_revision = self.start_revision.min(revision);
        self.end_revision = self.end_revision.max(revision);
    }

    /// Records in first-seen order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Lowest revision covered, inclusive.
    pub fn start_revision(&self) -> Revision {
        self.start_revision
    }

    /// Highest revision covered, inclusive.
    pub fn end_revision(&self) -> Revision {
        self.end_revision
    }
}
