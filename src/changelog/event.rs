//! changelog::event
//!
//! Repository change events as they appear in the revision journal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::{Revision, UtcTimestamp};

/// Kind of a repository change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeAdded,
    NodeRemoved,
    NodeMoved,
    PropertyAdded,
    PropertyChanged,
    PropertyRemoved,
    /// End of a save operation. Carries no change of its own.
    Persist,
}

impl EventType {
    /// Whether this event concerns a property rather than a node.
    pub fn is_property_event(self) -> bool {
        matches!(
            self,
            Self::PropertyAdded | Self::PropertyChanged | Self::PropertyRemoved
        )
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeAdded => "node_added",
            Self::NodeRemoved => "node_removed",
            Self::NodeMoved => "node_moved",
            Self::PropertyAdded => "property_added",
            Self::PropertyChanged => "property_changed",
            Self::PropertyRemoved => "property_removed",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change to one repository item.
///
/// For property events `path` is the property's path, so the owning node's
/// path is `path` minus its last segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Stable id of the changed node
    pub identifier: String,
    /// Path of the changed item at the time of the change
    pub path: String,
    /// What happened
    pub event_type: EventType,
    /// Revision the change was committed in
    pub revision: Revision,
    /// When the change was committed
    pub date: UtcTimestamp,
}

impl ChangeEvent {
    /// Create an event.
    pub fn new(
        identifier: impl Into<String>,
        path: impl Into<String>,
        event_type: EventType,
        revision: Revision,
        date: UtcTimestamp,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.into(),
            event_type,
            revision,
            date,
        }
    }

    /// The property name for property events, `None` otherwise.
    pub fn property_name(&self) -> Option<&str> {
        if !self.event_type.is_property_event() {
            return None;
        }
        Some(last_segment(&self.path))
    }

    /// The path of the node a property event belongs to.
    ///
    /// A property directly on the root node has no usable parent path, so
    /// its own path is returned instead.
    pub fn node_path(&self) -> &str {
        match parent_path(&self.path) {
            Some(parent) if !parent.is_empty() => parent,
            _ => self.path.as_str(),
        }
    }
}

/// Everything after the last `/`.
pub(crate) fn last_segment(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Everything before the last `/`, or `None` if there is no `/`.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Whether `path` is `scope` or lies below it.
pub(crate) fn is_within(path: &str, scope: &str) -> bool {
    let scope = scope.trim_end_matches('/');
    if scope.is_empty() {
        // "/" covers everything
        return true;
    }
    match path.strip_prefix(scope) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
