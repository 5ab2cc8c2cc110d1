//! core::types
//!
//! Small shared types used across the lock, journal and change-log modules.
//!
//! # Types
//!
//! - [`Revision`] - Journal revision number
//! - [`UtcTimestamp`] - RFC3339 timestamp with millisecond storage helpers
//!
//! # Examples
//!
//! ```
//! use hippolock::core::types::UtcTimestamp;
//!
//! let ts = UtcTimestamp::from_millis(1_700_000_000_000).unwrap();
//! assert_eq!(ts.as_millis(), 1_700_000_000_000);
//! ```

use serde::{Deserialize, Serialize};

/// A journal revision number.
///
/// Revisions are assigned by the journal in strictly increasing order.
/// Consumers that have not read anything yet start from revision `0`.
pub type Revision = i64;

/// A UTC timestamp.
///
/// Serialized as RFC3339. Databases store it as milliseconds since the
/// Unix epoch, see [`UtcTimestamp::as_millis`].
///
/// # Example
///
/// ```
/// use hippolock::core::types::UtcTimestamp;
///
/// let now = UtcTimestamp::now();
/// println!("Current time: {}", now);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Create a timestamp from milliseconds since the Unix epoch.
    ///
    /// Returns `None` if the value is out of chrono's representable range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        chrono::DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
