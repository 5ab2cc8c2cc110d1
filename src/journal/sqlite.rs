//! journal::sqlite
//!
//! SQLite journal and revision markers.
//!
//! # Tables
//!
//! - `JOURNAL(REVISION_ID INTEGER PRIMARY KEY AUTOINCREMENT, JOURNAL_ID
//!   varchar(255), REVISION_DATE bigint, REVISION_DATA text)` - one row per
//!   commit group, events stored as JSON
//! - `LOCAL_REVISIONS(JOURNAL_ID varchar(255) primary key, REVISION_ID bigint
//!   not null)` - revision markers
//!
//! `AUTOINCREMENT` keeps revisions monotonic across cleanups.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{JournalEntry, JournalError, RevisionJournal, RevisionStore};
use crate::changelog::ChangeEvent;
use crate::core::types::{Revision, UtcTimestamp};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS JOURNAL (
        REVISION_ID INTEGER PRIMARY KEY AUTOINCREMENT,
        JOURNAL_ID varchar(255),
        REVISION_DATE bigint,
        REVISION_DATA text
    );
    CREATE TABLE IF NOT EXISTS LOCAL_REVISIONS (
        JOURNAL_ID varchar(255) PRIMARY KEY,
        REVISION_ID bigint NOT NULL
    );
";

/// Journal and revision markers in one SQLite database.
#[derive(Debug)]
pub struct SqliteJournal {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteJournal {
    /// Open (or create) the journal database at `path`.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory journal.
    pub fn open_in_memory() -> Result<Self, JournalError> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, JournalError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// The database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn decode(
        revision: Revision,
        journal_id: String,
        millis: i64,
        data: &str,
    ) -> Result<JournalEntry, JournalError> {
        let timestamp = UtcTimestamp::from_millis(millis).ok_or_else(|| JournalError::Corrupt {
            revision,
            message: format!("timestamp {} out of range", millis),
        })?;
        let events: Vec<ChangeEvent> =
            serde_json::from_str(data).map_err(|e| JournalError::Corrupt {
                revision,
                message: e.to_string(),
            })?;
        Ok(JournalEntry {
            revision,
            journal_id,
            timestamp,
            events,
        })
    }
}

impl RevisionJournal for SqliteJournal {
    fn append(&self, journal_id: &str, events: &[ChangeEvent]) -> Result<Revision, JournalError> {
        // REVISION_DATE holds milliseconds; stamp events with the same value.
        let now = UtcTimestamp::now();
        let timestamp = UtcTimestamp::from_millis(now.as_millis()).unwrap_or(now);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO JOURNAL (JOURNAL_ID, REVISION_DATE, REVISION_DATA) VALUES (?1, ?2, '[]')",
            params![journal_id, timestamp.as_millis()],
        )?;
        let revision = tx.last_insert_rowid();

        let stamped: Vec<ChangeEvent> = events
            .iter()
            .map(|event| ChangeEvent {
                revision,
                date: timestamp,
                ..event.clone()
            })
            .collect();
        let data = serde_json::to_string(&stamped).map_err(JournalError::Encode)?;
        tx.execute(
            "UPDATE JOURNAL SET REVISION_DATA = ?1 WHERE REVISION_ID = ?2",
            params![data, revision],
        )?;
        tx.commit()?;

        debug!(revision, journal_id = %journal_id, events = events.len(), "journal entry appended");
        Ok(revision)
    }

    fn read_after(
        &self,
        revision: Revision,
        max_entries: usize,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let limit = i64::try_from(max_entries).unwrap_or(i64::MAX);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT REVISION_ID, JOURNAL_ID, REVISION_DATE, REVISION_DATA FROM JOURNAL \
             WHERE REVISION_ID > ?1 ORDER BY REVISION_ID LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![revision, limit], |row| {
            Ok((
                row.get::<_, Revision>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
                row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (rev, journal_id, millis, data) = row?;
            entries.push(Self::decode(rev, journal_id, millis, &data)?);
        }
        debug!(after = revision, read = entries.len(), "journal entries read");
        Ok(entries)
    }

    fn head_revision(&self) -> Result<Option<Revision>, JournalError> {
        let conn = self.conn.lock();
        let head: Option<Revision> =
            conn.query_row("SELECT MAX(REVISION_ID) FROM JOURNAL", [], |row| row.get(0))?;
        Ok(head)
    }

    fn delete_before(&self, revision: Revision, max_entries: usize) -> Result<usize, JournalError> {
        let conn = self.conn.lock();
        let limit = i64::try_from(max_entries).unwrap_or(i64::MAX);
        let deleted = conn.execute(
            "DELETE FROM JOURNAL WHERE REVISION_ID IN (
                SELECT REVISION_ID FROM JOURNAL
                WHERE REVISION_ID < ?1
                ORDER BY REVISION_ID
                LIMIT ?2
             )",
            params![revision, limit],
        )?;
        Ok(deleted)
    }
}

impl RevisionStore for SqliteJournal {
    fn get(&self, id: &str) -> Result<Option<Revision>, JournalError> {
        let conn = self.conn.lock();
        let revision = conn
            .query_row(
                "SELECT REVISION_ID FROM LOCAL_REVISIONS WHERE JOURNAL_ID = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revision)
    }

    fn set(&self, id: &str, revision: Revision) -> Result<(), JournalError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO LOCAL_REVISIONS (JOURNAL_ID, REVISION_ID) VALUES (?1, ?2) \
             ON CONFLICT(JOURNAL_ID) DO UPDATE SET REVISION_ID = excluded.REVISION_ID",
            params![id, revision],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, Revision)>, JournalError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT JOURNAL_ID, REVISION_ID FROM LOCAL_REVISIONS ORDER BY JOURNAL_ID")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let markers: Vec<(String, Revision)> = rows.collect::<Result<_, _>>()?;
        Ok(markers)
    }

    fn lowest(&self) -> Result<Option<Revision>, JournalError> {
        let conn = self.conn.lock();
        let lowest: Option<Revision> =
            conn.query_row("SELECT MIN(REVISION_ID) FROM LOCAL_REVISIONS", [], |row| {
                row.get(0)
            })?;
        Ok(lowest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::EventType;
    use tempfile::TempDir;

    fn event(id: &str, path: &str, event_type: EventType) -> ChangeEvent {
        ChangeEvent::new(id, path, event_type, 0, UtcTimestamp::now())
    }

    #[test]
    fn append_assigns_increasing_revisions() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        let first = journal.append("node1", &[event("a", "/a", EventType::NodeAdded)]).unwrap();
        let second = journal.append("node1", &[event("b", "/b", EventType::NodeAdded)]).unwrap();
        assert!(second > first);
        assert_eq!(journal.head_revision().unwrap(), Some(second));
    }

    #[test]
    fn events_are_stamped_with_entry_revision() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        let revision = journal
            .append(
                "node1",
                &[
                    event("a", "/a", EventType::NodeAdded),
                    event("a", "/a/title", EventType::PropertyAdded),
                ],
            )
            .unwrap();

        let entries = journal.read_after(0, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].journal_id, "node1");
        assert_eq!(entries[0].events.len(), 2);
        for e in &entries[0].events {
            assert_eq!(e.revision, revision);
            assert_eq!(e.date, entries[0].timestamp);
        }
    }

    #[test]
    fn read_after_is_exclusive_and_limited() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        let revs: Vec<_> = (0..5)
            .map(|i| {
                journal
                    .append("node1", &[event(&i.to_string(), "/x", EventType::NodeAdded)])
                    .unwrap()
            })
            .collect();

        let entries = journal.read_after(revs[1], 2).unwrap();
        let read: Vec<_> = entries.iter().map(|e| e.revision).collect();
        assert_eq!(read, vec![revs[2], revs[3]]);
    }

    #[test]
    fn empty_journal_has_no_head() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        assert_eq!(journal.head_revision().unwrap(), None);
        assert!(journal.read_after(0, 10).unwrap().is_empty());
    }

    #[test]
    fn revisions_stay_monotonic_after_delete() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        let first = journal.append("n", &[]).unwrap();
        let second = journal.append("n", &[]).unwrap();
        assert_eq!(journal.delete_before(second + 1, 10).unwrap(), 2);
        let third = journal.append("n", &[]).unwrap();
        assert!(third > second && second > first);
    }

    #[test]
    fn delete_before_removes_oldest_first_up_to_the_batch() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        let revs: Vec<_> = (0..5).map(|_| journal.append("n", &[]).unwrap()).collect();

        assert_eq!(journal.delete_before(revs[4], 2).unwrap(), 2);
        let remaining: Vec<_> = journal
            .read_after(0, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.revision)
            .collect();
        assert_eq!(remaining, revs[2..].to_vec());

        assert_eq!(journal.delete_before(revs[4], 10).unwrap(), 2);
        assert_eq!(journal.delete_before(revs[4], 10).unwrap(), 0);
    }

    #[test]
    fn markers_upsert_and_list() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        assert_eq!(journal.get("b").unwrap(), None);
        assert_eq!(journal.lowest().unwrap(), None);

        journal.set("b", 7).unwrap();
        journal.set("a", 3).unwrap();
        journal.set("b", 9).unwrap();

        assert_eq!(journal.get("b").unwrap(), Some(9));
        assert_eq!(
            journal.list().unwrap(),
            vec![("a".to_string(), 3), ("b".to_string(), 9)]
        );
        assert_eq!(journal.lowest().unwrap(), Some(3));
    }

    #[test]
    fn file_journal_is_shared_between_handles() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db/journal.db");
        let writer = SqliteJournal::open(&path).unwrap();
        let reader = SqliteJournal::open(&path).unwrap();

        let revision = writer
            .append("node1", &[event("a", "/a", EventType::NodeRemoved)])
            .unwrap();
        writer.set("node1", revision).unwrap();

        assert_eq!(reader.head_revision().unwrap(), Some(revision));
        assert_eq!(reader.get("node1").unwrap(), Some(revision));
        assert_eq!(reader.path(), Some(path.as_path()));
    }

    #[test]
    fn corrupt_entry_is_reported() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        journal
            .conn
            .lock()
            .execute(
                "INSERT INTO JOURNAL (JOURNAL_ID, REVISION_DATE, REVISION_DATA) VALUES ('n', 0, 'nope')",
                [],
            )
            .unwrap();
        let err = journal.read_after(0, 10).unwrap_err();
        assert!(matches!(err, JournalError::Corrupt { .. }));
    }
}
