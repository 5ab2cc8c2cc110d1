//! lock::store
//!
//! Row-lock stores backing [`DbLockManager`](super::DbLockManager).
//!
//! # Tables
//!
//! - `hippolock(lockKey varchar(256) not null, ...)` - one row per key ever
//!   locked; the row lock is the cross-process lock
//! - `hippolockoverview(lockKey varchar(256) not null, lockTime bigint not null)`
//!   - when each key was last acquired, for operators only; never consulted
//!   for exclusion
//!
//! Both are created on first use if absent.
//!
//! # Acquisition protocol
//!
//! The manager calls [`RowLockStore::lock_row`], which must never wait for
//! another holder: it either locks the row, reports the row missing, or
//! reports it busy. A missing row is inserted (tolerating a concurrent
//! insert from another node) and the locking select retried.
//!
//! # SQLite
//!
//! SQLite has no row-level locks. [`SqliteRowLockStore`] models the locked
//! row as a claim: a single conditional `UPDATE` writes the store's unique
//! owner token into `hippolock.lockOwner` only when the column is empty.
//! The statement either claims the row or changes nothing, so it never
//! waits on another holder. `busy_timeout` bounds how long a statement may
//! wait for SQLite's own database lock (the statement timeout). The
//! returned [`SqliteRowLock`] is the lock; releasing it clears the claim.
//!
//! # Owner leases
//!
//! A claim is a row value, so it outlives the process that wrote it. To
//! make that recoverable, a file-backed store holds an exclusive OS lock on
//! `<database>-owners/<token id>.lock` for its whole lifetime. The OS drops
//! that lock when the process exits, however it exits. A claim whose lease
//! can be locked by another store (or whose lease file is gone) belongs to a
//! dead store and is taken over by the next [`RowLockStore::lock_row`].
//!
//! Leases only prove liveness between processes on one host, which is where
//! SQLite databases are shared. Operators can still list claims with
//! [`SqliteRowLockStore::claimed_rows`] and clear one by hand with
//! [`SqliteRowLockStore::force_release`].

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::types::UtcTimestamp;

/// Default bound on how long a single lock statement may take.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from row-lock stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQL failure.
    #[error("lock store sql error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to prepare the database location.
    #[error("lock store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The store is not configured.
    #[error("lock store not configured: {0}")]
    NotConfigured(String),

    /// The row could not be found even after inserting it.
    #[error("lock row for '{0}' is missing after insert")]
    MissingRow(String),

    /// The claim on a row was cleared by someone else while held.
    #[error("claim on lock row '{0}' was lost")]
    ClaimLost(String),
}

/// Outcome of a non-waiting attempt to lock a row.
#[derive(Debug)]
pub enum RowLockAttempt<R> {
    /// The row is now locked by this store.
    Locked(R),
    /// No row exists for the key yet.
    Missing,
    /// Another holder has the row locked.
    Busy {
        /// The holder, when the store can tell.
        holder: Option<String>,
    },
}

/// A relational store providing non-waiting row locks.
pub trait RowLockStore: Send + Sync {
    /// The held row lock. Holding this value is holding the lock.
    type Row: Send;

    /// Create the lock tables if absent.
    fn create_tables(&self) -> Result<(), StoreError>;

    /// Try to lock the row for `key` without waiting.
    fn lock_row(&self, key: &str) -> Result<RowLockAttempt<Self::Row>, StoreError>;

    /// Insert the row for `key`, tolerating a row inserted concurrently.
    fn insert_row(&self, key: &str) -> Result<(), StoreError>;

    /// Record when `key` was acquired in the overview table.
    fn touch_overview(&self, key: &str, time: UtcTimestamp) -> Result<(), StoreError>;

    /// Release a held row lock.
    fn release_row(&self, row: Self::Row) -> Result<(), StoreError>;
}

/// A row claimed in the lock table, as listed for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimedRow {
    /// The lock key.
    pub key: String,
    /// Owner token of the claiming store.
    pub owner: String,
    /// Last acquisition time from the overview table.
    pub lock_time: Option<UtcTimestamp>,
}

/// A row lock held through a [`SqliteRowLockStore`].
#[derive(Debug)]
pub struct SqliteRowLock {
    key: String,
}

impl SqliteRowLock {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Exclusive OS lock proving a store is alive.
///
/// Released by the OS if the process dies; unlocked and removed on drop.
#[derive(Debug)]
struct OwnerLease {
    path: PathBuf,
    file: Option<File>,
}

impl OwnerLease {
    fn acquire(path: PathBuf) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }
}

impl Drop for OwnerLease {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs::remove_file(&self.path);
            let _ = file.unlock();
        }
    }
}

/// Directory holding the owner leases of stores on `database`.
fn owners_dir(database: &Path) -> PathBuf {
    let mut dir = OsString::from(database.as_os_str());
    dir.push("-owners");
    PathBuf::from(dir)
}

/// SQLite-backed row-lock store.
///
/// Each store instance has a unique owner token. Two stores on the same
/// database file exclude each other exactly like two cluster nodes sharing
/// a database.
#[derive(Debug)]
pub struct SqliteRowLockStore {
    conn: Mutex<Connection>,
    owner: String,
    path: Option<PathBuf>,
    lease: Option<OwnerLease>,
}

impl SqliteRowLockStore {
    /// Open (or create) the lock database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or database cannot be
    /// created or configured.
    pub fn open(path: &Path, statement_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        let mut store = Self::with_connection(conn, statement_timeout, Some(path.to_path_buf()))?;

        let leases = owners_dir(path);
        fs::create_dir_all(&leases)?;
        store.lease = Some(OwnerLease::acquire(
            leases.join(format!("{}.lock", store.owner_id())),
        )?);
        Ok(store)
    }

    /// Open a private in-memory lock database.
    ///
    /// Nothing else can see this database, so it only excludes threads of
    /// managers sharing this one store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, DEFAULT_STATEMENT_TIMEOUT, None)
    }

    fn with_connection(
        conn: Connection,
        statement_timeout: Duration,
        path: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(statement_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            owner: format!("{}:{}", std::process::id(), Uuid::new_v4()),
            path,
            lease: None,
        })
    }

    /// The unique part of the owner token, naming its lease file.
    fn owner_id(&self) -> &str {
        self.owner
            .split_once(':')
            .map_or(self.owner.as_str(), |(_, id)| id)
    }

    /// Whether the store that wrote `holder` is known to be gone.
    ///
    /// Always `false` for in-memory databases and for tokens that do not
    /// name a lease.
    fn holder_is_gone(&self, holder: &str) -> Result<bool, StoreError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let Some(id) = holder
            .split_once(':')
            .and_then(|(_, id)| Uuid::parse_str(id).ok())
        else {
            return Ok(false);
        };

        let lease = owners_dir(path).join(format!("{}.lock", id));
        let file = match OpenOptions::new().read(true).write(true).open(&lease) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = fs::remove_file(&lease);
                let _ = file.unlock();
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// This store's owner token, written into the rows it claims.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// List every claimed row, sorted by key.
    pub fn claimed_rows(&self) -> Result<Vec<ClaimedRow>, StoreError> {
        self.create_tables()?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT l.lockKey, l.lockOwner, o.lockTime
             FROM hippolock l
             LEFT JOIN hippolockoverview o ON o.lockKey = l.lockKey
             WHERE l.lockOwner IS NOT NULL
             ORDER BY l.lockKey",
        )?;
        let rows = stmt.query_map([], |row| {
            let lock_time: Option<i64> = row.get(2)?;
            Ok(ClaimedRow {
                key: row.get(0)?,
                owner: row.get(1)?,
                lock_time: lock_time.and_then(UtcTimestamp::from_millis),
            })
        })?;
        let claimed = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(claimed)
    }

    /// Clear the claim on `key` regardless of who made it.
    ///
    /// Returns `true` if a claim was cleared. Only for claims left behind
    /// by a process that is known to be gone.
    pub fn force_release(&self, key: &str) -> Result<bool, StoreError> {
        self.create_tables()?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE hippolock SET lockOwner = NULL WHERE lockKey = ?1 AND lockOwner IS NOT NULL",
            params![key],
        )?;
        Ok(changed > 0)
    }
}

impl RowLockStore for SqliteRowLockStore {
    type Row = SqliteRowLock;

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS hippolock (
                lockKey varchar(256) NOT NULL PRIMARY KEY,
                lockOwner varchar(64)
            );
            CREATE TABLE IF NOT EXISTS hippolockoverview (
                lockKey varchar(256) NOT NULL PRIMARY KEY,
                lockTime bigint NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock_row(&self, key: &str) -> Result<RowLockAttempt<SqliteRowLock>, StoreError> {
        let conn = self.conn.lock();
        // A claim can be released by its holder between our two statements;
        // one retry covers that window.
        for _ in 0..2 {
            let claimed = conn.execute(
                "UPDATE hippolock SET lockOwner = ?1 WHERE lockKey = ?2 AND lockOwner IS NULL",
                params![self.owner, key],
            )?;
            if claimed == 1 {
                return Ok(RowLockAttempt::Locked(SqliteRowLock {
                    key: key.to_string(),
                }));
            }

            let holder: Option<Option<String>> = conn
                .query_row(
                    "SELECT lockOwner FROM hippolock WHERE lockKey = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            match holder {
                None => return Ok(RowLockAttempt::Missing),
                Some(Some(holder)) if holder != self.owner && self.holder_is_gone(&holder)? => {
                    let taken = conn.execute(
                        "UPDATE hippolock SET lockOwner = ?1 WHERE lockKey = ?2 AND lockOwner = ?3",
                        params![self.owner, key, holder],
                    )?;
                    if taken == 1 {
                        warn!(
                            key = %key,
                            previous_owner = %holder,
                            "lock row was claimed by a process that is gone; taking it over"
                        );
                        return Ok(RowLockAttempt::Locked(SqliteRowLock {
                            key: key.to_string(),
                        }));
                    }
                    debug!(key = %key, "stale claim changed before takeover, retrying");
                }
                Some(Some(holder)) => {
                    return Ok(RowLockAttempt::Busy {
                        holder: Some(holder),
                    })
                }
                Some(None) => continue,
            }
        }
        Ok(RowLockAttempt::Busy { holder: None })
    }

    fn insert_row(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO hippolock (lockKey) VALUES (?1)",
            params![key],
        )?;
        Ok(())
    }

    fn touch_overview(&self, key: &str, time: UtcTimestamp) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO hippolockoverview (lockKey, lockTime) VALUES (?1, ?2)",
            params![key, time.as_millis()],
        )?;
        Ok(())
    }

    fn release_row(&self, row: SqliteRowLock) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let released = conn.execute(
            "UPDATE hippolock SET lockOwner = NULL WHERE lockKey = ?1 AND lockOwner = ?2",
            params![row.key, self.owner],
        )?;
        if released == 0 {
            return Err(StoreError::ClaimLost(row.key));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_pair(dir: &TempDir) -> (SqliteRowLockStore, SqliteRowLockStore) {
        let path = dir.path().join("locks.db");
        let first = SqliteRowLockStore::open(&path, DEFAULT_STATEMENT_TIMEOUT).expect("open");
        let second = SqliteRowLockStore::open(&path, DEFAULT_STATEMENT_TIMEOUT).expect("open");
        first.create_tables().expect("tables");
        (first, second)
    }

    #[test]
    fn missing_row_is_reported() {
        let store = SqliteRowLockStore::open_in_memory().expect("open");
        store.create_tables().expect("tables");
        assert!(matches!(
            store.lock_row("a").expect("lock_row"),
            RowLockAttempt::Missing
        ));
    }

    #[test]
    fn insert_is_idempotent() {
        let store = SqliteRowLockStore::open_in_memory().expect("open");
        store.create_tables().expect("tables");
        store.insert_row("a").expect("insert");
        store.insert_row("a").expect("insert again");
        assert!(matches!(
            store.lock_row("a").expect("lock_row"),
            RowLockAttempt::Locked(_)
        ));
    }

    #[test]
    fn second_store_sees_row_busy() {
        let dir = TempDir::new().expect("tempdir");
        let (first, second) = open_pair(&dir);
        first.insert_row("a").expect("insert");

        let row = match first.lock_row("a").expect("lock_row") {
            RowLockAttempt::Locked(row) => row,
            other => panic!("expected lock, got {:?}", other),
        };
        match second.lock_row("a").expect("lock_row") {
            RowLockAttempt::Busy { holder } => assert_eq!(holder.as_deref(), Some(first.owner())),
            other => panic!("expected busy, got {:?}", other),
        }

        first.release_row(row).expect("release");
        assert!(matches!(
            second.lock_row("a").expect("lock_row"),
            RowLockAttempt::Locked(_)
        ));
    }

    #[test]
    fn claimed_rows_lists_holders_and_times() {
        let dir = TempDir::new().expect("tempdir");
        let (first, _second) = open_pair(&dir);
        first.insert_row("b").expect("insert");
        first.insert_row("a").expect("insert");
        let _a = first.lock_row("a").expect("lock_row");
        let when = UtcTimestamp::from_millis(1_700_000_000_000).expect("in range");
        first.touch_overview("a", when).expect("touch");

        let rows = first.claimed_rows().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "a");
        assert_eq!(rows[0].owner, first.owner());
        assert_eq!(rows[0].lock_time, Some(when));
    }

    #[test]
    fn each_file_store_holds_a_lease() {
        let dir = TempDir::new().expect("tempdir");
        let (first, _second) = open_pair(&dir);
        let lease = owners_dir(&dir.path().join("locks.db"))
            .join(format!("{}.lock", first.owner_id()));
        assert!(lease.exists());

        drop(first);
        assert!(!lease.exists());
    }

    #[test]
    fn claim_of_dead_store_is_taken_over() {
        let dir = TempDir::new().expect("tempdir");
        let (mut first, second) = open_pair(&dir);
        first.insert_row("a").expect("insert");
        let _row = first.lock_row("a").expect("lock_row");

        // A crash closes the lease handle without removing the file.
        let mut lease = first.lease.take().expect("file store has a lease");
        drop(lease.file.take());
        assert!(lease.path.exists());

        match second.lock_row("a").expect("lock_row") {
            RowLockAttempt::Locked(row) => assert_eq!(row.key(), "a"),
            other => panic!("expected takeover, got {:?}", other),
        }
        assert_eq!(second.claimed_rows().expect("rows")[0].owner, second.owner());
        assert!(!lease.path.exists());
    }

    #[test]
    fn claim_of_live_store_is_not_taken_over() {
        let dir = TempDir::new().expect("tempdir");
        let (first, second) = open_pair(&dir);
        first.insert_row("a").expect("insert");
        let _row = first.lock_row("a").expect("lock_row");

        assert!(matches!(
            second.lock_row("a").expect("lock_row"),
            RowLockAttempt::Busy { .. }
        ));
        assert_eq!(second.claimed_rows().expect("rows")[0].owner, first.owner());
    }

    #[test]
    fn malformed_holder_is_never_taken_over() {
        let dir = TempDir::new().expect("tempdir");
        let (first, _second) = open_pair(&dir);
        first.insert_row("a").expect("insert");
        first
            .conn
            .lock()
            .execute(
                "UPDATE hippolock SET lockOwner = 'legacy-holder' WHERE lockKey = 'a'",
                [],
            )
            .expect("write claim");

        match first.lock_row("a").expect("lock_row") {
            RowLockAttempt::Busy { holder } => assert_eq!(holder.as_deref(), Some("legacy-holder")),
            other => panic!("expected busy, got {:?}", other),
        }
    }

    #[test]
    fn force_release_clears_foreign_claim() {
        let dir = TempDir::new().expect("tempdir");
        let (first, second) = open_pair(&dir);
        first.insert_row("a").expect("insert");
        let row = match first.lock_row("a").expect("lock_row") {
            RowLockAttempt::Locked(row) => row,
            other => panic!("expected lock, got {:?}", other),
        };

        assert!(second.force_release("a").expect("force"));
        assert!(!second.force_release("a").expect("force again"));
        assert!(matches!(
            first.release_row(row),
            Err(StoreError::ClaimLost(_))
        ));
    }
}
