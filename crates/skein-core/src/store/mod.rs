//! SQLite-backed timeline store.
//!
//! The store is the single source of truth: the in-memory timeline is only a
//! cache that can always be rebuilt by reading from here.
//!
//! Runtime defaults mirror the projection database conventions:
//! - `journal_mode = WAL` so readers do not block the writer
//! - `busy_timeout` from [`StoreConfig`] to ride out transient lock contention
//! - `foreign_keys = ON` so fragment links always point at real fragments
//!
//! Access goes through [`Store::read`] and [`Store::write`]. Write
//! transactions use `BEGIN IMMEDIATE`, which serialises competing gap fills
//! on the same boundary: the second writer only starts once the first has
//! committed, and then observes the advanced boundary.

pub mod events;
pub mod fragments;
pub mod migrations;
pub mod rooms;
pub mod schema;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::ErrorCode;
use crate::model::FragmentId;

/// Errors raised by the timeline store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("event content could not be encoded: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to create store directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("fragment {0} not found")]
    FragmentNotFound(FragmentId),

    #[error("corrupt fragment {id}: {reason}")]
    CorruptFragment { id: FragmentId, reason: String },

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("store schema v{found} is newer than supported v{supported}")]
    SchemaTooNew { found: u32, supported: u32 },
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Sqlite(_) | Self::Json(_) | Self::CreateDir { .. } => ErrorCode::StorageFailure,
            Self::FragmentNotFound(_) => ErrorCode::FragmentNotFound,
            Self::CorruptFragment { .. } => ErrorCode::CorruptFragment,
            Self::Task(_) => ErrorCode::StorageTaskFailed,
            Self::SchemaTooNew { .. } => ErrorCode::SchemaTooNew,
        }
    }
}

/// Handle to the timeline database. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store, apply runtime pragmas, and migrate the
    /// schema to the latest version.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or opening,
    /// configuring, or migrating the database fails.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        configure_connection(&conn, config.busy_timeout())?;
        migrations::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened timeline store");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory store, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if migrating the fresh database fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction drops the Transaction, which rolls back,
        // so the connection itself is still usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside a read transaction, giving it a consistent snapshot.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` or from SQLite.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside an immediate write transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error rolls
    /// everything back.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` or from SQLite (including commit failure).
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Remove every event, fragment, and room pointer for `room_id`.
    ///
    /// This is the teardown path only; normal operation never deletes.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete transaction fails.
    pub fn purge_room(&self, room_id: &str) -> Result<usize, StoreError> {
        self.write(|tx| {
            tx.execute("DELETE FROM rooms WHERE room_id = ?1", [room_id])?;
            let events = tx.execute("DELETE FROM timeline_events WHERE room_id = ?1", [room_id])?;
            tx.execute(
                "UPDATE fragments SET previous_id = NULL, next_id = NULL,
                     start_kind = 'edge', start_token = NULL,
                     end_kind = 'edge', end_token = NULL
                 WHERE room_id = ?1",
                [room_id],
            )?;
            tx.execute("DELETE FROM fragments WHERE room_id = ?1", [room_id])?;
            tracing::info!(room_id, events, "purged room timeline");
            Ok(events)
        })
    }
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Current wall-clock time in microseconds, for bookkeeping columns.
pub(crate) fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}
