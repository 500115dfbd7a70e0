//! Schema versioning for the timeline store.
//!
//! The version is tracked in `PRAGMA user_version` alone. Each step runs in
//! its own transaction together with the version bump, so a crash between
//! steps leaves the database at the last completed version.

use super::{StoreError, schema};
use rusqlite::Connection;

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(1, schema::MIGRATION_V1_SQL)];

/// Read `PRAGMA user_version`. A value that does not fit `u32` is treated
/// as newer than anything this binary knows.
///
/// # Errors
///
/// Returns an error if querying SQLite fails.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(u32::try_from(version).unwrap_or(u32::MAX))
}

/// Bring the schema up to [`LATEST_SCHEMA_VERSION`].
///
/// Returns the version the database is at afterwards.
///
/// # Errors
///
/// [`StoreError::SchemaTooNew`] when the file was written by a newer build;
/// otherwise any SQLite failure while applying a step.
pub fn migrate(conn: &mut Connection) -> Result<u32, StoreError> {
    let mut current = current_schema_version(conn)?;
    if current > LATEST_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported: LATEST_SCHEMA_VERSION,
        });
    }

    let start = current;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        tracing::info!(from = current, to = version, "migrated timeline store schema");
        current = *version;
    }

    Ok(current)
}
