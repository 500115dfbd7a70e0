//! Per-room pointers: the live fragment and the last sync token.

use rusqlite::{Connection, OptionalExtension, params};

use super::StoreError;
use crate::model::FragmentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRow {
    pub room_id: String,
    /// Fragment that receives live sync appends.
    pub live_fragment_id: Option<FragmentId>,
    pub sync_token: Option<String>,
}

/// # Errors
///
/// Returns an error if the query fails.
pub fn get(conn: &Connection, room_id: &str) -> Result<Option<RoomRow>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT room_id, live_fragment_id, sync_token FROM rooms WHERE room_id = ?1",
            [room_id],
            |row| {
                Ok(RoomRow {
                    room_id: row.get(0)?,
                    live_fragment_id: row.get::<_, Option<i64>>(1)?.map(FragmentId),
                    sync_token: row.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Point the room at a new live fragment and record the sync token.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn set_live(
    conn: &Connection,
    room_id: &str,
    live_fragment_id: FragmentId,
    sync_token: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO rooms (room_id, live_fragment_id, sync_token) VALUES (?1, ?2, ?3)
         ON CONFLICT(room_id) DO UPDATE SET
            live_fragment_id = excluded.live_fragment_id,
            sync_token = excluded.sync_token",
        params![room_id, live_fragment_id.0, sync_token],
    )?;
    Ok(())
}

/// Every room with a stored timeline.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list(conn: &Connection) -> Result<Vec<RoomRow>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT room_id, live_fragment_id, sync_token FROM rooms ORDER BY room_id")?;
    let rows = stmt.query_map([], |row| {
        Ok(RoomRow {
            room_id: row.get(0)?,
            live_fragment_id: row.get::<_, Option<i64>>(1)?.map(FragmentId),
            sync_token: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
