//! Timeline event records, keyed by `(fragment_id, event_index)`.

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::StoreError;
use crate::model::{Direction, EventEntry, EventKey, FragmentId, TimelineEvent};

const EVENT_COLUMNS: &str = "fragment_id, event_index, event_id, sender, event_type, \
                             origin_server_ts, predecessor_id, content_json";

struct RawEvent {
    key: EventKey,
    event_id: String,
    sender: String,
    event_type: String,
    origin_server_ts: i64,
    predecessor: Option<String>,
    content_json: String,
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        key: EventKey {
            fragment_id: FragmentId(row.get(0)?),
            index: row.get(1)?,
        },
        event_id: row.get(2)?,
        sender: row.get(3)?,
        event_type: row.get(4)?,
        origin_server_ts: row.get(5)?,
        predecessor: row.get(6)?,
        content_json: row.get(7)?,
    })
}

impl TryFrom<RawEvent> for EventEntry {
    type Error = StoreError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            key: raw.key,
            event: TimelineEvent {
                event_id: raw.event_id,
                sender: raw.sender,
                event_type: raw.event_type,
                origin_server_ts: raw.origin_server_ts,
                predecessor: raw.predecessor,
                content: serde_json::from_str(&raw.content_json)?,
            },
        })
    }
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<RawEvent>>,
) -> Result<Vec<EventEntry>, StoreError> {
    let mut out = Vec::new();
    for raw in rows {
        out.push(EventEntry::try_from(raw?)?);
    }
    Ok(out)
}

/// Persist one entry.
///
/// # Errors
///
/// Fails on a duplicate key or a duplicate event id within the room.
pub fn insert(conn: &Connection, room_id: &str, entry: &EventEntry) -> Result<(), StoreError> {
    let content = serde_json::to_string(&entry.event.content)?;
    conn.execute(
        "INSERT INTO timeline_events (
            room_id, fragment_id, event_index, event_id, sender,
            event_type, origin_server_ts, predecessor_id, content_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            room_id,
            entry.key.fragment_id.0,
            entry.key.index,
            entry.event.event_id,
            entry.event.sender,
            entry.event.event_type,
            entry.event.origin_server_ts,
            entry.event.predecessor,
            content
        ],
    )?;
    Ok(())
}

/// Look an event up by its id within a room.
///
/// # Errors
///
/// Returns an error if the query fails or stored content is not valid JSON.
pub fn find_by_event_id(
    conn: &Connection,
    room_id: &str,
    event_id: &str,
) -> Result<Option<EventEntry>, StoreError> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM timeline_events WHERE room_id = ?1 AND event_id = ?2"),
        params![room_id, event_id],
        raw_from_row,
    )
    .optional()?
    .map(EventEntry::try_from)
    .transpose()
}

/// Events stored with `predecessor` as their predecessor id.
///
/// # Errors
///
/// Returns an error if the query fails or stored content is not valid JSON.
pub fn find_successors(
    conn: &Connection,
    room_id: &str,
    predecessor: &str,
) -> Result<Vec<EventEntry>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM timeline_events
         WHERE room_id = ?1 AND predecessor_id = ?2
         ORDER BY fragment_id, event_index"
    ))?;
    let rows = stmt.query_map(params![room_id, predecessor], raw_from_row)?;
    collect(rows)
}

/// Ordered range scan within one fragment.
///
/// `after` is exclusive and interpreted relative to `direction`: entries
/// strictly before it for backward scans, strictly after it for forward
/// scans. `None` starts at the fragment's newest (backward) or oldest
/// (forward) entry. Results come back in scan order.
///
/// # Errors
///
/// Returns an error if the query fails or stored content is not valid JSON.
pub fn range(
    conn: &Connection,
    fragment_id: FragmentId,
    after: Option<i64>,
    direction: Direction,
    limit: usize,
) -> Result<Vec<EventEntry>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let sql = match direction {
        Direction::Backward => format!(
            "SELECT {EVENT_COLUMNS} FROM timeline_events
             WHERE fragment_id = ?1 AND event_index < ?2
             ORDER BY event_index DESC LIMIT ?3"
        ),
        Direction::Forward => format!(
            "SELECT {EVENT_COLUMNS} FROM timeline_events
             WHERE fragment_id = ?1 AND event_index > ?2
             ORDER BY event_index ASC LIMIT ?3"
        ),
    };
    let bound = after.unwrap_or(match direction {
        Direction::Backward => i64::MAX,
        Direction::Forward => i64::MIN,
    });
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![fragment_id.0, bound, limit], raw_from_row)?;
    collect(rows)
}

/// The entry at the `side` edge of a fragment: its oldest for backward,
/// its newest for forward.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn edge(
    conn: &Connection,
    fragment_id: FragmentId,
    side: Direction,
) -> Result<Option<EventEntry>, StoreError> {
    Ok(range(conn, fragment_id, None, side.reverse(), 1)?
        .into_iter()
        .next())
}

/// Lowest index stored in a fragment.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn first_index(conn: &Connection, fragment_id: FragmentId) -> Result<Option<i64>, StoreError> {
    Ok(conn.query_row(
        "SELECT MIN(event_index) FROM timeline_events WHERE fragment_id = ?1",
        [fragment_id.0],
        |row| row.get(0),
    )?)
}

/// Highest index stored in a fragment.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn last_index(conn: &Connection, fragment_id: FragmentId) -> Result<Option<i64>, StoreError> {
    Ok(conn.query_row(
        "SELECT MAX(event_index) FROM timeline_events WHERE fragment_id = ?1",
        [fragment_id.0],
        |row| row.get(0),
    )?)
}

/// Number of events stored in a fragment.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_in_fragment(conn: &Connection, fragment_id: FragmentId) -> Result<usize, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM timeline_events WHERE fragment_id = ?1",
        [fragment_id.0],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}
