//! Fragment records.

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{StoreError, now_us};
use crate::model::{Boundary, Direction, Fragment, FragmentId};

const FRAGMENT_COLUMNS: &str = "fragment_id, room_id, start_kind, start_token, previous_id, \
                                end_kind, end_token, next_id";

struct RawFragment {
    id: i64,
    room_id: String,
    start: (String, Option<String>, Option<i64>),
    end: (String, Option<String>, Option<i64>),
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawFragment> {
    Ok(RawFragment {
        id: row.get(0)?,
        room_id: row.get(1)?,
        start: (row.get(2)?, row.get(3)?, row.get(4)?),
        end: (row.get(5)?, row.get(6)?, row.get(7)?),
    })
}

impl TryFrom<RawFragment> for Fragment {
    type Error = StoreError;

    fn try_from(raw: RawFragment) -> Result<Self, Self::Error> {
        let id = FragmentId(raw.id);
        let corrupt = |reason: String| StoreError::CorruptFragment { id, reason };
        let (kind, token, link) = raw.start;
        let start = Boundary::from_columns(&kind, token, link).map_err(corrupt)?;
        let (kind, token, link) = raw.end;
        let end = Boundary::from_columns(&kind, token, link).map_err(corrupt)?;
        Ok(Self {
            id,
            room_id: raw.room_id,
            start,
            end,
        })
    }
}

fn boundary_columns(boundary: &Boundary) -> (&'static str, Option<&str>, Option<i64>) {
    (
        boundary.kind_str(),
        boundary.token(),
        boundary.linked().map(|id| id.0),
    )
}

/// Create a fragment and return it with its freshly assigned id.
///
/// # Errors
///
/// Returns an error if the insert fails, including when a linked boundary
/// names a fragment that does not exist.
pub fn insert(
    conn: &Connection,
    room_id: &str,
    start: &Boundary,
    end: &Boundary,
) -> Result<Fragment, StoreError> {
    let (start_kind, start_token, previous_id) = boundary_columns(start);
    let (end_kind, end_token, next_id) = boundary_columns(end);
    conn.execute(
        "INSERT INTO fragments (
            room_id, start_kind, start_token, previous_id,
            end_kind, end_token, next_id, created_at_us
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            room_id,
            start_kind,
            start_token,
            previous_id,
            end_kind,
            end_token,
            next_id,
            now_us()
        ],
    )?;
    let fragment = Fragment {
        id: FragmentId(conn.last_insert_rowid()),
        room_id: room_id.to_string(),
        start: start.clone(),
        end: end.clone(),
    };
    tracing::debug!(
        fragment = %fragment.id,
        room_id,
        start = %fragment.start,
        end = %fragment.end,
        "created fragment"
    );
    Ok(fragment)
}

/// Persist both boundaries of an existing fragment.
///
/// # Errors
///
/// Returns [`StoreError::FragmentNotFound`] if no row was updated.
pub fn update_boundaries(conn: &Connection, fragment: &Fragment) -> Result<(), StoreError> {
    let (start_kind, start_token, previous_id) = boundary_columns(&fragment.start);
    let (end_kind, end_token, next_id) = boundary_columns(&fragment.end);
    let changed = conn.execute(
        "UPDATE fragments SET
            start_kind = ?2, start_token = ?3, previous_id = ?4,
            end_kind = ?5, end_token = ?6, next_id = ?7
         WHERE fragment_id = ?1",
        params![
            fragment.id.0,
            start_kind,
            start_token,
            previous_id,
            end_kind,
            end_token,
            next_id
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::FragmentNotFound(fragment.id));
    }
    Ok(())
}

/// Point lookup by fragment id.
///
/// # Errors
///
/// Returns an error if the query fails or the stored row is inconsistent.
pub fn get(conn: &Connection, id: FragmentId) -> Result<Option<Fragment>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {FRAGMENT_COLUMNS} FROM fragments WHERE fragment_id = ?1"),
            [id.0],
            raw_from_row,
        )
        .optional()?;
    raw.map(Fragment::try_from).transpose()
}

/// Like [`get`], but a missing fragment is an error.
///
/// # Errors
///
/// Returns [`StoreError::FragmentNotFound`] when the id is unknown.
pub fn require(conn: &Connection, id: FragmentId) -> Result<Fragment, StoreError> {
    get(conn, id)?.ok_or(StoreError::FragmentNotFound(id))
}

/// All fragments of a room, in creation order.
///
/// # Errors
///
/// Returns an error if the query fails or a row is inconsistent.
pub fn list_for_room(conn: &Connection, room_id: &str) -> Result<Vec<Fragment>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FRAGMENT_COLUMNS} FROM fragments WHERE room_id = ?1 ORDER BY fragment_id"
    ))?;
    let rows = stmt.query_map([room_id], raw_from_row)?;
    let mut out = Vec::new();
    for raw in rows {
        out.push(Fragment::try_from(raw?)?);
    }
    Ok(out)
}

/// Fragments of a room whose boundary on `side` is still an open gap.
///
/// # Errors
///
/// Returns an error if the query fails or a row is inconsistent.
pub fn with_open_gap(
    conn: &Connection,
    room_id: &str,
    side: Direction,
) -> Result<Vec<Fragment>, StoreError> {
    let column = match side {
        Direction::Backward => "start_kind",
        Direction::Forward => "end_kind",
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {FRAGMENT_COLUMNS} FROM fragments
         WHERE room_id = ?1 AND {column} = 'gap'
         ORDER BY fragment_id"
    ))?;
    let rows = stmt.query_map([room_id], raw_from_row)?;
    let mut out = Vec::new();
    for raw in rows {
        out.push(Fragment::try_from(raw?)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn insert_assigns_increasing_ids_and_round_trips() {
        let store = Store::open_in_memory().expect("open store");
        let (a, b) = store
            .write(|tx| {
                let a = insert(tx, "!r:hs", &Boundary::Edge, &Boundary::Gap("t1".into()))?;
                let b = insert(
                    tx,
                    "!r:hs",
                    &Boundary::Linked(a.id),
                    &Boundary::Gap("t2".into()),
                )?;
                Ok((a, b))
            })
            .expect("insert");
        assert!(b.id > a.id);

        let loaded = store
            .read(|conn| require(conn, b.id))
            .expect("load fragment");
        assert_eq!(loaded, b);
        assert_eq!(loaded.previous_id(), Some(a.id));
    }

    #[test]
    fn update_boundaries_and_open_gap_listing() {
        let store = Store::open_in_memory().expect("open store");
        let mut f = store
            .write(|tx| {
                insert(
                    tx,
                    "!r:hs",
                    &Boundary::Gap("s".into()),
                    &Boundary::Gap("e".into()),
                )
            })
            .expect("insert");

        f.end = Boundary::Edge;
        store
            .write(|tx| update_boundaries(tx, &f))
            .expect("update");

        let (forward, backward) = store
            .read(|conn| {
                Ok((
                    with_open_gap(conn, "!r:hs", Direction::Forward)?,
                    with_open_gap(conn, "!r:hs", Direction::Backward)?,
                ))
            })
            .expect("list");
        assert!(forward.is_empty());
        assert_eq!(backward, vec![f]);
    }

    #[test]
    fn missing_fragment_is_reported() {
        let store = Store::open_in_memory().expect("open store");
        let err = store
            .read(|conn| require(conn, FragmentId(42)))
            .expect_err("missing fragment");
        assert!(matches!(err, StoreError::FragmentNotFound(FragmentId(42))));
    }
}
