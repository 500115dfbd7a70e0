//! Ordered reads over the fragment graph.
//!
//! Traversal stays inside fragment runs joined by `Linked` boundaries. When
//! a read exhausts a fragment whose boundary is a `Gap`, a gap marker is
//! emitted at that position so the caller knows pagination is possible
//! there; an `Edge` simply ends the read. Gap markers do not count toward
//! the requested number of entries.
//!
//! The live fragment's end boundary is where sync appends, so forward reads
//! never surface a marker there.

use rusqlite::Connection;
use std::collections::HashSet;

use crate::model::{
    Boundary, Direction, EventKey, FragmentId, GapEntry, TimelineEntry,
};
use crate::store::{StoreError, events, fragments, rooms};

/// Read-only view over one room's persisted timeline.
#[derive(Debug, Clone)]
pub struct TimelineReader {
    room_id: String,
}

impl TimelineReader {
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Up to `count` entries ending at the newest entry of the live chain,
    /// in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage read fails or a link points at a
    /// missing fragment.
    pub fn read_from_end(
        &self,
        conn: &Connection,
        count: usize,
    ) -> Result<Vec<TimelineEntry>, StoreError> {
        let Some(live) = rooms::get(conn, &self.room_id)?.and_then(|r| r.live_fragment_id) else {
            return Ok(Vec::new());
        };
        self.walk(conn, live, None, Direction::Backward, count, Some(live))
    }

    /// Up to `count` entries strictly before (`Backward`) or after
    /// (`Forward`) `position`, in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage read fails or `position` names a
    /// missing fragment.
    pub fn read_from(
        &self,
        conn: &Connection,
        position: EventKey,
        direction: Direction,
        count: usize,
    ) -> Result<Vec<TimelineEntry>, StoreError> {
        let live = rooms::get(conn, &self.room_id)?.and_then(|r| r.live_fragment_id);
        self.walk(
            conn,
            position.fragment_id,
            Some(position.index),
            direction,
            count,
            live,
        )
    }

    fn walk(
        &self,
        conn: &Connection,
        start: FragmentId,
        from_index: Option<i64>,
        direction: Direction,
        count: usize,
        live: Option<FragmentId>,
    ) -> Result<Vec<TimelineEntry>, StoreError> {
        let mut out = Vec::new();
        if count == 0 {
            return Ok(out);
        }

        let mut remaining = count;
        let mut fragment = fragments::require(conn, start)?;
        let mut from = from_index;
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(fragment.id) {
                tracing::warn!(
                    room_id = %self.room_id,
                    fragment = %fragment.id,
                    "fragment links form a cycle; stopping read"
                );
                break;
            }

            let batch = events::range(conn, fragment.id, from, direction, remaining)?;
            remaining -= batch.len();
            out.extend(batch.into_iter().map(TimelineEntry::Event));
            if remaining == 0 {
                break;
            }

            match fragment.boundary(direction) {
                Boundary::Linked(neighbour) => {
                    fragment = fragments::require(conn, *neighbour)?;
                    from = None;
                }
                Boundary::Gap(token) => {
                    let live_edge = direction == Direction::Forward && live == Some(fragment.id);
                    if !live_edge {
                        out.push(TimelineEntry::Gap(GapEntry {
                            fragment_id: fragment.id,
                            direction,
                            token: token.clone(),
                        }));
                    }
                    break;
                }
                Boundary::Edge => break,
            }
        }

        if direction == Direction::Backward {
            out.reverse();
        }
        tracing::trace!(
            room_id = %self.room_id,
            %direction,
            returned = out.len(),
            "read timeline slice"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventEntry, TimelineEvent};
    use crate::store::Store;

    const ROOM: &str = "!r:hs";

    fn entry(fragment_id: FragmentId, index: i64, name: &str) -> EventEntry {
        EventEntry {
            key: EventKey { fragment_id, index },
            event: TimelineEvent {
                event_id: name.into(),
                sender: "@al:hs".into(),
                event_type: "m.room.message".into(),
                origin_server_ts: 0,
                predecessor: None,
                content: serde_json::Value::Null,
            },
        }
    }

    fn labels(entries: &[TimelineEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| match e {
                TimelineEntry::Event(ev) => ev.event.event_id.clone(),
                TimelineEntry::Gap(g) => format!("gap:{}:{}", g.fragment_id, g.direction),
            })
            .collect()
    }

    /// older [$a $b] <-> live [$c $d $e], older starts with a gap.
    fn two_linked_fragments() -> (Store, FragmentId, FragmentId) {
        let store = Store::open_in_memory().expect("open store");
        let ids = store
            .write(|tx| {
                let mut older = fragments::insert(
                    tx,
                    ROOM,
                    &Boundary::Gap("older-start".into()),
                    &Boundary::Edge,
                )?;
                let live = fragments::insert(
                    tx,
                    ROOM,
                    &Boundary::Linked(older.id),
                    &Boundary::Gap("sync-1".into()),
                )?;
                older.end = Boundary::Linked(live.id);
                fragments::update_boundaries(tx, &older)?;
                for (i, name) in ["$a", "$b"].iter().enumerate() {
                    events::insert(tx, ROOM, &entry(older.id, i64::try_from(i).unwrap_or(0), name))?;
                }
                for (i, name) in ["$c", "$d", "$e"].iter().enumerate() {
                    events::insert(tx, ROOM, &entry(live.id, i64::try_from(i).unwrap_or(0), name))?;
                }
                rooms::set_live(tx, ROOM, live.id, Some("sync-1"))?;
                Ok((older.id, live.id))
            })
            .expect("seed");
        (store, ids.0, ids.1)
    }

    #[test]
    fn read_from_end_walks_links_and_surfaces_gap() {
        let (store, older, _live) = two_linked_fragments();
        let reader = TimelineReader::new(ROOM);
        let all = store
            .read(|conn| reader.read_from_end(conn, 10))
            .expect("read");
        assert_eq!(
            labels(&all),
            [
                format!("gap:{older}:backward"),
                "$a".into(),
                "$b".into(),
                "$c".into(),
                "$d".into(),
                "$e".into()
            ]
        );
    }

    #[test]
    fn read_from_end_respects_count_without_marker() {
        let (store, _older, _live) = two_linked_fragments();
        let reader = TimelineReader::new(ROOM);
        let tail = store
            .read(|conn| reader.read_from_end(conn, 4))
            .expect("read");
        assert_eq!(labels(&tail), ["$b", "$c", "$d", "$e"]);
    }

    #[test]
    fn read_from_continues_backward_consistently() {
        let (store, older, live) = two_linked_fragments();
        let reader = TimelineReader::new(ROOM);
        let (tail, before) = store
            .read(|conn| {
                let tail = reader.read_from_end(conn, 2)?;
                let before = reader.read_from(
                    conn,
                    EventKey {
                        fragment_id: live,
                        index: 1,
                    },
                    Direction::Backward,
                    10,
                )?;
                Ok((tail, before))
            })
            .expect("read");
        assert_eq!(labels(&tail), ["$d", "$e"]);
        assert_eq!(
            labels(&before),
            [format!("gap:{older}:backward"), "$a".into(), "$b".into(), "$c".into()]
        );
    }

    #[test]
    fn forward_read_stops_silently_at_live_edge() {
        let (store, older, _live) = two_linked_fragments();
        let reader = TimelineReader::new(ROOM);
        let after = store
            .read(|conn| {
                reader.read_from(
                    conn,
                    EventKey {
                        fragment_id: older,
                        index: 0,
                    },
                    Direction::Forward,
                    10,
                )
            })
            .expect("read");
        assert_eq!(labels(&after), ["$b", "$c", "$d", "$e"]);
    }

    #[test]
    fn unknown_room_reads_empty() {
        let store = Store::open_in_memory().expect("open store");
        let reader = TimelineReader::new("!nobody:hs");
        let entries = store
            .read(|conn| reader.read_from_end(conn, 10))
            .expect("read");
        assert!(entries.is_empty());
    }
}
