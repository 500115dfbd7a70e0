//! Atomic merge of fetched history pages into the fragment graph.
//!
//! # Fill protocol
//!
//! Everything happens inside one immediate write transaction:
//!
//! 1. **Freshness**: the gap's boundary must still carry the token the page
//!    was fetched with. If another fill already advanced or closed it, the
//!    write is a no-op and the result is marked `stale`.
//! 2. **Append**: page events extend the gap's fragment: backward fills
//!    take indices below the current oldest entry, forward fills above the
//!    newest. Events already stored in the room are skipped.
//! 3. **Boundary**: the filled boundary becomes `Linked` when the page
//!    connects to another fragment, `Gap(next_token)` when the server has
//!    more, or `Edge` when it has none.
//!
//! # Chain-merge rule
//!
//! A page connects to another fragment `O` whose facing boundary is still a
//! gap (`O`'s end for backward fills, `O`'s start for forward fills) when:
//!
//! - **overlap**: a page event is already stored as `O`'s facing edge entry;
//!   writing stops at that event, or
//! - **predecessor adjacency**: after writing, this fragment's edge entry
//!   and `O`'s facing edge entry are declared adjacent through the
//!   `predecessor` field of the later of the two.
//!
//! Matches against a fragment that is already in the same chain are
//! ignored, so a fill can never create a cycle.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::comparer::FragmentIdComparer;
use crate::model::{
    Boundary, Direction, EventEntry, EventKey, Fragment, FragmentId, GapEntry, TimelineEvent,
};
use crate::pagination::Page;
use crate::store::{Store, StoreError, events, fragments};

/// Result of one gap fill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapFill {
    /// Newly written entries, oldest first.
    pub entries: Vec<EventEntry>,
    /// The boundary marker after the fill; `None` once the gap is closed.
    pub gap: Option<GapEntry>,
    /// Fragment the filled boundary now links to, if the page joined chains.
    pub linked: Option<FragmentId>,
    /// The boundary had already moved on; nothing was written.
    pub stale: bool,
}

/// The events around a target event, as returned by a context lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPage {
    /// Id of the event the context was requested for.
    pub anchor: String,
    /// Events in chronological order, including the anchor.
    pub events: Vec<TimelineEvent>,
    /// Token for paginating backward from the oldest event.
    #[serde(default)]
    pub start: Option<String>,
    /// Token for paginating forward from the newest event.
    #[serde(default)]
    pub end: Option<String>,
}

/// Result of writing a context page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFill {
    /// Where the anchor event is stored, if the page contained it.
    pub anchor: Option<EventKey>,
    /// Newly written entries, oldest first.
    pub entries: Vec<EventEntry>,
    /// The fragment created for the page, if one was needed.
    pub created: Option<FragmentId>,
}

struct Staged<T> {
    outcome: T,
    touched: Vec<Fragment>,
}

/// Writes fetched pages for one room.
#[derive(Debug, Clone)]
pub struct GapWriter {
    room_id: String,
    comparer: Arc<FragmentIdComparer>,
}

impl GapWriter {
    #[must_use]
    pub fn new(room_id: impl Into<String>, comparer: Arc<FragmentIdComparer>) -> Self {
        Self {
            room_id: room_id.into(),
            comparer,
        }
    }

    /// Merge `page`, fetched from `gap`, into storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; in that case nothing was
    /// written and the comparer is untouched.
    pub fn write_fragment_fill(
        &self,
        store: &Store,
        gap: &GapEntry,
        page: &Page,
    ) -> Result<GapFill, StoreError> {
        let staged = store.write(|tx| self.fill_in_txn(tx, gap, page))?;
        self.register(&staged.touched);
        Ok(staged.outcome)
    }

    /// Persist a jump-to-event context page.
    ///
    /// If the anchor is already stored nothing is written. Otherwise the
    /// page becomes a new fragment with gap boundaries (or edges where the
    /// server gave no token). A side is linked to a neighbour when the page
    /// overlaps that neighbour's open edge, or failing that by the
    /// predecessor rule. Writing stops at a forward overlap once the anchor
    /// has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn write_context(&self, store: &Store, page: &ContextPage) -> Result<ContextFill, StoreError> {
        let staged = store.write(|tx| self.context_in_txn(tx, page))?;
        self.register(&staged.touched);
        Ok(staged.outcome)
    }

    fn register(&self, touched: &[Fragment]) {
        for fragment in touched {
            self.comparer.add_fragment(fragment);
        }
    }

    fn fill_in_txn(
        &self,
        conn: &Connection,
        gap: &GapEntry,
        page: &Page,
    ) -> Result<Staged<GapFill>, StoreError> {
        let mut fragment = fragments::require(conn, gap.fragment_id)?;
        if fragment.room_id != self.room_id {
            return Err(StoreError::CorruptFragment {
                id: fragment.id,
                reason: format!("belongs to {}, not {}", fragment.room_id, self.room_id),
            });
        }

        let direction = gap.direction;
        if fragment.boundary(direction).token() != Some(gap.token.as_str()) {
            debug!(
                room_id = %self.room_id,
                fragment = %fragment.id,
                %direction,
                current = %fragment.boundary(direction),
                "gap already advanced; skipping stale fill"
            );
            return Ok(Staged {
                outcome: GapFill {
                    stale: true,
                    ..GapFill::default()
                },
                touched: Vec::new(),
            });
        }

        let mut next_index = match direction {
            Direction::Backward => events::first_index(conn, fragment.id)?.map_or(0, |i| i - 1),
            Direction::Forward => events::last_index(conn, fragment.id)?.map_or(0, |i| i + 1),
        };
        let mut written = Vec::new();
        let mut link = None;
        let mut duplicates = 0_usize;

        for event in &page.events {
            if let Some(existing) = events::find_by_event_id(conn, &self.room_id, &event.event_id)? {
                if existing.key.fragment_id != fragment.id
                    && let Some(other) = self.facing_candidate(conn, &fragment, &existing, direction)?
                {
                    link = Some(other);
                    break;
                }
                duplicates += 1;
                continue;
            }

            let entry = EventEntry {
                key: EventKey {
                    fragment_id: fragment.id,
                    index: next_index,
                },
                event: event.clone(),
            };
            events::insert(conn, &self.room_id, &entry)?;
            written.push(entry);
            next_index = match direction {
                Direction::Backward => next_index - 1,
                Direction::Forward => next_index + 1,
            };
        }

        if link.is_none() {
            link = self.adjacent_by_predecessor(conn, &fragment, direction)?;
        }

        let mut touched = Vec::new();
        let (gap_out, linked) = if let Some(mut other) = link {
            fragment.set_boundary(direction, Boundary::Linked(other.id));
            other.set_boundary(direction.reverse(), Boundary::Linked(fragment.id));
            fragments::update_boundaries(conn, &fragment)?;
            fragments::update_boundaries(conn, &other)?;
            info!(
                room_id = %self.room_id,
                fragment = %fragment.id,
                other = %other.id,
                %direction,
                "gap fill linked fragments"
            );
            let other_id = other.id;
            touched.push(fragment.clone());
            touched.push(other);
            (None, Some(other_id))
        } else {
            let boundary = page.next_token.clone().map_or(Boundary::Edge, Boundary::Gap);
            let gap_out = boundary.token().map(|token| GapEntry {
                fragment_id: fragment.id,
                direction,
                token: token.to_string(),
            });
            fragment.set_boundary(direction, boundary);
            fragments::update_boundaries(conn, &fragment)?;
            (gap_out, None)
        };

        debug!(
            room_id = %self.room_id,
            fragment = %fragment.id,
            %direction,
            written = written.len(),
            duplicates,
            boundary = %fragment.boundary(direction),
            "wrote gap fill"
        );

        if direction == Direction::Backward {
            written.reverse();
        }
        Ok(Staged {
            outcome: GapFill {
                entries: written,
                gap: gap_out,
                linked,
                stale: false,
            },
            touched,
        })
    }

    fn context_in_txn(
        &self,
        conn: &Connection,
        page: &ContextPage,
    ) -> Result<Staged<ContextFill>, StoreError> {
        if let Some(existing) = events::find_by_event_id(conn, &self.room_id, &page.anchor)? {
            debug!(room_id = %self.room_id, anchor = %page.anchor, "context anchor already stored");
            return Ok(Staged {
                outcome: ContextFill {
                    anchor: Some(existing.key),
                    entries: Vec::new(),
                    created: None,
                },
                touched: Vec::new(),
            });
        }

        let start = page.start.clone().map_or(Boundary::Edge, Boundary::Gap);
        let end = page.end.clone().map_or(Boundary::Edge, Boundary::Gap);
        let mut fragment = fragments::insert(conn, &self.room_id, &start, &end)?;

        let mut written = Vec::new();
        let mut anchor = None;
        let mut index = 0_i64;
        let mut older = None;
        let mut newer = None;
        for event in &page.events {
            if let Some(existing) = events::find_by_event_id(conn, &self.room_id, &event.event_id)? {
                if written.is_empty() {
                    // Leading overlap: the page starts inside an older fragment.
                    if let Some(other) =
                        self.facing_candidate(conn, &fragment, &existing, Direction::Backward)?
                    {
                        older = Some(other);
                    }
                } else if anchor.is_some()
                    && let Some(other) =
                        self.facing_candidate(conn, &fragment, &existing, Direction::Forward)?
                {
                    newer = Some(other);
                    break;
                }
                continue;
            }
            let entry = EventEntry {
                key: EventKey {
                    fragment_id: fragment.id,
                    index,
                },
                event: event.clone(),
            };
            events::insert(conn, &self.room_id, &entry)?;
            if event.event_id == page.anchor {
                anchor = Some(entry.key);
            }
            written.push(entry);
            index += 1;
        }

        let mut touched = Vec::new();
        for (direction, overlap) in [(Direction::Backward, older), (Direction::Forward, newer)] {
            let other = match overlap {
                Some(other) => Some(other),
                None if fragment.boundary(direction).is_gap() => {
                    self.adjacent_by_predecessor(conn, &fragment, direction)?
                }
                None => None,
            };
            if let Some(mut other) = other {
                fragment.set_boundary(direction, Boundary::Linked(other.id));
                other.set_boundary(direction.reverse(), Boundary::Linked(fragment.id));
                fragments::update_boundaries(conn, &other)?;
                touched.push(other);
            }
        }
        fragments::update_boundaries(conn, &fragment)?;
        info!(
            room_id = %self.room_id,
            fragment = %fragment.id,
            written = written.len(),
            start = %fragment.start,
            end = %fragment.end,
            "wrote context fragment"
        );
        let created = fragment.id;
        touched.insert(0, fragment);

        Ok(Staged {
            outcome: ContextFill {
                anchor,
                entries: written,
                created: Some(created),
            },
            touched,
        })
    }

    /// `existing` is stored in another fragment. Returns that fragment when
    /// `existing` is its edge entry facing a fill that travels in
    /// `direction`, and that edge is still an open gap.
    fn facing_candidate(
        &self,
        conn: &Connection,
        fragment: &Fragment,
        existing: &EventEntry,
        direction: Direction,
    ) -> Result<Option<Fragment>, StoreError> {
        let other = fragments::require(conn, existing.key.fragment_id)?;
        let facing = direction.reverse();
        if !other.boundary(facing).is_gap() {
            return Ok(None);
        }
        let at_edge = events::edge(conn, other.id, facing)?.is_some_and(|e| e.key == existing.key);
        if !at_edge {
            return Ok(None);
        }
        if self.comparer.are_connected(fragment.id, other.id) {
            warn!(
                room_id = %self.room_id,
                fragment = %fragment.id,
                other = %other.id,
                "page touches a fragment already in this chain; not linking"
            );
            return Ok(None);
        }
        Ok(Some(other))
    }

    fn adjacent_by_predecessor(
        &self,
        conn: &Connection,
        fragment: &Fragment,
        direction: Direction,
    ) -> Result<Option<Fragment>, StoreError> {
        let Some(edge) = events::edge(conn, fragment.id, direction)? else {
            return Ok(None);
        };

        match direction {
            Direction::Backward => {
                let Some(predecessor) = edge.event.predecessor.as_deref() else {
                    return Ok(None);
                };
                let Some(existing) = events::find_by_event_id(conn, &self.room_id, predecessor)?
                else {
                    return Ok(None);
                };
                if existing.key.fragment_id == fragment.id {
                    return Ok(None);
                }
                self.facing_candidate(conn, fragment, &existing, direction)
            }
            Direction::Forward => {
                for successor in events::find_successors(conn, &self.room_id, &edge.event.event_id)? {
                    if successor.key.fragment_id == fragment.id {
                        continue;
                    }
                    if let Some(other) = self.facing_candidate(conn, fragment, &successor, direction)? {
                        return Ok(Some(other));
                    }
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::rooms;

    const ROOM: &str = "!r:hs";

    fn event(id: &str, predecessor: Option<&str>) -> TimelineEvent {
        TimelineEvent {
            event_id: id.into(),
            sender: "@al:hs".into(),
            event_type: "m.room.message".into(),
            origin_server_ts: 0,
            predecessor: predecessor.map(str::to_string),
            content: serde_json::Value::Null,
        }
    }

    fn seed_fragment(
        store: &Store,
        start: Boundary,
        end: Boundary,
        names: &[(&str, Option<&str>)],
    ) -> Fragment {
        store
            .write(|tx| {
                let f = fragments::insert(tx, ROOM, &start, &end)?;
                for (i, (name, pred)) in names.iter().enumerate() {
                    events::insert(
                        tx,
                        ROOM,
                        &EventEntry {
                            key: EventKey {
                                fragment_id: f.id,
                                index: i64::try_from(i).unwrap_or_default(),
                            },
                            event: event(name, *pred),
                        },
                    )?;
                }
                rooms::set_live(tx, ROOM, f.id, None)?;
                Ok(f)
            })
            .expect("seed fragment")
    }

    fn writer_for(store: &Store) -> GapWriter {
        let fragments = store
            .read(|conn| fragments::list_for_room(conn, ROOM))
            .expect("list fragments");
        GapWriter::new(ROOM, Arc::new(FragmentIdComparer::from_fragments(&fragments)))
    }

    #[test]
    fn backward_fill_prepends_with_negative_indices() {
        let store = Store::open_in_memory().expect("open store");
        let f = seed_fragment(
            &store,
            Boundary::Gap("t0".into()),
            Boundary::Edge,
            &[("$c", None), ("$d", None)],
        );
        let writer = writer_for(&store);
        let gap = GapEntry {
            fragment_id: f.id,
            direction: Direction::Backward,
            token: "t0".into(),
        };
        let page = Page {
            events: vec![event("$b", None), event("$a", None)],
            next_token: Some("t1".into()),
        };

        let fill = writer
            .write_fragment_fill(&store, &gap, &page)
            .expect("fill");
        let keys: Vec<(String, i64)> = fill
            .entries
            .iter()
            .map(|e| (e.event.event_id.clone(), e.key.index))
            .collect();
        assert_eq!(keys, [("$a".to_string(), -2), ("$b".to_string(), -1)]);
        assert_eq!(
            fill.gap,
            Some(GapEntry {
                fragment_id: f.id,
                direction: Direction::Backward,
                token: "t1".into()
            })
        );
        assert!(!fill.stale);
    }

    #[test]
    fn stale_token_is_a_no_op() {
        let store = Store::open_in_memory().expect("open store");
        let f = seed_fragment(&store, Boundary::Gap("t0".into()), Boundary::Edge, &[("$c", None)]);
        let writer = writer_for(&store);
        let gap = GapEntry {
            fragment_id: f.id,
            direction: Direction::Backward,
            token: "old".into(),
        };
        let page = Page {
            events: vec![event("$b", None)],
            next_token: None,
        };
        let fill = writer
            .write_fragment_fill(&store, &gap, &page)
            .expect("fill");
        assert!(fill.stale);
        assert!(fill.entries.is_empty());
        let count = store
            .read(|conn| events::count_in_fragment(conn, f.id))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn backward_overlap_links_to_older_fragment() {
        let store = Store::open_in_memory().expect("open store");
        let older = seed_fragment(
            &store,
            Boundary::Edge,
            Boundary::Gap("older-end".into()),
            &[("$a", None), ("$b", None)],
        );
        let live = seed_fragment(
            &store,
            Boundary::Gap("live-start".into()),
            Boundary::Gap("sync".into()),
            &[("$e", None)],
        );
        let writer = writer_for(&store);
        let gap = GapEntry {
            fragment_id: live.id,
            direction: Direction::Backward,
            token: "live-start".into(),
        };
        // Newest first: $d and $c are new, $b is older's newest entry.
        let page = Page {
            events: vec![event("$d", None), event("$c", None), event("$b", None), event("$a", None)],
            next_token: Some("further".into()),
        };

        let fill = writer
            .write_fragment_fill(&store, &gap, &page)
            .expect("fill");
        let names: Vec<&str> = fill.entries.iter().map(|e| e.event.event_id.as_str()).collect();
        assert_eq!(names, ["$c", "$d"]);
        assert_eq!(fill.linked, Some(older.id));
        assert!(fill.gap.is_none());

        let (older_row, live_row) = store
            .read(|conn| Ok((fragments::require(conn, older.id)?, fragments::require(conn, live.id)?)))
            .expect("read fragments");
        assert_eq!(older_row.next_id(), Some(live.id));
        assert_eq!(live_row.previous_id(), Some(older.id));
        assert!(writer.comparer.are_connected(older.id, live.id));
    }

    #[test]
    fn context_page_creates_detached_fragment() {
        let store = Store::open_in_memory().expect("open store");
        let live = seed_fragment(
            &store,
            Boundary::Gap("live-start".into()),
            Boundary::Gap("sync".into()),
            &[("$z", None)],
        );
        let writer = writer_for(&store);
        let page = ContextPage {
            anchor: "$m".into(),
            events: vec![event("$l", None), event("$m", Some("$l")), event("$n", Some("$m"))],
            start: Some("ctx-start".into()),
            end: Some("ctx-end".into()),
        };

        let fill = writer.write_context(&store, &page).expect("context");
        let created = fill.created.expect("new fragment");
        assert_ne!(created, live.id);
        assert_eq!(
            fill.anchor,
            Some(EventKey {
                fragment_id: created,
                index: 1
            })
        );
        assert!(!writer.comparer.are_connected(created, live.id));

        let again = writer.write_context(&store, &page).expect("context again");
        assert_eq!(again.created, None);
        assert_eq!(again.anchor, fill.anchor);
    }

    #[test]
    fn context_page_overlapping_live_start_links_to_it() {
        let store = Store::open_in_memory().expect("open store");
        let live = seed_fragment(
            &store,
            Boundary::Gap("t0".into()),
            Boundary::Gap("sync".into()),
            &[("$x", None), ("$y", Some("$x"))],
        );
        let writer = writer_for(&store);
        let page = ContextPage {
            anchor: "$w".into(),
            events: vec![event("$v", None), event("$w", None), event("$x", None)],
            start: Some("c0".into()),
            end: Some("c1".into()),
        };

        let fill = writer.write_context(&store, &page).expect("context");
        let created = fill.created.expect("new fragment");
        let names: Vec<&str> = fill.entries.iter().map(|e| e.event.event_id.as_str()).collect();
        assert_eq!(names, ["$v", "$w"]);

        let (ctx_row, live_row) = store
            .read(|conn| Ok((fragments::require(conn, created)?, fragments::require(conn, live.id)?)))
            .expect("read fragments");
        assert_eq!(ctx_row.start, Boundary::Gap("c0".into()));
        assert_eq!(ctx_row.end, Boundary::Linked(live.id));
        assert_eq!(live_row.start, Boundary::Linked(created));
        assert!(writer.comparer.are_connected(created, live.id));
    }

    #[test]
    fn context_page_starting_inside_older_fragment_links_back() {
        let store = Store::open_in_memory().expect("open store");
        let older = seed_fragment(
            &store,
            Boundary::Edge,
            Boundary::Gap("old-end".into()),
            &[("$a", None), ("$b", None)],
        );
        let writer = writer_for(&store);
        let page = ContextPage {
            anchor: "$c".into(),
            events: vec![event("$a", None), event("$b", None), event("$c", None)],
            start: Some("c0".into()),
            end: Some("c1".into()),
        };

        let fill = writer.write_context(&store, &page).expect("context");
        let created = fill.created.expect("new fragment");
        let ctx_row = store
            .read(|conn| fragments::require(conn, created))
            .expect("read fragment");
        assert_eq!(ctx_row.start, Boundary::Linked(older.id));
        assert_eq!(ctx_row.end, Boundary::Gap("c1".into()));
        assert!(writer.comparer.are_connected(older.id, created));
    }
}
