//! Persists live sync batches into a room's live fragment.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::comparer::FragmentIdComparer;
use crate::model::{Boundary, EventEntry, EventKey, Fragment, FragmentId, TimelineEvent};
use crate::store::{Store, StoreError, events, fragments, rooms};

/// One room's slice of a sync response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatch {
    /// New events, oldest first.
    #[serde(default)]
    pub events: Vec<TimelineEvent>,
    /// Token for paginating backward from the first event of the batch.
    #[serde(default)]
    pub prev_batch: Option<String>,
    /// Token the next sync resumes from.
    pub next_batch: String,
    /// The server skipped events between the previous sync and this batch.
    #[serde(default)]
    pub limited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWrite {
    /// Newly stored entries, oldest first.
    pub entries: Vec<EventEntry>,
    /// This batch started a new live fragment.
    pub new_live_fragment: bool,
    pub fragment_id: FragmentId,
}

/// Appends sync batches for one room.
#[derive(Debug, Clone)]
pub struct SyncWriter {
    room_id: String,
    comparer: Arc<FragmentIdComparer>,
}

impl SyncWriter {
    #[must_use]
    pub fn new(room_id: impl Into<String>, comparer: Arc<FragmentIdComparer>) -> Self {
        Self {
            room_id: room_id.into(),
            comparer,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Persist `batch`.
    ///
    /// The first batch for a room creates its fragment. A `limited` batch
    /// starts a fresh live fragment whose start is a gap at `prev_batch`;
    /// the previous live chain is left as it was. Otherwise events extend
    /// the current live fragment.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is written then.
    pub fn write_sync(&self, store: &Store, batch: &SyncBatch) -> Result<SyncWrite, StoreError> {
        let (write, fragment) = store.write(|tx| self.sync_in_txn(tx, batch))?;
        self.comparer.add_fragment(&fragment);
        Ok(write)
    }

    fn sync_in_txn(
        &self,
        conn: &Connection,
        batch: &SyncBatch,
    ) -> Result<(SyncWrite, Fragment), StoreError> {
        let live = match rooms::get(conn, &self.room_id)?.and_then(|r| r.live_fragment_id) {
            Some(id) => Some(fragments::require(conn, id)?),
            None => None,
        };

        let (mut fragment, created) = match live {
            Some(fragment) if !batch.limited => (fragment, false),
            previous => {
                let start = batch.prev_batch.clone().map_or(Boundary::Edge, Boundary::Gap);
                let end = Boundary::Gap(batch.next_batch.clone());
                let fragment = fragments::insert(conn, &self.room_id, &start, &end)?;
                info!(
                    room_id = %self.room_id,
                    fragment = %fragment.id,
                    previous = ?previous.map(|f| f.id),
                    limited = batch.limited,
                    "started live fragment"
                );
                (fragment, true)
            }
        };

        let mut next_index = events::last_index(conn, fragment.id)?.map_or(0, |i| i + 1);
        let mut written = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            if events::find_by_event_id(conn, &self.room_id, &event.event_id)?.is_some() {
                debug!(room_id = %self.room_id, event_id = %event.event_id, "skipping duplicate sync event");
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
            next_index += 1;
        }

        fragment.end = Boundary::Gap(batch.next_batch.clone());
        fragments::update_boundaries(conn, &fragment)?;
        rooms::set_live(conn, &self.room_id, fragment.id, Some(&batch.next_batch))?;

        debug!(
            room_id = %self.room_id,
            fragment = %fragment.id,
            written = written.len(),
            next_batch = %batch.next_batch,
            "wrote sync batch"
        );
        Ok((
            SyncWrite {
                entries: written,
                new_live_fragment: created,
                fragment_id: fragment.id,
            },
            fragment,
        ))
    }
}
