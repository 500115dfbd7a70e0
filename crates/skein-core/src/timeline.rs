//! The live, observable window over one room's persisted timeline.
//!
//! A [`Timeline`] owns an [`ObservableList`] of entries. It loads the newest
//! slice through the reader, appends live sync output at the tail, and
//! splices gap fills in place of the gap marker they were fetched from.
//!
//! Storage calls run on the blocking pool; the entry list sits behind a
//! plain mutex that is never held across an `.await`. Every storage write
//! or read that feeds the list happens under the async mutation gate, so
//! the list sees changes in the order the store committed them. Fetches
//! run outside the gate: two fills may be in flight at once and the loser
//! comes back stale.
//!
//! Lock order is gate, then entries, then state.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::comparer::{FragmentIdComparer, UnorderableError};
use crate::config::TimelineConfig;
use crate::error::TimelineError;
use crate::model::{Direction, EventEntry, FragmentId, GapEntry, TimelineEntry};
use crate::observable::{ListChange, ObservableList};
use crate::pagination::{FetchError, PageRequest, PaginationSource};
use crate::persist::{GapFill, GapWriter, SyncBatch, SyncWrite, SyncWriter, TimelineReader};
use crate::store::{Store, StoreError, fragments};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineState {
    Loading,
    Ready,
    Closed,
}

impl TimelineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

/// Everything a [`Timeline`] needs from its owner.
pub struct TimelineParams {
    pub room_id: String,
    pub store: Arc<Store>,
    pub pager: Arc<dyn PaginationSource>,
    pub comparer: Arc<FragmentIdComparer>,
    pub config: TimelineConfig,
    /// Runs once when the timeline is closed.
    pub close_callback: Option<Box<dyn FnOnce() + Send>>,
}

impl TimelineParams {
    /// Build params for `room_id`, loading the room's fragment graph into
    /// a fresh comparer.
    ///
    /// # Errors
    ///
    /// Returns an error if the fragments cannot be read.
    pub fn from_store(
        room_id: impl Into<String>,
        store: Arc<Store>,
        pager: Arc<dyn PaginationSource>,
        config: TimelineConfig,
    ) -> Result<Self, StoreError> {
        let room_id = room_id.into();
        let fragments = store.read(|conn| fragments::list_for_room(conn, &room_id))?;
        let comparer = Arc::new(FragmentIdComparer::from_fragments(&fragments));
        debug!(room_id = %room_id, fragments = fragments.len(), "loaded fragment graph");
        Ok(Self {
            room_id,
            store,
            pager,
            comparer,
            config,
            close_callback: None,
        })
    }

    #[must_use]
    pub fn on_close(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.close_callback = Some(Box::new(callback));
        self
    }
}

/// Result of [`Timeline::fill_gap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillOutcome {
    /// Event entries written by this fill.
    pub inserted: usize,
    /// The gap marker left behind, if the boundary is still open.
    pub gap: Option<GapEntry>,
    /// Fragment the filled boundary was linked to.
    pub linked: Option<FragmentId>,
    /// The in-memory list was updated.
    pub spliced: bool,
    /// Another fill advanced the gap first; nothing was written.
    pub stale: bool,
}

pub struct Timeline {
    room_id: String,
    store: Arc<Store>,
    pager: Arc<dyn PaginationSource>,
    comparer: Arc<FragmentIdComparer>,
    config: TimelineConfig,
    reader: TimelineReader,
    gap_writer: GapWriter,
    sync_writer: SyncWriter,
    /// Held from a storage call through the matching list update.
    mutations: tokio::sync::Mutex<()>,
    entries: Mutex<ObservableList<TimelineEntry>>,
    state: Mutex<TimelineState>,
    load_started: AtomicBool,
    close_callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Timeline {
    #[must_use]
    pub fn new(params: TimelineParams) -> Self {
        let TimelineParams {
            room_id,
            store,
            pager,
            comparer,
            config,
            close_callback,
        } = params;
        Self {
            reader: TimelineReader::new(room_id.clone()),
            gap_writer: GapWriter::new(room_id.clone(), Arc::clone(&comparer)),
            sync_writer: SyncWriter::new(room_id.clone(), Arc::clone(&comparer)),
            room_id,
            store,
            pager,
            comparer,
            config,
            mutations: tokio::sync::Mutex::new(()),
            entries: Mutex::new(ObservableList::new()),
            state: Mutex::new(TimelineState::Loading),
            load_started: AtomicBool::new(false),
            close_callback: Mutex::new(close_callback),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn state(&self) -> TimelineState {
        *lock(&self.state)
    }

    #[must_use]
    pub const fn comparer(&self) -> &Arc<FragmentIdComparer> {
        &self.comparer
    }

    #[must_use]
    pub const fn sync_writer(&self) -> &SyncWriter {
        &self.sync_writer
    }

    #[must_use]
    pub const fn gap_writer(&self) -> &GapWriter {
        &self.gap_writer
    }

    /// Snapshot of the current entries.
    #[must_use]
    pub fn entries(&self) -> Vec<TimelineEntry> {
        lock(&self.entries).as_slice().to_vec()
    }

    /// Receive every change to the entry list from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<ListChange<TimelineEntry>> {
        lock(&self.entries).subscribe()
    }

    /// Populate the list with the newest `initial_load` entries. Allowed once.
    ///
    /// Returns the number of event entries loaded.
    ///
    /// # Errors
    ///
    /// [`TimelineError::InvalidState`] on a second call or after close;
    /// [`TimelineError::Storage`] if the read fails.
    pub async fn load(&self) -> Result<usize, TimelineError> {
        if self.load_started.swap(true, AtomicOrdering::SeqCst) {
            return Err(TimelineError::InvalidState {
                expected: "unloaded",
                actual: self.state().as_str(),
            });
        }
        self.ensure(TimelineState::Loading)?;

        let _gate = self.mutations.lock().await;
        let reader = self.reader.clone();
        let count = self.config.initial_load;
        let loaded = self
            .run_blocking(move |store| store.read(|conn| reader.read_from_end(conn, count)))
            .await?;

        let mut list = lock(&self.entries);
        let mut state = lock(&self.state);
        if *state != TimelineState::Loading {
            return Err(TimelineError::InvalidState {
                expected: "loading",
                actual: state.as_str(),
            });
        }
        let events = loaded.iter().filter(|e| !e.is_gap()).count();
        for entry in loaded {
            list.append(entry);
        }
        *state = TimelineState::Ready;
        drop(state);
        drop(list);
        info!(room_id = %self.room_id, events, "timeline loaded");
        Ok(events)
    }

    /// Append entries produced by the sync writer at the tail.
    ///
    /// # Errors
    ///
    /// [`TimelineError::InvalidState`] unless the timeline is ready.
    pub fn append_live_entries(
        &self,
        entries: impl IntoIterator<Item = EventEntry>,
    ) -> Result<(), TimelineError> {
        let mut list = lock(&self.entries);
        self.ensure(TimelineState::Ready)?;
        for entry in entries {
            list.append(TimelineEntry::Event(entry));
        }
        Ok(())
    }

    /// Persist a sync batch and reflect it in the list.
    ///
    /// A batch that started a new live fragment replaces the list with a
    /// fresh read from the end, one removal per old entry. Before `load`
    /// finishes the batch is only persisted; `load` reads it back.
    ///
    /// # Errors
    ///
    /// [`TimelineError::InvalidState`] after close; storage failures.
    pub async fn apply_sync(&self, batch: SyncBatch) -> Result<SyncWrite, TimelineError> {
        if self.state() == TimelineState::Closed {
            return Err(TimelineError::InvalidState {
                expected: "loading or ready",
                actual: TimelineState::Closed.as_str(),
            });
        }

        let _gate = self.mutations.lock().await;
        let writer = self.sync_writer.clone();
        let write = self
            .run_blocking(move |store| writer.write_sync(store, &batch))
            .await?;

        if self.state() == TimelineState::Ready {
            if write.new_live_fragment {
                self.rebuild().await?;
            } else {
                self.append_live_entries(write.entries.iter().cloned())?;
            }
        }
        Ok(write)
    }

    /// Fetch a page for `gap` and splice the result in its place.
    ///
    /// `amount` of zero means the configured page size.
    ///
    /// # Errors
    ///
    /// See [`Timeline::fill_gap_with_cancel`].
    pub async fn fill_gap(&self, gap: &GapEntry, amount: usize) -> Result<FillOutcome, TimelineError> {
        self.fill_gap_with_cancel(gap, amount, &CancellationToken::new())
            .await
    }

    /// [`Timeline::fill_gap`] that gives up when `cancel` fires during the
    /// fetch. A cancelled or failed fetch writes nothing.
    ///
    /// # Errors
    ///
    /// [`TimelineError::Network`] when the fetch fails or times out,
    /// [`TimelineError::Aborted`] when cancelled, [`TimelineError::Storage`]
    /// when the write fails, and [`TimelineError::Unorderable`] when the
    /// marker cannot be located against the list.
    pub async fn fill_gap_with_cancel(
        &self,
        gap: &GapEntry,
        amount: usize,
        cancel: &CancellationToken,
    ) -> Result<FillOutcome, TimelineError> {
        self.ensure(TimelineState::Ready)?;
        let limit = if amount == 0 {
            self.config.fill_page_size
        } else {
            amount
        };
        let request = PageRequest {
            room_id: self.room_id.clone(),
            from: gap.token.clone(),
            direction: gap.direction,
            limit,
        };
        debug!(
            room_id = %self.room_id,
            fragment = %gap.fragment_id,
            direction = %gap.direction,
            limit,
            "filling gap"
        );

        let timeout = self.config.fetch_timeout();
        let page = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(room_id = %self.room_id, fragment = %gap.fragment_id, "gap fill cancelled");
                return Err(TimelineError::Aborted);
            }
            result = tokio::time::timeout(timeout, self.pager.fetch_page(request)) => match result {
                Err(_) => {
                    return Err(TimelineError::Network {
                        message: format!("no response within {}ms", timeout.as_millis()),
                        timed_out: true,
                    });
                }
                Ok(Err(FetchError::Aborted)) => return Err(TimelineError::Aborted),
                Ok(Err(FetchError::Connection { message, timed_out })) => {
                    return Err(TimelineError::Network { message, timed_out });
                }
                Ok(Ok(page)) => page,
            }
        };

        let _gate = self.mutations.lock().await;
        let writer = self.gap_writer.clone();
        let owned_gap = gap.clone();
        let fill = self
            .run_blocking(move |store| writer.write_fragment_fill(store, &owned_gap, &page))
            .await?;

        if fill.stale {
            warn!(
                room_id = %self.room_id,
                fragment = %gap.fragment_id,
                direction = %gap.direction,
                "gap was filled elsewhere; dropping page"
            );
            return Ok(FillOutcome {
                stale: true,
                ..FillOutcome::default()
            });
        }

        let spliced = self.splice(gap, &fill)?;
        Ok(FillOutcome {
            inserted: fill.entries.len(),
            gap: fill.gap,
            linked: fill.linked,
            spliced,
            stale: false,
        })
    }

    /// Read up to `amount` stored entries preceding the first in-memory
    /// entry and prepend them. Never touches the network.
    ///
    /// Returns the number of event entries inserted, 0 when the list starts
    /// with a gap marker.
    ///
    /// # Errors
    ///
    /// [`TimelineError::InvalidState`] unless ready; storage failures.
    pub async fn load_at_top(&self, amount: usize) -> Result<usize, TimelineError> {
        self.ensure(TimelineState::Ready)?;
        let _gate = self.mutations.lock().await;
        let first = {
            let list = lock(&self.entries);
            match list.get(0) {
                Some(TimelineEntry::Event(entry)) => entry.key,
                Some(TimelineEntry::Gap(_)) | None => return Ok(0),
            }
        };

        let reader = self.reader.clone();
        let older = self
            .run_blocking(move |store| {
                store.read(|conn| reader.read_from(conn, first, Direction::Backward, amount))
            })
            .await?;

        let mut list = lock(&self.entries);
        self.ensure(TimelineState::Ready)?;
        let still_first = list.get(0).and_then(TimelineEntry::as_event).map(|e| e.key);
        if still_first != Some(first) {
            debug!(room_id = %self.room_id, "list head moved during read; skipping prepend");
            return Ok(0);
        }
        let inserted = older.iter().filter(|e| !e.is_gap()).count();
        list.insert_many(0, older);
        Ok(inserted)
    }

    /// Run the close callback once and stop accepting operations.
    pub fn close(&self) {
        {
            let _list = lock(&self.entries);
            let mut state = lock(&self.state);
            if *state == TimelineState::Closed {
                return;
            }
            *state = TimelineState::Closed;
        }
        if let Some(callback) = lock(&self.close_callback).take() {
            callback();
        }
        info!(room_id = %self.room_id, "timeline closed");
    }

    fn ensure(&self, expected: TimelineState) -> Result<(), TimelineError> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(TimelineError::InvalidState {
                expected: expected.as_str(),
                actual: actual.as_str(),
            })
        }
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    /// Caller holds the mutation gate.
    async fn rebuild(&self) -> Result<(), TimelineError> {
        let reader = self.reader.clone();
        let count = self.config.initial_load;
        let fresh = self
            .run_blocking(move |store| store.read(|conn| reader.read_from_end(conn, count)))
            .await?;

        let mut list = lock(&self.entries);
        self.ensure(TimelineState::Ready)?;
        while let Some(last) = list.len().checked_sub(1) {
            list.remove(last);
        }
        for entry in fresh {
            list.append(entry);
        }
        info!(room_id = %self.room_id, entries = list.len(), "timeline rebuilt after limited sync");
        Ok(())
    }

    /// Replace `gap`'s marker with the fill result. Returns `false` when the
    /// marker is no longer in the list or the timeline closed meanwhile.
    fn splice(&self, gap: &GapEntry, fill: &GapFill) -> Result<bool, TimelineError> {
        let mut list = lock(&self.entries);
        if self.state() != TimelineState::Ready {
            debug!(room_id = %self.room_id, "timeline closed during fill; skipping splice");
            return Ok(false);
        }
        let marker = TimelineEntry::Gap(gap.clone());

        let connected = list
            .get(0)
            .is_some_and(|first| self.comparer.are_connected(gap.fragment_id, first.fragment_id()));
        if !connected {
            warn!(
                room_id = %self.room_id,
                fragment = %gap.fragment_id,
                "gap marker's chain is not in the list; skipping splice"
            );
            return Ok(false);
        }

        let index = match sorted_index(list.as_slice(), &marker, &self.comparer) {
            Ok(Ok(index)) if list.get(index) == Some(&marker) => index,
            Ok(_) => {
                warn!(
                    room_id = %self.room_id,
                    fragment = %gap.fragment_id,
                    direction = %gap.direction,
                    "gap marker no longer at its position; skipping splice"
                );
                return Ok(false);
            }
            Err(err) => {
                error!(room_id = %self.room_id, %err, "cannot order gap marker against timeline");
                return Err(err.into());
            }
        };

        list.remove(index);
        let mut replacement: Vec<TimelineEntry> =
            fill.entries.iter().cloned().map(TimelineEntry::Event).collect();
        if let Some(next) = &fill.gap {
            match gap.direction {
                Direction::Backward => replacement.insert(0, TimelineEntry::Gap(next.clone())),
                Direction::Forward => replacement.push(TimelineEntry::Gap(next.clone())),
            }
        }
        debug!(
            room_id = %self.room_id,
            index,
            entries = replacement.len(),
            "spliced gap fill"
        );
        list.insert_many(index, replacement);
        Ok(true)
    }
}

/// Binary search `target` in an ordered entry slice. `Ok(Ok(i))` is an
/// entry at the same position, `Ok(Err(i))` the insertion point.
fn sorted_index(
    entries: &[TimelineEntry],
    target: &TimelineEntry,
    comparer: &FragmentIdComparer,
) -> Result<Result<usize, usize>, UnorderableError> {
    let mut low = 0;
    let mut high = entries.len();
    while low < high {
        let mid = low + (high - low) / 2;
        match entries[mid].compare(target, comparer)? {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => return Ok(Ok(mid)),
        }
    }
    Ok(Err(low))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
