//! Shared fixtures for skein-core integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use skein_core::model::{Boundary, EventEntry, EventKey, Fragment, TimelineEntry, TimelineEvent};
use skein_core::pagination::{FetchError, Page, PageRequest, PaginationSource};
use skein_core::store::{Store, events, fragments, rooms};
use tokio::sync::oneshot;

pub const ROOM: &str = "!room:example.org";

pub fn event(id: &str) -> TimelineEvent {
    TimelineEvent {
        event_id: id.to_string(),
        sender: "@alice:example.org".to_string(),
        event_type: "m.room.message".to_string(),
        origin_server_ts: 1_708_012_200_000,
        predecessor: None,
        content: serde_json::json!({ "body": id }),
    }
}

pub fn event_after(id: &str, predecessor: &str) -> TimelineEvent {
    TimelineEvent {
        predecessor: Some(predecessor.to_string()),
        ..event(id)
    }
}

/// Insert a fragment holding `events` at indices `0..`.
pub fn seed_fragment(
    store: &Store,
    start: Boundary,
    end: Boundary,
    seeded: Vec<TimelineEvent>,
) -> Fragment {
    store
        .write(|tx| {
            let fragment = fragments::insert(tx, ROOM, &start, &end)?;
            for (index, event) in (0_i64..).zip(seeded) {
                events::insert(
                    tx,
                    ROOM,
                    &EventEntry {
                        key: EventKey {
                            fragment_id: fragment.id,
                            index,
                        },
                        event,
                    },
                )?;
            }
            Ok(fragment)
        })
        .expect("seed fragment")
}

pub fn mark_live(store: &Store, fragment: &Fragment, token: &str) {
    store
        .write(|tx| rooms::set_live(tx, ROOM, fragment.id, Some(token)))
        .expect("mark live");
}

/// Link `older.end` to `newer.start` in storage.
pub fn link(store: &Store, older: &mut Fragment, newer: &mut Fragment) {
    older.end = Boundary::Linked(newer.id);
    newer.start = Boundary::Linked(older.id);
    store
        .write(|tx| {
            fragments::update_boundaries(tx, older)?;
            fragments::update_boundaries(tx, newer)
        })
        .expect("link fragments");
}

pub fn labels(entries: &[TimelineEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| match entry {
            TimelineEntry::Event(e) => e.event.event_id.clone(),
            TimelineEntry::Gap(g) => format!("<gap {} {}>", g.direction, g.token),
        })
        .collect()
}

pub fn event_ids(entries: &[EventEntry]) -> Vec<String> {
    entries.iter().map(|e| e.event.event_id.clone()).collect()
}

/// Serves canned pages keyed by the `from` token and records every request.
#[derive(Default)]
pub struct ScriptedPager {
    pages: Mutex<HashMap<String, Page>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedPager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, from: &str, events: Vec<TimelineEvent>, next: Option<&str>) -> Self {
        self.pages.lock().expect("pages lock").insert(
            from.to_string(),
            Page {
                events,
                next_token: next.map(str::to_string),
            },
        );
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl PaginationSource for ScriptedPager {
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
        let page = self.pages.lock().expect("pages lock").get(&request.from).cloned();
        self.requests.lock().expect("requests lock").push(request.clone());
        page.ok_or_else(|| FetchError::Connection {
            message: format!("no page scripted for {}", request.from),
            timed_out: false,
        })
    }
}

/// Holds a single fetch open until the test releases it.
pub struct GatedPager {
    page: Page,
    started: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<Option<oneshot::Receiver<()>>>,
}

pub struct Gate {
    pub started: oneshot::Receiver<()>,
    pub release: oneshot::Sender<()>,
}

impl GatedPager {
    pub fn new(events: Vec<TimelineEvent>, next: Option<&str>) -> (Arc<Self>, Gate) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let pager = Arc::new(Self {
            page: Page {
                events,
                next_token: next.map(str::to_string),
            },
            started: Mutex::new(Some(started_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        (
            pager,
            Gate {
                started: started_rx,
                release: release_tx,
            },
        )
    }
}

#[async_trait]
impl PaginationSource for GatedPager {
    async fn fetch_page(&self, _request: PageRequest) -> Result<Page, FetchError> {
        if let Some(started) = self.started.lock().expect("started lock").take() {
            let _ = started.send(());
        }
        let release = self.release.lock().expect("release lock").take();
        if let Some(release) = release {
            release.await.map_err(|_| FetchError::Aborted)?;
        }
        Ok(self.page.clone())
    }
}

/// Never answers within any reasonable timeout.
pub struct SlowPager(pub Duration);

#[async_trait]
impl PaginationSource for SlowPager {
    async fn fetch_page(&self, _request: PageRequest) -> Result<Page, FetchError> {
        tokio::time::sleep(self.0).await;
        Ok(Page::default())
    }
}
