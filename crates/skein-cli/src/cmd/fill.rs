//! `skein fill`: fill the first gap of a room's timeline from fixture pages.
//! `--direction f` picks the first forward gap instead.
//!
//! The pages file maps a pagination token to the page the server would
//! return for it:
//!
//! ```json
//! { "t0": { "chunk": [ ... ], "end": "t1" }, "t1": { "chunk": [ ... ] } }
//! ```

use crate::cmd::{CommandContext, read_json};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde::Serialize;
use skein_core::model::{Direction, TimelineEntry};
use skein_core::pagination::{FetchError, Page, PageRequest, PaginationSource};
use skein_core::timeline::FillOutcome;
use skein_core::{Store, Timeline, TimelineParams};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct FillArgs {
    #[arg(long)]
    pub room: String,

    /// JSON file mapping pagination tokens to pages.
    #[arg(long)]
    pub pages: PathBuf,

    /// Events to request (defaults to `timeline.fill_page_size`).
    #[arg(long)]
    pub amount: Option<usize>,

    /// Which kind of gap to fill: `b` (backward) or `f` (forward).
    #[arg(long, default_value = "b")]
    pub direction: Direction,
}

/// Serves pages from a token-keyed fixture map.
struct FixturePager {
    pages: HashMap<String, Page>,
}

#[async_trait]
impl PaginationSource for FixturePager {
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
        tracing::debug!(
            from = %request.from,
            dir = request.direction.as_api_str(),
            limit = request.limit,
            "fixture fetch"
        );
        self.pages
            .get(&request.from)
            .cloned()
            .ok_or_else(|| FetchError::Connection {
                message: format!("no fixture page for token {}", request.from),
                timed_out: false,
            })
    }
}

#[derive(Debug, Serialize)]
pub struct FillReport {
    pub room_id: String,
    /// `false` when the loaded timeline had no gap to fill.
    pub filled: bool,
    pub inserted: usize,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_to: Option<i64>,
    /// Token of the gap left behind, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_gap: Option<String>,
    pub total_entries: usize,
}

impl FillReport {
    fn from_outcome(room_id: &str, outcome: Option<&FillOutcome>, total_entries: usize) -> Self {
        Self {
            room_id: room_id.to_string(),
            filled: outcome.is_some_and(|o| !o.stale),
            inserted: outcome.map_or(0, |o| o.inserted),
            stale: outcome.is_some_and(|o| o.stale),
            linked_to: outcome.and_then(|o| o.linked).map(|id| id.0),
            next_gap: outcome.and_then(|o| o.gap.as_ref()).map(|g| g.token.clone()),
            total_entries,
        }
    }
}

pub fn run_fill(args: &FillArgs, ctx: CommandContext, output: OutputMode) -> Result<()> {
    let pages: HashMap<String, Page> = read_json(&args.pages)?;
    let timeline_config = ctx.config.timeline();
    let amount = args.amount.unwrap_or(timeline_config.fill_page_size);
    let store = Arc::new(ctx.store);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let report = runtime.block_on(fill_first_gap(
        &args.room,
        store,
        Arc::new(FixturePager { pages }),
        timeline_config,
        amount,
        args.direction,
    ))?;

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "{}  filled={}  inserted={}  stale={}  next_gap={}",
                r.room_id,
                r.filled,
                r.inserted,
                r.stale,
                r.next_gap.as_deref().unwrap_or("-")
            )
        },
        |r, w| {
            pretty_section(w, &format!("Fill {}", r.room_id))?;
            if !r.filled && !r.stale {
                return writeln!(w, "no gap to fill");
            }
            pretty_kv(w, "inserted", r.inserted.to_string())?;
            pretty_kv(w, "stale", if r.stale { "yes" } else { "no" })?;
            if let Some(id) = r.linked_to {
                pretty_kv(w, "linked to", format!("fragment {id}"))?;
            }
            pretty_kv(w, "next gap", r.next_gap.as_deref().unwrap_or("none"))?;
            pretty_kv(w, "entries", r.total_entries.to_string())
        },
    )
}

async fn fill_first_gap(
    room_id: &str,
    store: Arc<Store>,
    pager: Arc<FixturePager>,
    config: skein_core::config::TimelineConfig,
    amount: usize,
    direction: Direction,
) -> Result<FillReport> {
    let params = TimelineParams::from_store(room_id, store, pager, config)?;
    let timeline = Timeline::new(params);
    timeline.load().await?;

    let gap = timeline
        .entries()
        .iter()
        .filter_map(TimelineEntry::as_gap)
        .find(|gap| gap.direction == direction)
        .cloned();
    let outcome = match gap {
        Some(gap) => Some(timeline.fill_gap(&gap, amount).await?),
        None => None,
    };
    let total = timeline.entries().len();
    timeline.close();
    Ok(FillReport::from_outcome(room_id, outcome.as_ref(), total))
}
