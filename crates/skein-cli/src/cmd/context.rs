//! `skein context`: store a jump-to-event context page and print the
//! entries around its anchor.

use crate::cmd::show::ShowEntry;
use crate::cmd::{CommandContext, read_json};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Result, bail};
use clap::Args;
use serde::Serialize;
use skein_core::model::{Direction, TimelineEntry};
use skein_core::persist::{ContextPage, GapWriter, TimelineReader};
use skein_core::store::{events, fragments};
use skein_core::FragmentIdComparer;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct ContextArgs {
    #[arg(long)]
    pub room: String,

    /// JSON file holding `{anchor, events, start, end}`.
    #[arg(long)]
    pub file: PathBuf,

    /// Stored events to show on each side of the anchor.
    #[arg(short = 'n', long, default_value_t = 5)]
    pub around: usize,
}

#[derive(Debug, Serialize)]
pub struct ContextReport {
    pub room_id: String,
    pub anchor: String,
    pub position: String,
    pub written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_fragment: Option<i64>,
    pub entries: Vec<ShowEntry>,
}

pub fn run_context(args: &ContextArgs, ctx: &CommandContext, output: OutputMode) -> Result<()> {
    let page: ContextPage = read_json(&args.file)?;
    let known = ctx
        .store
        .read(|conn| fragments::list_for_room(conn, &args.room))?;
    let writer = GapWriter::new(
        args.room.clone(),
        Arc::new(FragmentIdComparer::from_fragments(&known)),
    );
    let fill = writer.write_context(&ctx.store, &page)?;
    let Some(anchor) = fill.anchor else {
        bail!("context page does not contain its anchor {}", page.anchor);
    };

    let reader = TimelineReader::new(args.room.clone());
    let around = args.around;
    let entries = ctx.store.read(|conn| {
        let mut entries = reader.read_from(conn, anchor, Direction::Backward, around)?;
        if let Some(event) = events::find_by_event_id(conn, &args.room, &page.anchor)? {
            entries.push(TimelineEntry::Event(event));
        }
        entries.extend(reader.read_from(conn, anchor, Direction::Forward, around)?);
        Ok(entries)
    })?;

    let report = ContextReport {
        room_id: args.room.clone(),
        anchor: page.anchor.clone(),
        position: anchor.to_string(),
        written: fill.entries.len(),
        created_fragment: fill.created.map(|id| id.0),
        entries: entries.iter().map(ShowEntry::from).collect(),
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "{}  anchor={}  at={}  written={}",
                r.room_id, r.anchor, r.position, r.written
            )
        },
        |r, w| {
            pretty_section(w, &format!("Context {}", r.anchor))?;
            pretty_kv(w, "position", &r.position)?;
            pretty_kv(w, "written", r.written.to_string())?;
            if let Some(id) = r.created_fragment {
                pretty_kv(w, "new fragment", id.to_string())?;
            }
            for entry in &r.entries {
                match entry {
                    ShowEntry::Event { event_id, .. } if *event_id == r.anchor => {
                        writeln!(w, "> {event_id}")?;
                    }
                    ShowEntry::Event { event_id, .. } => writeln!(w, "  {event_id}")?,
                    ShowEntry::Gap { direction, .. } => writeln!(w, "  ~~ {direction} gap ~~")?,
                }
            }
            Ok(())
        },
    )
}
