//! `skein show`: print the newest entries of a room's stored timeline.

use crate::cmd::CommandContext;
use crate::output::{OutputMode, pretty_section, render_mode};
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::Args;
use serde::Serialize;
use skein_core::model::TimelineEntry;
use skein_core::persist::TimelineReader;
use std::io::Write;

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long)]
    pub room: String,

    /// Number of events to show (defaults to `timeline.initial_load`).
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShowEntry {
    Event {
        position: String,
        event_id: String,
        sender: String,
        #[serde(rename = "type")]
        event_type: String,
        origin_server_ts: i64,
    },
    Gap {
        fragment_id: i64,
        direction: String,
        token: String,
    },
}

impl From<&TimelineEntry> for ShowEntry {
    fn from(entry: &TimelineEntry) -> Self {
        match entry {
            TimelineEntry::Event(e) => Self::Event {
                position: e.key.to_string(),
                event_id: e.event.event_id.clone(),
                sender: e.event.sender.clone(),
                event_type: e.event.event_type.clone(),
                origin_server_ts: e.event.origin_server_ts,
            },
            TimelineEntry::Gap(g) => Self::Gap {
                fragment_id: g.fragment_id.0,
                direction: g.direction.to_string(),
                token: g.token.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ShowReport {
    pub room_id: String,
    pub entries: Vec<ShowEntry>,
}

fn millis_to_local(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

pub fn run_show(args: &ShowArgs, ctx: &CommandContext, output: OutputMode) -> Result<()> {
    let count = args
        .count
        .unwrap_or_else(|| ctx.config.timeline().initial_load);
    let reader = TimelineReader::new(args.room.clone());
    let entries = ctx.store.read(|conn| reader.read_from_end(conn, count))?;

    let report = ShowReport {
        room_id: args.room.clone(),
        entries: entries.iter().map(ShowEntry::from).collect(),
    };

    render_mode(
        output,
        &report,
        |r, w| {
            for entry in &r.entries {
                match entry {
                    ShowEntry::Event {
                        position,
                        event_id,
                        sender,
                        event_type,
                        ..
                    } => writeln!(w, "{position}  {event_id}  {sender}  {event_type}")?,
                    ShowEntry::Gap {
                        direction, token, ..
                    } => writeln!(w, "gap  {direction}  {token}")?,
                }
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, &format!("Timeline {}", r.room_id))?;
            if r.entries.is_empty() {
                return writeln!(w, "(empty)");
            }
            for entry in &r.entries {
                match entry {
                    ShowEntry::Event {
                        event_id,
                        sender,
                        event_type,
                        origin_server_ts,
                        ..
                    } => writeln!(
                        w,
                        "{}  {sender:<24} {event_type:<20} {event_id}",
                        millis_to_local(*origin_server_ts)
                    )?,
                    ShowEntry::Gap {
                        fragment_id,
                        direction,
                        ..
                    } => writeln!(w, "  ~~ {direction} gap in fragment {fragment_id} ~~")?,
                }
            }
            Ok(())
        },
    )
}
