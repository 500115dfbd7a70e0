//! `skein sync`: persist one room's sync batch from a JSON file.

use crate::cmd::{CommandContext, read_json};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use skein_core::persist::{SyncBatch, SyncWriter};
use skein_core::store::fragments;
use skein_core::FragmentIdComparer;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Room the batch belongs to.
    #[arg(long)]
    pub room: String,

    /// JSON file holding `{events, prev_batch, next_batch, limited}`.
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub room_id: String,
    pub fragment_id: i64,
    pub new_live_fragment: bool,
    pub written: usize,
    pub event_ids: Vec<String>,
    pub next_batch: String,
}

pub fn run_sync(args: &SyncArgs, ctx: &CommandContext, output: OutputMode) -> Result<()> {
    let batch: SyncBatch = read_json(&args.file)?;
    let known = ctx
        .store
        .read(|conn| fragments::list_for_room(conn, &args.room))?;
    let writer = SyncWriter::new(
        args.room.clone(),
        Arc::new(FragmentIdComparer::from_fragments(&known)),
    );
    let write = writer.write_sync(&ctx.store, &batch)?;

    let report = SyncReport {
        room_id: args.room.clone(),
        fragment_id: write.fragment_id.0,
        new_live_fragment: write.new_live_fragment,
        written: write.entries.len(),
        event_ids: write
            .entries
            .iter()
            .map(|e| e.event.event_id.clone())
            .collect(),
        next_batch: batch.next_batch,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "{}  fragment={}  written={}  new_live={}",
                r.room_id, r.fragment_id, r.written, r.new_live_fragment
            )
        },
        |r, w| {
            pretty_section(w, &format!("Sync {}", r.room_id))?;
            pretty_kv(w, "fragment", r.fragment_id.to_string())?;
            pretty_kv(w, "written", r.written.to_string())?;
            pretty_kv(w, "new live", if r.new_live_fragment { "yes" } else { "no" })?;
            pretty_kv(w, "next batch", &r.next_batch)
        },
    )
}
