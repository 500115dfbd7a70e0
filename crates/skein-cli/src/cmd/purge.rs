//! `skein purge`: drop everything stored for a room.

use crate::cmd::CommandContext;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write;

#[derive(Args, Debug)]
pub struct PurgeArgs {
    #[arg(long)]
    pub room: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeReport {
    pub room_id: String,
    pub events_removed: usize,
    pub db: String,
}

pub fn run_purge(args: &PurgeArgs, ctx: &CommandContext, output: OutputMode) -> Result<()> {
    let removed = ctx.store.purge_room(&args.room)?;
    let report = PurgeReport {
        room_id: args.room.clone(),
        events_removed: removed,
        db: ctx.db_path.display().to_string(),
    };

    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "{}  removed={}", r.room_id, r.events_removed),
        |r, w| {
            pretty_section(w, &format!("Purged {}", r.room_id))?;
            pretty_kv(w, "events", r.events_removed.to_string())?;
            pretty_kv(w, "store", &r.db)
        },
    )
}
