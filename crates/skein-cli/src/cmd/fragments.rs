//! `skein fragments`: list a room's fragments grouped into chains.

use crate::cmd::CommandContext;
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use skein_core::model::{Fragment, FragmentId};
use skein_core::store::{events, fragments, rooms};
use skein_core::FragmentIdComparer;
use std::collections::HashSet;
use std::io::Write;

#[derive(Args, Debug)]
pub struct FragmentsArgs {
    #[arg(long)]
    pub room: String,
}

#[derive(Debug, Serialize)]
pub struct FragmentRow {
    pub id: i64,
    pub start: String,
    pub end: String,
    pub events: usize,
    pub live: bool,
}

#[derive(Debug, Serialize)]
pub struct FragmentsReport {
    pub room_id: String,
    /// Connected runs of fragments, each oldest first.
    pub chains: Vec<Vec<FragmentRow>>,
}

pub fn run_fragments(args: &FragmentsArgs, ctx: &CommandContext, output: OutputMode) -> Result<()> {
    let (all, counts, live) = ctx.store.read(|conn| {
        let all = fragments::list_for_room(conn, &args.room)?;
        let counts = all
            .iter()
            .map(|f| events::count_in_fragment(conn, f.id))
            .collect::<Result<Vec<_>, _>>()?;
        let live = rooms::get(conn, &args.room)?.and_then(|r| r.live_fragment_id);
        Ok((all, counts, live))
    })?;

    let report = FragmentsReport {
        room_id: args.room.clone(),
        chains: group_chains(&all, &counts, live),
    };

    render_mode(
        output,
        &report,
        |r, w| {
            for (n, chain) in r.chains.iter().enumerate() {
                for row in chain {
                    writeln!(
                        w,
                        "chain={n}  id={}  start={}  end={}  events={}{}",
                        row.id,
                        row.start,
                        row.end,
                        row.events,
                        if row.live { "  live" } else { "" }
                    )?;
                }
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, &format!("Fragments in {}", r.room_id))?;
            if r.chains.is_empty() {
                return writeln!(w, "(no stored timeline)");
            }
            for (n, chain) in r.chains.iter().enumerate() {
                writeln!(w, "chain {n}")?;
                for row in chain {
                    let label = if row.live {
                        format!("#{} (live)", row.id)
                    } else {
                        format!("#{}", row.id)
                    };
                    pretty_kv(
                        w,
                        &label,
                        format!("{} events  [{} .. {}]", row.events, row.start, row.end),
                    )?;
                }
                pretty_rule(w)?;
            }
            Ok(())
        },
    )
}

/// Group fragments into linked chains, oldest first within each chain.
/// Chains are ordered by their smallest fragment id.
fn group_chains(all: &[Fragment], counts: &[usize], live: Option<FragmentId>) -> Vec<Vec<FragmentRow>> {
    let comparer = FragmentIdComparer::from_fragments(all);
    let mut seen = HashSet::new();
    let mut chains = Vec::new();
    for fragment in all {
        if seen.contains(&fragment.id) {
            continue;
        }
        let members = comparer.chain(fragment.id);
        let rows = members
            .iter()
            .filter_map(|id| {
                let pos = all.iter().position(|f| f.id == *id)?;
                let f = &all[pos];
                Some(FragmentRow {
                    id: f.id.0,
                    start: f.start.to_string(),
                    end: f.end.to_string(),
                    events: counts.get(pos).copied().unwrap_or(0),
                    live: live == Some(f.id),
                })
            })
            .collect();
        seen.extend(members);
        chains.push(rows);
    }
    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::model::Boundary;

    fn fragment(id: i64, start: Boundary, end: Boundary) -> Fragment {
        Fragment {
            id: FragmentId(id),
            room_id: "!r:hs".into(),
            start,
            end,
        }
    }

    #[test]
    fn chains_follow_links_not_ids() {
        let all = vec![
            fragment(1, Boundary::Linked(FragmentId(3)), Boundary::Gap("live".into())),
            fragment(2, Boundary::Gap("ctx".into()), Boundary::Gap("ctx-end".into())),
            fragment(3, Boundary::Edge, Boundary::Linked(FragmentId(1))),
        ];
        let chains = group_chains(&all, &[2, 5, 4], Some(FragmentId(1)));
        let ids: Vec<Vec<i64>> = chains
            .iter()
            .map(|c| c.iter().map(|r| r.id).collect())
            .collect();
        assert_eq!(ids, vec![vec![3, 1], vec![2]]);
        assert!(chains[0][1].live);
        assert_eq!(chains[0][0].events, 4);
    }
}
