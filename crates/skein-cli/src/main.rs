#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::CommandContext;
use output::{CliError, OutputMode, render_error};
use skein_core::{ErrorCode, TimelineError};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "skein",
    author,
    version,
    about = "skein: gap-aware room timeline cache",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for skein crates.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Timeline database to use instead of the configured one.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Write",
        about = "Persist a sync batch",
        long_about = "Persist one room's sync batch, appending to the live fragment or starting a new one.",
        after_help = "EXAMPLES:\n    # Apply a batch\n    skein sync --room '!r:hs' --file batch.json\n\n    # Emit machine-readable output\n    skein sync --room '!r:hs' --file batch.json --json"
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(
        next_help_heading = "Read",
        about = "List fragments by chain",
        after_help = "EXAMPLES:\n    skein fragments --room '!r:hs'"
    )]
    Fragments(cmd::fragments::FragmentsArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show the newest timeline entries",
        after_help = "EXAMPLES:\n    # Last 20 events\n    skein show --room '!r:hs' -n 20"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Write",
        about = "Fill the first gap from fixture pages",
        long_about = "Load the room's timeline, then fill its first gap using pages from a token-keyed JSON file.",
        after_help = "EXAMPLES:\n    skein fill --room '!r:hs' --pages pages.json --amount 50"
    )]
    Fill(cmd::fill::FillArgs),

    #[command(
        next_help_heading = "Write",
        about = "Store an event-context page",
        long_about = "Persist a jump-to-event context page, linking it to stored fragments it overlaps, then show the entries around its anchor.",
        after_help = "EXAMPLES:\n    skein context --room '!r:hs' --file context.json -n 10"
    )]
    Context(cmd::context::ContextArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Delete a room's stored timeline"
    )]
    Purge(cmd::purge::PurgeArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("SKEIN_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "skein=debug,info"
        } else {
            "skein=info,warn"
        })
    });

    let format = env::var("SKEIN_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, project_root: &std::path::Path) -> anyhow::Result<()> {
    let ctx = CommandContext::open(project_root, cli.db.as_deref(), cli.json)?;
    let output = OutputMode::from_resolved(&ctx.config.resolved_output);
    debug!(?output, command = ?cli.command, "dispatching");

    match &cli.command {
        Commands::Sync(args) => cmd::sync::run_sync(args, &ctx, output)?,
        Commands::Fragments(args) => cmd::fragments::run_fragments(args, &ctx, output)?,
        Commands::Show(args) => cmd::show::run_show(args, &ctx, output)?,
        Commands::Fill(args) => cmd::fill::run_fill(args, ctx, output)?,
        Commands::Context(args) => cmd::context::run_context(args, &ctx, output)?,
        Commands::Purge(args) => cmd::purge::run_purge(args, &ctx, output)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|root| run(&cli, &root));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mode = if cli.json {
                OutputMode::Json
            } else {
                OutputMode::Text
            };
            let cli_error = describe_error(&err);
            if render_error(mode, &cli_error).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Attach a stable code and hint when the failure came from the timeline.
fn describe_error(err: &anyhow::Error) -> CliError {
    let message = format!("{err:#}");
    if let Some(timeline) = err.downcast_ref::<TimelineError>() {
        let code = timeline.code();
        return CliError::with_details(message, code.hint(), code.code());
    }
    if let Some(store) = err.downcast_ref::<skein_core::StoreError>() {
        let code = store.code();
        return CliError::with_details(message, code.hint(), code.code());
    }
    if skein_core::config::is_parse_error(err) {
        let code = ErrorCode::ConfigParseError;
        return CliError::with_details(message, code.hint(), code.code());
    }
    CliError::new(message)
}
