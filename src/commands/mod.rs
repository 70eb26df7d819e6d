mod build;
mod config;
mod daemon;
mod manage;
mod refresh;
mod sources;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use rove::schedule::task::RefreshTask;
use rove::state::AppState;

/// Rove - builds and maintains one context document per work item
#[derive(Parser)]
#[command(name = "rove")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (default: .rove/settings.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build (or rebuild) the context document for a work item
    Build(build::BuildArgs),

    /// Refresh one tracked item, or run one scheduler tick over all of them
    Refresh {
        /// Tracked item id; omit to refresh every eligible item
        id: Option<String>,
    },

    /// Show tracked items, their cursors and recent tasks
    Status,

    /// Print the document path for a tracked item
    Find { id: String },

    /// List tracked items whose id, keywords or filename match
    Search { query: String },

    /// List registered sources
    Sources,

    /// Stop tracking an item
    Forget(manage::ForgetArgs),

    /// Show the effective settings
    Config,

    /// Refresh on a schedule until Ctrl-C
    Daemon,
}

pub async fn dispatch(command: Commands, state: &AppState) -> Result<()> {
    match command {
        Commands::Build(args) => build::build(state, args).await,
        Commands::Refresh { id } => refresh::refresh(state, id).await,
        Commands::Status => status::status(state).await,
        Commands::Find { id } => status::find(state, &id).await,
        Commands::Search { query } => status::search(state, &query).await,
        Commands::Sources => sources::sources(state),
        Commands::Forget(args) => manage::forget(state, args).await,
        Commands::Config => config::show(&state.config),
        Commands::Daemon => daemon::daemon(state).await,
    }
}

pub use config::show as show_config;

/// One-line task summary followed by per-source detail.
fn print_task(task: &RefreshTask) {
    println!("{} {:?} ({:?}, task {})", task.item, task.state, task.trigger, task.id);
    let Some(report) = &task.report else {
        return;
    };
    if let Some(error) = &report.error {
        println!("  error: {}", error);
    }
    for (source, r) in &report.sources {
        let mark = if r.degraded { "✗" } else { "✓" };
        println!(
            "  {} {:<8} {} items, {} calls, {} attempts",
            mark, source, r.items, r.calls, r.attempts
        );
        for failure in &r.failures {
            println!("      {}", failure);
        }
    }
    if report.oracle_degraded {
        println!("  similarity oracle unavailable, merged by identity only");
    }
    println!(
        "  discovered {}, added {}, duplicates {}, already known {}",
        report.discovered, report.accepted, report.duplicates, report.exact_skipped
    );
    for edge in &report.edges {
        println!("    + {} via {} (hop {})", edge.child, edge.parent, edge.hop);
    }
    if let Some(path) = &report.document {
        let note = if report.document_written { "" } else { " (unchanged)" };
        println!("  document: {}{}", path.display(), note);
    }
}
