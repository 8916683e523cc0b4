//! Arbor CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Incremental diagnostics and edit previews for multi-project workspaces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Treat the root as a single project directory instead of a workspace
    #[arg(long)]
    project: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Report compiler diagnostics only, skipping analyzers
    #[arg(long)]
    no_analyzers: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every project and report diagnostics
    Check {
        /// Only report this project
        #[arg(short, long)]
        only: Option<String>,
    },
    /// Show the project dependency graph
    Graph,
    /// Preview the diagnostic impact of an edit without writing it
    Preview {
        /// File to edit
        file: PathBuf,

        /// Byte offset where the replaced span starts
        #[arg(long)]
        start: usize,

        /// Length in bytes of the replaced span
        #[arg(long, default_value = "0")]
        length: usize,

        /// Replacement text
        #[arg(long, default_value = "")]
        text: String,

        /// Write the edit to disk after previewing it
        #[arg(long)]
        commit: bool,
    },
    /// Watch the workspace and report diagnostics as files change
    Watch,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging; ARBOR_LOG overrides the default filter
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("ARBOR_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("arbor={}", log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Arbor v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Workspace root: {}", cli.root.display());

    let options = commands::Options {
        root: cli.root,
        config: cli.config,
        project: cli.project,
        json: cli.json,
        analyzers: cli.no_analyzers.then_some(false),
    };

    match cli.command {
        Commands::Check { only } => commands::check(options, only).await,
        Commands::Graph => commands::graph(options).await,
        Commands::Preview {
            file,
            start,
            length,
            text,
            commit,
        } => commands::preview(options, file, start, length, text, commit).await,
        Commands::Watch => commands::watch(options).await,
        Commands::Version => {
            println!("Arbor v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
