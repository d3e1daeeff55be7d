use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Shell history capture with semantic search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command, capturing its output and recording it in history
    Run {
        /// Command and arguments to execute
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Record an already-executed command without running it
    Record {
        /// Command text
        command: String,

        /// Exit code the command finished with
        #[arg(long, default_value = "0")]
        exit_code: i32,

        /// Wall-clock duration in milliseconds
        #[arg(long, default_value = "0")]
        duration_ms: i64,
    },

    /// Full-text search over command history
    Search {
        /// Query text
        query: String,

        /// Maximum number of results
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Semantic search over command history
    Semantic {
        /// Query text
        query: String,
    },

    /// Show the most recent commands
    Recent {
        /// Maximum number of results
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show history and embedding statistics
    Stats {
        /// Output results as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Re-queue commands whose embedding generation failed
    RetryFailed,

    /// Clear the in-memory embedding cache and its persisted snapshot
    CacheClear,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { command } => commands::run::execute(command),
        Commands::Record {
            command,
            exit_code,
            duration_ms,
        } => commands::record::execute(command, exit_code, duration_ms),
        Commands::Search { query, limit } => commands::search::execute(&query, limit),
        Commands::Semantic { query } => commands::semantic::execute(&query),
        Commands::Recent { limit } => commands::recent::execute(limit),
        Commands::Stats { json } => commands::stats::execute(json),
        Commands::RetryFailed => commands::retry_failed::execute(),
        Commands::CacheClear => commands::cache_clear::execute(),
    }
}
