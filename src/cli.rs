//! CLI definitions for keel.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// keel reference host.
#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Run the demo systems on the keel application kernel")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    /// Override the configured log level
    #[arg(long, env = "KEEL_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start the kernel and drive the tick loop (default)
    Run {
        /// Stop after this many ticks (overrides `host.max_ticks`)
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Print the dependency graph
    Graph {
        /// Start the kernel and include the dependencies bound at injection
        #[arg(long)]
        live: bool,
    },

    /// Start, run one tick and print every system's status as JSON
    Status,
}
