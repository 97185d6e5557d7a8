mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Transactional outbox delivery queue.
#[derive(Debug, Parser)]
#[command(name = "courier", version, about)]
pub struct Cli {
    /// JSON config file; flags and env override its values.
    #[arg(long, env = "COURIER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path.
    #[arg(long, env = "COURIER_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Directory relocated resources are saved under.
    #[arg(long, env = "COURIER_SAVE_DIR", global = true)]
    pub save_dir: Option<PathBuf>,

    #[arg(long, env = "COURIER_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "COURIER_LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the schema (optionally dropping existing tables first).
    Init {
        #[arg(long)]
        reset: bool,
    },

    /// Publish mock events: one per path, every interval.
    Produce {
        /// Paths to publish each tick (defaults to the demo paths).
        #[arg(long = "path")]
        paths: Vec<String>,

        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Publish a single batch and exit.
        #[arg(long)]
        once: bool,

        /// Attempt budget for the published entries.
        #[arg(long, env = "COURIER_MAX_ATTEMPTS")]
        max_attempts: Option<u32>,
    },

    /// Run one delivery worker until Ctrl-C.
    Worker {
        #[command(flatten)]
        tuning: Tuning,

        #[command(flatten)]
        sender: SenderArgs,
    },

    /// Run the recovery sweeper.
    Recover {
        /// Report what would be reset without writing.
        #[arg(long)]
        dry_run: bool,

        /// Sweep once, print the report, and exit.
        #[arg(long)]
        once: bool,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Run workers and the sweeper (and optionally the mock feed) until Ctrl-C.
    Run {
        #[arg(long, env = "COURIER_WORKERS")]
        workers: Option<usize>,

        /// Also run the mock producer feed.
        #[arg(long)]
        feed: bool,

        #[arg(long, default_value_t = 1000)]
        feed_interval_ms: u64,

        /// Attempt budget for entries published by the feed.
        #[arg(long, requires = "feed")]
        max_attempts: Option<u32>,

        #[command(flatten)]
        tuning: Tuning,

        #[command(flatten)]
        sender: SenderArgs,
    },

    /// Print entry counts per status.
    Status,

    /// Print one entry and its record.
    Inspect {
        #[arg(long)]
        gid: String,
    },
}

/// Overrides for the loop settings in the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct Tuning {
    #[arg(long, env = "COURIER_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, env = "COURIER_LEASE_TIMEOUT_SECS")]
    pub lease_timeout_secs: Option<u64>,

    #[arg(long, env = "COURIER_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: Option<u64>,

    #[arg(long, env = "COURIER_BATCH_SIZE")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub struct SenderArgs {
    /// Probability that a simulated send fails.
    #[arg(long, default_value_t = 0.2)]
    pub failure_rate: f64,

    #[arg(long, default_value_t = 200)]
    pub min_latency_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub max_latency_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json)?;
    commands::dispatch(cli).await
}
