//! jobq - a local, persistent background job queue.
//!
//! Jobs are opaque shell commands stored durably and executed by a pool of
//! worker processes with bounded retries, exponential backoff, and a dead
//! letter queue for jobs that keep failing.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jobq_core::config::StateDir;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// jobq - background job queue
#[derive(Parser, Debug)]
#[command(name = "jobq")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// State directory (defaults to $JOBQ_HOME, then ~/.jobq)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a new job to the queue
    Enqueue {
        /// JSON job description, e.g. '{"id":"job1","command":"sleep 5"}'
        /// ('id' is optional and will be generated when absent)
        job: String,
    },

    /// Show worker status, job counts by state, and the DLQ size
    Status,

    /// List jobs, optionally filtered by state
    List {
        /// Only show jobs in this state (pending, processing, failed,
        /// completed)
        #[arg(long)]
        state: Option<String>,
    },

    /// Manage the dead letter queue
    #[command(subcommand)]
    Dlq(DlqCommands),

    /// View or set configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Manage worker processes
    #[command(subcommand)]
    Worker(WorkerCommands),
}

#[derive(Subcommand, Debug)]
enum DlqCommands {
    /// List all jobs in the dead letter queue
    List,

    /// Move a job from the dead letter queue back into the queue
    Retry {
        /// Id of the dead job
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the current configuration as JSON
    Show,

    /// Set a configuration value (max_retries or backoff_base)
    Set {
        /// Configuration key
        key: String,
        /// Integer value
        value: String,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCommands {
    /// Start worker processes in the foreground (Ctrl-C stops gracefully)
    Start {
        /// Number of worker processes
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Stop running workers gracefully via the supervisor pidfile
    Stop,

    /// Run a single worker loop (spawned by `worker start`)
    #[command(hide = true)]
    Run {
        /// Worker index, used for log prefixing only
        #[arg(long)]
        index: u32,

        /// Maximum retries after the first attempt
        #[arg(long)]
        max_retries: u32,

        /// Base of the exponential backoff
        #[arg(long)]
        backoff_base: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let state_dir = match cli.state_dir {
        Some(root) => StateDir::at(root),
        None => StateDir::resolve()?,
    };

    match cli.command {
        Commands::Enqueue { job } => commands::enqueue::run(&state_dir, &job),
        Commands::Status => commands::status::run(&state_dir),
        Commands::List { state } => commands::list::run(&state_dir, state.as_deref()),
        Commands::Dlq(DlqCommands::List) => commands::dlq::list(&state_dir),
        Commands::Dlq(DlqCommands::Retry { id }) => commands::dlq::retry(&state_dir, &id),
        Commands::Config(ConfigCommands::Show) => commands::config::show(&state_dir),
        Commands::Config(ConfigCommands::Set { key, value }) => {
            commands::config::set(&state_dir, &key, &value)
        },
        Commands::Worker(WorkerCommands::Start { count }) => {
            commands::worker::start(&state_dir, count)
        },
        Commands::Worker(WorkerCommands::Stop) => commands::worker::stop(&state_dir),
        Commands::Worker(WorkerCommands::Run {
            index,
            max_retries,
            backoff_base,
        }) => commands::worker::run_loop(&state_dir, index, max_retries, backoff_base),
    }
}
