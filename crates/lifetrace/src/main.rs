// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LifeTrace background services.
//!
//! One binary, one subcommand per long-running role: `supervise` keeps the
//! other roles alive, `sync` keeps the artifact index consistent with the
//! artifact directory, and `worker` drains the task queue. The remaining
//! subcommands are one-shot operator tools.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod heartbeat;
mod shutdown;
mod status;
mod supervise;
mod sync;
mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lifetrace_config::LifetraceConfig;
use lifetrace_core::LifetraceError;
use lifetrace_storage::Database;

/// LifeTrace background services.
#[derive(Parser, Debug)]
#[command(name = "lifetrace", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Name announced in heartbeats. Must match the supervisor's service
    /// entry for this process. Defaults to the subcommand name.
    #[arg(long, global = true)]
    service_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Receive heartbeats and keep configured services running.
    Supervise,
    /// Reconcile the artifact directory with the index and watch for deletions.
    Sync,
    /// Process queued tasks.
    Worker,
    /// Run one consistency pass and print the report as JSON.
    Check,
    /// Queue a task for an indexed artifact.
    Enqueue {
        artifact_id: i64,
        /// Task kind; defaults to `worker.task_kind`.
        #[arg(long)]
        kind: Option<String>,
    },
    /// Show task and artifact counts.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => lifetrace_config::load_and_validate_path(path),
        None => lifetrace_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            lifetrace_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging.level);

    let result = match cli.command {
        Commands::Supervise => supervise::run_supervise(config).await,
        Commands::Sync => {
            sync::run_sync(config, cli.service_name.as_deref().unwrap_or(sync::SERVICE)).await
        }
        Commands::Worker => {
            worker::run_worker(config, cli.service_name.as_deref().unwrap_or(worker::SERVICE)).await
        }
        Commands::Check => sync::run_check(&config).await,
        Commands::Enqueue { artifact_id, kind } => {
            status::run_enqueue(&config, artifact_id, kind.as_deref()).await
        }
        Commands::Status { json } => status::run_status(&config, json).await,
    };

    if let Err(e) = result {
        eprintln!("lifetrace: {e}");
        std::process::exit(1);
    }
}

/// Open the configured database, applying migrations.
pub(crate) async fn open_database(config: &LifetraceConfig) -> Result<Database, LifetraceError> {
    Database::open_with_config(&config.storage).await
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lifetrace={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
