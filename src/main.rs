//! Homespool Binary Entry Point
//!
//! Runs the scheduler, a single job, or a spool flush.
//! Core functionality is provided by the `homespool` library crate.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use homespool::{
    collector::{Collector, JobRunner},
    config::{AppConfig, JobDefinition, parse_duration},
    flush::flush_spool,
    scheduler::Scheduler,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Homespool - Home Infrastructure API Poller
#[derive(Parser, Debug)]
#[command(name = "homespool", version, about, long_about = None)]
struct Cli {
    /// Path to an optional process configuration file
    #[arg(short, long, env = "HOMESPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Spool root (overrides config file and SPOOL_DIR)
    #[arg(long)]
    spool_dir: Option<PathBuf>,

    /// Environment tag (overrides config file and ENVIRONMENT)
    #[arg(long)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Run {
        /// Directory of job definitions
        #[arg(long, env = "HOMESPOOL_CONFIGS_DIR")]
        configs_dir: Option<PathBuf>,

        /// Tick period (e.g. "5s")
        #[arg(long, value_parser = parse_duration)]
        tick: Option<Duration>,

        /// Concurrent job runs
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Run one job once
    Collect {
        /// Job definition path, or a file name inside the configs directory
        job: PathBuf,

        /// Directory bare job names are resolved against
        #[arg(long, env = "HOMESPOOL_CONFIGS_DIR")]
        configs_dir: Option<PathBuf>,
    },

    /// Upload spooled records
    Flush {
        /// Logical target path; every spooled target when omitted
        #[arg(long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Load .env before clap reads environment-backed arguments
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,homespool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (CLI > ENV > config file)
    if let Some(path) = &cli.config {
        tracing::info!(path = %path.display(), "Loading configuration");
    }
    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.spool_dir {
        config.spool.root = dir;
    }
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }

    tracing::info!(
        spool = %config.spool.root.display(),
        container = %config.remote.container,
        remote = config.remote.connection_string.is_some(),
        environment = %config.environment,
        "Configuration loaded"
    );

    match cli.command {
        Command::Run {
            configs_dir,
            tick,
            workers,
        } => {
            if let Some(dir) = configs_dir {
                config.scheduler.configs_dir = dir;
            }
            if let Some(tick) = tick {
                config.scheduler.tick = tick;
            }
            if let Some(workers) = workers {
                config.scheduler.workers = workers;
            }
            config.validate()?;

            // Parts orphaned by an earlier crash
            let report = flush_spool(&config.spool(), &config.remote, None).await;
            tracing::info!(flushed = report.flushed, failed = report.failed, "Startup flush complete");

            let runner = Arc::new(Collector::from_config(&config));
            Scheduler::from_config(&config.scheduler, runner)
                .run(shutdown_signal())
                .await;

            tracing::info!("Shutdown complete");
            Ok(ExitCode::SUCCESS)
        }

        Command::Collect { job, configs_dir } => {
            let configs_dir = configs_dir.unwrap_or_else(|| config.scheduler.configs_dir.clone());
            let path = locate_job(&job, &configs_dir)?;
            tracing::info!(path = %path.display(), "Loading job definition");

            let definition = JobDefinition::load(&path)?;
            let report = Collector::from_config(&config).run(definition).await?;
            println!("{report}");
            Ok(ExitCode::SUCCESS)
        }

        Command::Flush { target } => {
            let report = flush_spool(&config.spool(), &config.remote, target.as_deref()).await;
            println!("{report}");
            Ok(if report.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

/// Resolve a job argument: an existing path, else a file in `configs_dir`.
fn locate_job(job: &Path, configs_dir: &Path) -> Result<PathBuf, String> {
    if job.is_file() {
        return Ok(job.to_path_buf());
    }
    if let Some(name) = job.file_name() {
        let candidate = configs_dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(format!(
        "job definition not found at '{}' or in '{}'",
        job.display(),
        configs_dir.display()
    ))
}

/// Resolve when Ctrl+C or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
