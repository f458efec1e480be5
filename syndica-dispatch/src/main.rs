//! syndica-dispatch - Background daemon for scheduled publishing
//!
//! Polls the work-item queue and publishes posts whose scheduled time has
//! arrived.

use clap::Parser;
use libsyndica::credentials::CredentialManager;
use libsyndica::drivers::DriverRegistry;
use libsyndica::{Config, Database, Dispatcher, PostOrchestrator, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "syndica-dispatch")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
syndica-dispatch - Background daemon for scheduled publishing

DESCRIPTION:
    syndica-dispatch is a long-running daemon that monitors the Syndica
    work queue and publishes scheduled posts when they come due.

    It polls the database at regular intervals, claims due work items,
    publishes to each target platform with per-platform isolation, and
    records the outcome on both the post and the work item.

USAGE:
    # Run in foreground (logs to stderr)
    syndica-dispatch

    # Run with custom poll interval
    syndica-dispatch --poll-interval 30

    # Enable verbose logging
    syndica-dispatch --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current tick)

CONFIGURATION:
    Configuration file: ~/.config/syndica/config.toml

    [dispatcher]
    poll_interval_secs = 60
    batch_size = 20
    max_concurrency = 4

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or credential error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run one dispatch pass and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    libsyndica::logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Database::new(&config.database.path).await?;

    let drivers = Arc::new(DriverRegistry::from_config(&config)?);
    let credentials = Arc::new(CredentialManager::new(db.clone(), drivers.clone()));
    let orchestrator = Arc::new(PostOrchestrator::new(db.clone(), credentials, drivers));
    let dispatcher = Dispatcher::new(
        db,
        orchestrator,
        config.dispatcher.batch_size,
        config.dispatcher.max_concurrency,
    );

    info!("syndica-dispatch daemon starting");

    let stuck = dispatcher.report_stuck_items().await?;
    if stuck > 0 {
        info!("{} item(s) stranded in processing from a previous run", stuck);
    }

    let poll_interval = cli
        .poll_interval
        .unwrap_or(config.dispatcher.poll_interval_secs);
    info!("Poll interval: {}s", poll_interval);

    if cli.once {
        let summary = dispatcher.tick().await?;
        info!(
            "syndica-dispatch: single pass done ({} claimed, {} completed, {} failed)",
            summary.claimed, summary.completed, summary.failed
        );
    } else {
        let shutdown = Arc::new(AtomicBool::new(false));
        setup_signal_handlers(shutdown.clone())?;
        run_daemon_loop(&dispatcher, poll_interval, shutdown).await;
    }

    info!("syndica-dispatch daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libsyndica::SyndicaError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(dispatcher: &Dispatcher, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        match dispatcher.tick().await {
            Ok(summary) if summary.claimed > 0 => {
                info!(
                    "Tick: {} claimed, {} completed, {} failed",
                    summary.claimed, summary.completed, summary.failed
                );
            }
            Ok(_) => {}
            Err(e) => error!("Error processing work items: {}", e),
        }

        // Sleep until next poll (check shutdown every second)
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}
