//! postflow-send - Background daemon for scheduled dispatch
//!
//! Watches the post store and publishes approved posts to their platforms
//! once their scheduled time has passed.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use libpostflow::error::ConfigError;
use libpostflow::logging;
use libpostflow::service::PostflowService;
use libpostflow::{Config, PostflowError, Result, SettingsStore};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "postflow-send")]
#[command(version)]
#[command(about = "Background daemon that dispatches scheduled posts")]
#[command(long_about = "\
postflow-send - Background daemon that dispatches scheduled posts

DESCRIPTION:
    postflow-send is a long-running daemon that polls the Postflow store
    and publishes scheduled posts once they are due.

    Each due post is claimed before it is published, so several daemons
    (or a daemon next to postflow-api) never publish the same post twice.
    Transient platform failures are retried with exponential backoff.
    Posts left half-dispatched by a crash are finalised on the next scan.

USAGE:
    # Run in foreground (logs to stderr)
    postflow-send

    # Run with custom poll interval
    postflow-send --poll-interval 10

    # Enable verbose logging
    postflow-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight dispatches)

CONFIGURATION:
    Configuration file: ~/.config/postflow/config.toml
    Database location: ~/.local/share/postflow/posts.db

    [scheduler]
    poll_interval = 30          # seconds between scans
    stale_dispatch_after = 900  # seconds before a dispatch counts as interrupted

    [dispatch]
    max_attempts = 3            # publish attempts per platform
    backoff_base_ms = 1000
    backoff_max_ms = 30000
    publish_timeout = 30        # seconds

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due posts (default: 30)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit
    #[arg(long)]
    #[arg(help = "Dispatch due posts once and exit")]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::from_env(cli.verbose).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("postflow-send failed: {}", e);
            eprintln!("Error: {}", e);
            match e.exit_code() {
                2 => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default()?;
    let service = PostflowService::from_config(config, SettingsStore::from_env()).await?;

    info!("postflow-send daemon starting");

    let mut scheduler = service.scheduler().clone();
    if let Some(seconds) = cli.poll_interval {
        scheduler = scheduler.with_poll_interval(Duration::from_secs(seconds));
    }
    info!("Poll interval: {}s", scheduler.poll_interval().as_secs());

    if cli.once {
        let report = scheduler.run_once().await?;
        info!(
            due = report.due,
            claimed = report.claimed,
            skipped = report.skipped,
            recovered = report.recovered,
            "postflow-send: processed due posts once, exiting"
        );
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        spawn_signal_listener(shutdown_tx)?;
        scheduler.run(shutdown_rx).await?;
    }

    info!("postflow-send daemon stopped");
    Ok(())
}

/// Flip `shutdown` on SIGINT or SIGTERM
#[cfg(unix)]
fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        PostflowError::Config(ConfigError::Invalid(format!("Signal setup failed: {}", e)))
    })?;

    tokio::spawn(async move {
        if signals.next().await.is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
