//! postflow-api - HTTP server for the Postflow pipeline

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use libpostflow::logging;
use libpostflow::scheduler::DispatchHandoff;
use libpostflow::service::PostflowService;
use libpostflow::{Config, SettingsStore};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "postflow-api")]
#[command(version)]
#[command(about = "HTTP API for reviewing, scheduling and dispatching posts")]
#[command(long_about = "\
postflow-api - HTTP API for reviewing, scheduling and dispatching posts

DESCRIPTION:
    Serves the Postflow JSON API and, unless disabled, runs the scheduler
    in the same process so approved posts are published when due.

USAGE:
    # Listen on the configured address (default 127.0.0.1:5001)
    postflow-api

    # Listen elsewhere, leave dispatching to postflow-send
    postflow-api --bind 0.0.0.0:8080 --no-scheduler

ENVIRONMENT:
    OPENAI_API_KEY            Key for content generation
    FACEBOOK_ACCESS_TOKEN     Page token for Facebook
    INSTAGRAM_ACCESS_TOKEN    Token for the Instagram business account
    POSTFLOW_CONFIG           Config file path
    POSTFLOW_LOG_FORMAT       text, json or pretty

SIGNALS:
    SIGTERM, SIGINT - Stop accepting requests, finish in-flight dispatches
")]
struct Cli {
    /// Address to listen on (overrides config)
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Do not run the scheduler in this process
    #[arg(long)]
    no_scheduler: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::from_env(cli.verbose).init();

    let config = Config::load_or_default().context("failed to load configuration")?;
    let bind = match cli.bind {
        Some(bind) => bind,
        None => config
            .api
            .bind
            .parse()
            .with_context(|| format!("invalid api.bind address '{}'", config.api.bind))?,
    };

    let service = PostflowService::from_config(config, SettingsStore::from_env())
        .await
        .context("failed to open the post store")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx)?;

    // Runs even without scanning so re-dispatches are drained on shutdown
    let (handoff, handoff_rx) = DispatchHandoff::channel();
    let mut scheduler = service.scheduler().clone();
    if cli.no_scheduler {
        info!("Scheduler disabled, due posts will only be dispatched by another worker");
        scheduler = scheduler.without_scanning();
    }
    let scheduler_rx = shutdown_rx.clone();
    let scheduler = tokio::spawn(async move {
        scheduler.run_with_handoff(scheduler_rx, handoff_rx).await
    });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("postflow-api listening on http://{}", bind);

    let mut server_rx = shutdown_rx.clone();
    axum::serve(listener, postflow_api::router_with_handoff(service, handoff))
        .with_graceful_shutdown(async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("server terminated with error")?;

    match scheduler.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Scheduler stopped with error: {}", e),
        Err(e) => error!("Scheduler task failed: {}", e),
    }

    info!("postflow-api stopped");
    Ok(())
}

/// Flip `shutdown` on SIGINT or SIGTERM
#[cfg(unix)]
fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("signal setup failed")?;
    tokio::spawn(async move {
        if signals.next().await.is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
