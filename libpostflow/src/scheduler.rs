//! Scheduler: finds due posts and hands each to the dispatcher exactly once
//!
//! Exactly-once comes from the claim (`scheduled -> dispatching`
//! compare-and-set), not from the scheduler itself, so several schedulers
//! may scan the same database. Dispatches run as background tasks; a slow
//! post never delays the scan of the others.
//!
//! Posts claimed outside the scheduler (an operator re-dispatch) can be
//! handed to a running loop through a [`DispatchHandoff`]. They are then
//! tracked like the loop's own dispatches: skipped by stale recovery and
//! awaited on shutdown.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{PostflowError, Result};
use crate::types::Post;

/// What one scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Posts found due
    pub due: usize,
    /// Posts this scan claimed and dispatched
    pub claimed: usize,
    /// Due posts another worker claimed first
    pub skipped: usize,
    /// Interrupted dispatches that were finalised
    pub recovered: usize,
}

type DispatchTask = (String, Result<DispatchReport>);

/// Sends claimed posts to a running [`Scheduler::run_with_handoff`] loop
#[derive(Clone)]
pub struct DispatchHandoff {
    tx: mpsc::UnboundedSender<Post>,
}

impl DispatchHandoff {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Post>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hand a claimed post over. Gives the post back when the loop has
    /// stopped accepting work.
    pub fn submit(&self, post: Post) -> std::result::Result<(), Post> {
        self.tx.send(post).map_err(|e| e.0)
    }
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    stale_after: i64,
    scanning: bool,
}

impl Scheduler {
    pub fn new(db: Database, dispatcher: Dispatcher, config: &SchedulerConfig) -> Self {
        Self {
            db,
            dispatcher,
            poll_interval: config.poll_interval(),
            stale_after: config.stale_dispatch_after as i64,
            scanning: true,
        }
    }

    /// Only run handed-off dispatches; leave due posts to another worker
    pub fn without_scanning(mut self) -> Self {
        self.scanning = false;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(10));
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Finalise posts stuck in `dispatching` since before `now - stale_after`,
    /// ignoring the ids in `in_flight`
    pub async fn recover_stale(&self, now: i64, in_flight: &HashSet<String>) -> Result<usize> {
        let stale = self.db.stale_dispatches(now - self.stale_after).await?;
        let mut recovered = 0;

        for post in stale {
            if in_flight.contains(&post.id) {
                continue;
            }
            warn!(post_id = %post.id, "Recovering interrupted dispatch");
            match self.dispatcher.recover(&post, now).await {
                Ok(report) => {
                    info!(post_id = %post.id, state = %report.state, "Interrupted dispatch finalised");
                    recovered += 1;
                }
                Err(e) => error!(post_id = %post.id, "Could not recover dispatch: {}", e),
            }
        }

        Ok(recovered)
    }

    fn spawn_dispatch(
        &self,
        post: Post,
        tasks: &mut JoinSet<DispatchTask>,
        in_flight: &mut HashSet<String>,
    ) {
        in_flight.insert(post.id.clone());
        let dispatcher = self.dispatcher.clone();
        tasks.spawn(async move {
            let post_id = post.id.clone();
            (post_id, dispatcher.run(post).await)
        });
    }

    /// Claim due posts and spawn their dispatches onto `tasks`
    async fn scan(
        &self,
        now: i64,
        tasks: &mut JoinSet<DispatchTask>,
        in_flight: &mut HashSet<String>,
    ) -> Result<ScanReport> {
        let mut report = ScanReport {
            recovered: self.recover_stale(now, in_flight).await?,
            ..Default::default()
        };

        let due = self.db.due_posts(now).await?;
        report.due = due.len();
        if !due.is_empty() {
            info!("Found {} post(s) due for dispatch", due.len());
        }

        for post in due {
            match self.dispatcher.claim(&post.id, now).await {
                Ok(claimed) => {
                    report.claimed += 1;
                    self.spawn_dispatch(claimed, tasks, in_flight);
                }
                Err(PostflowError::ClaimConflict { .. }) => {
                    debug!(post_id = %post.id, "Post already claimed elsewhere");
                    report.skipped += 1;
                }
                Err(PostflowError::InvalidTransition { state, .. }) => {
                    debug!(post_id = %post.id, %state, "Post left the scheduled state before claim");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(post_id = %post.id, "Failed to claim post: {}", e);
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// One full scan at `now`, waiting for every dispatch it started
    pub async fn run_once_at(&self, now: i64) -> Result<ScanReport> {
        let mut tasks = JoinSet::new();
        let mut in_flight = HashSet::new();
        let report = self.scan(now, &mut tasks, &mut in_flight).await?;

        while let Some(joined) = tasks.join_next().await {
            log_dispatch(joined);
        }

        Ok(report)
    }

    pub async fn run_once(&self) -> Result<ScanReport> {
        self.run_once_at(chrono::Utc::now().timestamp()).await
    }

    /// Scan every poll interval until `shutdown` flips to true, then wait for
    /// in-flight dispatches before returning.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.serve(shutdown, None).await
    }

    /// Like [`Scheduler::run`], also dispatching posts sent through the
    /// matching [`DispatchHandoff`]
    pub async fn run_with_handoff(
        &self,
        shutdown: watch::Receiver<bool>,
        handoff: mpsc::UnboundedReceiver<Post>,
    ) -> Result<()> {
        self.serve(shutdown, Some(handoff)).await
    }

    async fn serve(
        &self,
        mut shutdown: watch::Receiver<bool>,
        mut handoff: Option<mpsc::UnboundedReceiver<Post>>,
    ) -> Result<()> {
        let mut tasks: JoinSet<DispatchTask> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(poll_interval = ?self.poll_interval, scanning = self.scanning, "Scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick(), if self.scanning => {
                    let now = chrono::Utc::now().timestamp();
                    match self.scan(now, &mut tasks, &mut in_flight).await {
                        Ok(report) if report.claimed > 0 || report.recovered > 0 => {
                            info!(?report, "Scan complete");
                        }
                        Ok(_) => {}
                        Err(e) => error!("Scan failed: {}", e),
                    }
                }
                Some(post) = recv_handoff(&mut handoff) => {
                    info!(post_id = %post.id, "Dispatching handed-off post");
                    self.spawn_dispatch(post, &mut tasks, &mut in_flight);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Ok((post_id, _)) = &joined {
                        in_flight.remove(post_id);
                    }
                    log_dispatch(joined);
                }
            }
        }

        // Posts handed over before the close still get dispatched
        if let Some(rx) = handoff.as_mut() {
            rx.close();
            while let Ok(post) = rx.try_recv() {
                self.spawn_dispatch(post, &mut tasks, &mut in_flight);
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight dispatch(es)", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            log_dispatch(joined);
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

/// Next handed-off post; pending forever without a handoff or once every
/// sender is gone
async fn recv_handoff(handoff: &mut Option<mpsc::UnboundedReceiver<Post>>) -> Option<Post> {
    let Some(rx) = handoff.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Some(post) => Some(post),
        None => std::future::pending().await,
    }
}

fn log_dispatch(joined: std::result::Result<DispatchTask, tokio::task::JoinError>) {
    match joined {
        Ok((_, Ok(report))) => debug!(post_id = %report.post_id, state = %report.state, "Dispatch task done"),
        Ok((post_id, Err(e))) => error!(post_id = %post_id, "Dispatch failed: {}", e),
        Err(e) => error!("Dispatch task aborted: {}", e),
    }
}
