//! Multi-platform dispatch
//!
//! A dispatch starts from a claimed post (`dispatching`), publishes to every
//! platform whose result is `pending` and finishes the post with the
//! aggregate state. Platforms run in their own tasks and each one stores its
//! outcome as soon as it resolves, so a slow or panicking publisher never
//! holds back or loses the result of another.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::config::DispatchConfig;
use crate::db::{Database, ResultsChange, StateChange};
use crate::error::{PlatformError, PostflowError, Result};
use crate::lifecycle::{DispatchOutcome, Transition};
use crate::platforms::{Platform, PlatformRegistry, PublishResult};
use crate::service::events::{Event, EventBus};
use crate::settings::{Credentials, SettingsStore};
use crate::types::{PlatformResult, PlatformStatus, Post, PostState};

/// Per-platform retry budget for one dispatch round
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per platform, first attempt included
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub publish_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            publish_timeout: Duration::from_secs(config.publish_timeout.max(1)),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based): exponential,
    /// capped, with up to 10% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let base_ms = self.backoff_base.as_millis() as u64;
        let max_ms = self.backoff_max.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << exponent).min(max_ms);

        let jitter_ms = if delay_ms >= 10 {
            rand::thread_rng().gen_range(0..=delay_ms / 10)
        } else {
            0
        };

        Duration::from_millis((delay_ms + jitter_ms).min(max_ms.max(delay_ms)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

/// Final view of one dispatch round
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub post_id: String,
    pub state: PostState,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub results: BTreeMap<String, PlatformResult>,
}

impl DispatchReport {
    fn from_post(post: &Post) -> Self {
        let succeeded = post
            .platform_results
            .iter()
            .filter(|(_, r)| r.status == PlatformStatus::Success)
            .map(|(p, _)| p.clone())
            .collect();

        Self {
            post_id: post.id.clone(),
            state: post.state,
            succeeded,
            failed: post
                .failed_platforms()
                .into_iter()
                .map(String::from)
                .collect(),
            results: post.platform_results.clone(),
        }
    }
}

/// Everything one platform task needs, owned so it can be spawned
struct PublishJob {
    post_id: String,
    platform: String,
    publisher: Option<Arc<dyn Platform>>,
    content: String,
    image_url: Option<String>,
    credentials: Credentials,
    previous_attempts: u32,
    policy: RetryPolicy,
    db: Database,
    events: EventBus,
}

#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    registry: PlatformRegistry,
    settings: SettingsStore,
    policy: RetryPolicy,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        registry: PlatformRegistry,
        settings: SettingsStore,
        policy: RetryPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            registry,
            settings,
            policy,
            events,
        }
    }

    fn announce(&self, post_id: &str, from: PostState, to: PostState) {
        self.events.emit(Event::StateChanged {
            post_id: post_id.to_string(),
            from,
            to,
        });
    }

    /// Take exclusive dispatch rights on a due `scheduled` post
    pub async fn claim(&self, post_id: &str, now: i64) -> Result<Post> {
        let applied = self
            .db
            .transition(
                post_id,
                Transition::Claim,
                StateChange {
                    results: ResultsChange::InitPending,
                    ..Default::default()
                },
                now,
            )
            .await?;
        self.announce(post_id, applied.from, applied.post.state);
        Ok(applied.post)
    }

    /// Take exclusive dispatch rights on a `partially_failed` post, turning its
    /// failed platforms back into pending ones
    pub async fn claim_redispatch(&self, post_id: &str, now: i64) -> Result<Post> {
        let applied = self
            .db
            .transition(
                post_id,
                Transition::Redispatch,
                StateChange {
                    results: ResultsChange::ResetFailures,
                    reason: Some("operator re-dispatch".to_string()),
                    ..Default::default()
                },
                now,
            )
            .await?;
        self.announce(post_id, applied.from, applied.post.state);
        Ok(applied.post)
    }

    /// Claim and dispatch a due post
    pub async fn dispatch(&self, post_id: &str, now: i64) -> Result<DispatchReport> {
        let post = self.claim(post_id, now).await?;
        self.run(post).await
    }

    /// Claim and dispatch the failed platforms of a `partially_failed` post
    pub async fn redispatch(&self, post_id: &str, now: i64) -> Result<DispatchReport> {
        let post = self.claim_redispatch(post_id, now).await?;
        self.run(post).await
    }

    /// Publish every pending platform of a claimed post, then finish it
    pub async fn run(&self, post: Post) -> Result<DispatchReport> {
        if post.state != PostState::Dispatching {
            return Err(PostflowError::Validation(format!(
                "Post {} must be dispatching to run, it is {}",
                post.id, post.state
            )));
        }

        // One settings snapshot for the whole round
        let settings = self.settings.snapshot();

        let pending: Vec<(String, u32)> = post
            .platform_results
            .iter()
            .filter(|(_, r)| r.status == PlatformStatus::Pending)
            .map(|(p, r)| (p.clone(), r.attempt_count))
            .collect();

        info!(
            post_id = %post.id,
            platforms = ?pending.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            "Dispatching post"
        );

        let handles: Vec<_> = pending
            .iter()
            .map(|(platform, previous_attempts)| {
                let job = PublishJob {
                    post_id: post.id.clone(),
                    platform: platform.clone(),
                    publisher: self.registry.get(platform),
                    content: post.content.clone(),
                    image_url: post.image_url.clone(),
                    credentials: settings.credentials_for(platform),
                    previous_attempts: *previous_attempts,
                    policy: self.policy.clone(),
                    db: self.db.clone(),
                    events: self.events.clone(),
                };
                tokio::spawn(publish_and_record(job))
            })
            .collect();

        let outcomes = join_all(handles).await;

        // A panicked task never stored its outcome
        for ((platform, previous_attempts), outcome) in pending.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(post_id = %post.id, platform = %platform, "Publisher task failed: {}", e);
                let result = PlatformResult::failure(
                    format!("{}: publisher crashed: {}", platform, e),
                    false,
                    previous_attempts + 1,
                );
                record_outcome(&self.db, &post.id, &platform, &result).await;
            }
        }

        self.finalize(&post.id, chrono::Utc::now().timestamp()).await
    }

    /// Finish a `dispatching` post with the aggregate of its recorded results
    pub async fn finalize(&self, post_id: &str, now: i64) -> Result<DispatchReport> {
        let post = self.db.require_post(post_id).await?;
        if post.state != PostState::Dispatching {
            return Ok(DispatchReport::from_post(&post));
        }

        let outcome = if post.platform_results.is_empty() {
            DispatchOutcome::Failed
        } else {
            DispatchOutcome::aggregate(post.platform_results.values().map(|r| &r.status))
                .ok_or_else(|| {
                    PostflowError::Validation(format!(
                        "Post {} still has platforms in flight",
                        post_id
                    ))
                })?
        };

        let report = DispatchReport::from_post(&post);
        let reason = format!(
            "succeeded: [{}] failed: [{}]",
            report.succeeded.join(", "),
            report.failed.join(", ")
        );

        let applied = self
            .db
            .transition(
                post_id,
                Transition::Finish(outcome),
                StateChange::reason(reason),
                now,
            )
            .await?;

        if applied.changed {
            self.announce(post_id, applied.from, applied.post.state);
        }

        let report = DispatchReport::from_post(&applied.post);
        info!(
            post_id,
            state = %report.state,
            succeeded = ?report.succeeded,
            failed = ?report.failed,
            "Dispatch finished"
        );
        self.events.emit(Event::DispatchCompleted {
            post_id: post_id.to_string(),
            state: report.state,
            succeeded: report.succeeded.clone(),
            failed: report.failed.clone(),
        });

        Ok(report)
    }

    /// Close out a dispatch that was interrupted: every platform still
    /// pending becomes a retryable failure, then the post is finished.
    pub async fn recover(&self, post: &Post, now: i64) -> Result<DispatchReport> {
        for (platform, result) in &post.platform_results {
            if result.status != PlatformStatus::Pending {
                continue;
            }
            warn!(post_id = %post.id, platform = %platform, "Marking interrupted platform as failed");
            self.db
                .record_platform_outcome(
                    &post.id,
                    platform,
                    &PlatformResult::failure(
                        "dispatch interrupted".to_string(),
                        true,
                        result.attempt_count,
                    ),
                    now,
                )
                .await?;
        }

        self.finalize(&post.id, now).await
    }
}

/// Publish to one platform and store the outcome right away
async fn publish_and_record(job: PublishJob) -> PlatformResult {
    let result = publish_with_retry(&job).await;
    record_outcome(&job.db, &job.post_id, &job.platform, &result).await;
    result
}

/// Store one platform outcome. A failed write is logged and does not stop
/// the other platforms from being recorded.
async fn record_outcome(db: &Database, post_id: &str, platform: &str, result: &PlatformResult) {
    let now = chrono::Utc::now().timestamp();
    match db.record_platform_outcome(post_id, platform, result, now).await {
        Ok(true) => {}
        Ok(false) if result.status == PlatformStatus::Success => {
            error!(
                post_id,
                platform,
                platform_post_id = ?result.platform_post_id,
                "Published, but the post was already finalised; the success is not recorded"
            );
        }
        Ok(false) => {
            warn!(post_id, platform, "Outcome not recorded, post is no longer dispatching");
        }
        Err(e) => {
            error!(post_id, platform, "Could not record outcome: {}", e);
        }
    }
}

/// Publish to one platform, retrying retryable failures within the budget
async fn publish_with_retry(job: &PublishJob) -> PlatformResult {
    let Some(publisher) = job.publisher.as_ref() else {
        return PlatformResult::failure(
            format!("{}: no publisher registered for this platform", job.platform),
            false,
            job.previous_attempts,
        );
    };

    if let Err(e) = publisher.validate_content(&job.content, job.image_url.as_deref()) {
        return PlatformResult::failure(e.to_string(), false, job.previous_attempts);
    }

    let mut total_attempts = job.previous_attempts;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let started = chrono::Utc::now().timestamp();
        total_attempts = match job
            .db
            .record_attempt(&job.post_id, &job.platform, started)
            .await
        {
            Ok(Some(count)) => count,
            Ok(None) => total_attempts + 1,
            Err(e) => {
                warn!(post_id = %job.post_id, platform = %job.platform, "Could not record attempt: {}", e);
                total_attempts + 1
            }
        };

        let outcome = match timeout(
            job.policy.publish_timeout,
            publisher.publish(&job.content, job.image_url.as_deref(), &job.credentials),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => PublishResult::from_error(PlatformError::Timeout(format!(
                "{}: no response after {:?}",
                job.platform, job.policy.publish_timeout
            ))),
        };

        job.events.emit(Event::PlatformAttempt {
            post_id: job.post_id.clone(),
            platform: job.platform.clone(),
            attempt,
            success: outcome.is_success(),
            retryable: outcome.is_retryable(),
            error: match &outcome {
                PublishResult::Failure { reason, .. } => Some(reason.clone()),
                PublishResult::Success { .. } => None,
            },
        });

        match outcome {
            PublishResult::Success { platform_post_id } => {
                info!(post_id = %job.post_id, platform = %job.platform, attempt, "Published");
                return PlatformResult::success(
                    platform_post_id,
                    chrono::Utc::now().timestamp(),
                    total_attempts,
                );
            }
            PublishResult::Failure {
                reason,
                retryable: true,
            } if attempt < job.policy.max_attempts => {
                let delay = job.policy.backoff(attempt);
                warn!(
                    post_id = %job.post_id,
                    platform = %job.platform,
                    attempt,
                    max_attempts = job.policy.max_attempts,
                    "Transient failure: {}. Retrying in {:?}",
                    reason,
                    delay
                );
                sleep(delay).await;
            }
            PublishResult::Failure { reason, retryable } => {
                warn!(post_id = %job.post_id, platform = %job.platform, attempt, retryable, "Publish failed: {}", reason);
                return PlatformResult::failure(reason, retryable, total_attempts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(base_ms),
            backoff_max: Duration::from_millis(max_ms),
            publish_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = policy(1000, 60_000);

        let first = policy.backoff(1);
        let second = policy.backoff(2);
        let third = policy.backoff(3);

        assert!(first >= Duration::from_millis(1000) && first <= Duration::from_millis(1100));
        assert!(second >= Duration::from_millis(2000) && second <= Duration::from_millis(2200));
        assert!(third >= Duration::from_millis(4000) && third <= Duration::from_millis(4400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy(1000, 5000);
        for attempt in 1..40 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(&DispatchConfig {
            max_attempts: 0,
            backoff_base_ms: 10,
            backoff_max_ms: 100,
            publish_timeout: 0,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.publish_timeout, Duration::from_secs(1));
    }
}
