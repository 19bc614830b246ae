//! Review gate: operator decisions on posts awaiting review
//!
//! All input checks (platform set, schedule time, content rules) run before
//! any transition, so a rejected request never leaves a half-applied post.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::db::{Applied, Database, StateChange};
use crate::error::{PostflowError, Result};
use crate::lifecycle::Transition;
use crate::scheduling::ensure_future;
use crate::service::events::{Event, EventBus};
use crate::service::validation::ValidationService;
use crate::types::{Post, PostState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub target_platforms: Vec<String>,
    /// When set, the post is scheduled in the same call
    pub scheduled_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: i64,
    /// Replaces the platforms chosen at approval when set
    pub target_platforms: Option<Vec<String>>,
}

/// Trim, lowercase and de-duplicate platform names
pub fn normalize_platforms<S: AsRef<str>>(platforms: &[S]) -> BTreeSet<String> {
    platforms
        .iter()
        .map(|p| p.as_ref().trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn require_platforms(platforms: BTreeSet<String>) -> Result<BTreeSet<String>> {
    if platforms.is_empty() {
        return Err(PostflowError::Validation(
            "At least one target platform is required".to_string(),
        ));
    }
    Ok(platforms)
}

#[derive(Clone)]
pub struct ReviewGate {
    db: Database,
    validation: ValidationService,
    events: EventBus,
}

impl ReviewGate {
    pub fn new(db: Database, validation: ValidationService, events: EventBus) -> Self {
        Self {
            db,
            validation,
            events,
        }
    }

    fn announce(&self, applied: &Applied) {
        if applied.changed {
            self.events.emit(Event::StateChanged {
                post_id: applied.post.id.clone(),
                from: applied.from,
                to: applied.post.state,
            });
        }
    }

    /// Approve a post in `pending_review` for the given platforms, and
    /// schedule it when `scheduled_at` is supplied.
    pub async fn approve(&self, post_id: &str, request: ApproveRequest, now: i64) -> Result<Post> {
        let platforms = require_platforms(normalize_platforms(&request.target_platforms))?;
        if let Some(at) = request.scheduled_at {
            ensure_future(at, now)?;
        }

        let post = self.db.require_post(post_id).await?;
        if post.state == PostState::PendingReview {
            self.validation
                .check(&post.content, post.image_url.as_deref(), &platforms)?;
        }

        let applied = self
            .db
            .transition(
                post_id,
                Transition::Approve,
                StateChange {
                    target_platforms: Some(platforms.clone()),
                    ..Default::default()
                },
                now,
            )
            .await?;
        self.announce(&applied);

        match request.scheduled_at {
            Some(at) => {
                self.schedule(
                    post_id,
                    ScheduleRequest {
                        scheduled_at: at,
                        target_platforms: None,
                    },
                    now,
                )
                .await
            }
            None => Ok(applied.post),
        }
    }

    /// Reject a post in `pending_review`. The record is kept for audit and
    /// the reason lands in the transition log.
    pub async fn reject(&self, post_id: &str, reason: Option<String>, now: i64) -> Result<Post> {
        let change = StateChange {
            reason: reason.filter(|r| !r.trim().is_empty()),
            ..Default::default()
        };
        let applied = self
            .db
            .transition(post_id, Transition::Reject, change, now)
            .await?;
        self.announce(&applied);
        Ok(applied.post)
    }

    /// Give an approved post its publish time.
    ///
    /// Repeating the same request on a scheduled post is a no-op; asking for a
    /// different time or platform set is a conflict.
    pub async fn schedule(&self, post_id: &str, request: ScheduleRequest, now: i64) -> Result<Post> {
        ensure_future(request.scheduled_at, now)?;
        let requested = match &request.target_platforms {
            Some(list) => Some(require_platforms(normalize_platforms(list))?),
            None => None,
        };

        let post = self.db.require_post(post_id).await?;

        if post.state == PostState::Scheduled {
            let same_time = post.scheduled_at == Some(request.scheduled_at);
            let same_platforms = requested
                .as_ref()
                .map_or(true, |p| *p == post.target_platforms);
            if same_time && same_platforms {
                return Ok(post);
            }
            return Err(PostflowError::ConflictingTransition {
                post_id: post_id.to_string(),
                state: post.state,
                transition: Transition::Schedule,
            });
        }

        let platforms = requested.unwrap_or_else(|| post.target_platforms.clone());
        if post.state == PostState::Approved {
            let platforms = require_platforms(platforms.clone())?;
            if platforms != post.target_platforms {
                self.validation
                    .check(&post.content, post.image_url.as_deref(), &platforms)?;
            }
        }

        let applied = self
            .db
            .transition(
                post_id,
                Transition::Schedule,
                StateChange {
                    target_platforms: Some(platforms),
                    scheduled_at: Some(request.scheduled_at),
                    ..Default::default()
                },
                now,
            )
            .await?;
        self.announce(&applied);
        Ok(applied.post)
    }
}
