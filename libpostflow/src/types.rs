//! Core types for Postflow

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A content item travelling through review, scheduling and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,
    pub content: String,
    pub image_url: Option<String>,
    /// Platforms chosen at approval or scheduling time; empty before.
    pub target_platforms: BTreeSet<String>,
    pub scheduled_at: Option<i64>,
    pub state: PostState,
    /// Keys equal `target_platforms` once dispatch has started; empty before.
    pub platform_results: BTreeMap<String, PlatformResult>,
    pub topic: Option<String>,
    pub tone: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn new(content: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            image_url: None,
            target_platforms: BTreeSet::new(),
            scheduled_at: None,
            state: PostState::Draft,
            platform_results: BTreeMap::new(),
            topic: None,
            tone: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }

    /// Platforms whose last recorded dispatch outcome is a failure
    pub fn failed_platforms(&self) -> Vec<&str> {
        self.platform_results
            .iter()
            .filter(|(_, r)| r.status == PlatformStatus::Failure)
            .map(|(p, _)| p.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PostState {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Scheduled,
    Dispatching,
    Posted,
    PartiallyFailed,
    Failed,
}

impl PostState {
    pub const ALL: [PostState; 9] = [
        PostState::Draft,
        PostState::PendingReview,
        PostState::Approved,
        PostState::Rejected,
        PostState::Scheduled,
        PostState::Dispatching,
        PostState::Posted,
        PostState::PartiallyFailed,
        PostState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostState::Draft => "draft",
            PostState::PendingReview => "pending_review",
            PostState::Approved => "approved",
            PostState::Rejected => "rejected",
            PostState::Scheduled => "scheduled",
            PostState::Dispatching => "dispatching",
            PostState::Posted => "posted",
            PostState::PartiallyFailed => "partially_failed",
            PostState::Failed => "failed",
        }
    }

    /// States in which a post may carry a `scheduled_at`
    pub fn allows_schedule_time(&self) -> bool {
        matches!(
            self,
            PostState::Scheduled
                | PostState::Dispatching
                | PostState::Posted
                | PostState::PartiallyFailed
                | PostState::Failed
        )
    }
}

impl fmt::Display for PostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PostState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                format!(
                    "Invalid post state: '{}'. Valid options: {}",
                    s,
                    PostState::ALL
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Pending,
    Success,
    Failure,
}

impl PlatformStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformStatus::Pending => "pending",
            PlatformStatus::Success => "success",
            PlatformStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PlatformStatus::Pending),
            "success" => Ok(PlatformStatus::Success),
            "failure" => Ok(PlatformStatus::Failure),
            other => Err(format!("Invalid platform status: '{}'", other)),
        }
    }
}

/// Per-platform dispatch record attached to a post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformResult {
    pub status: PlatformStatus,
    pub error: Option<String>,
    /// Classification of the last failure, if any
    pub retryable: Option<bool>,
    pub platform_post_id: Option<String>,
    pub posted_at: Option<i64>,
    /// Publish attempts made for this platform across all dispatches
    pub attempt_count: u32,
}

impl PlatformResult {
    pub fn success(platform_post_id: Option<String>, posted_at: i64, attempt_count: u32) -> Self {
        Self {
            status: PlatformStatus::Success,
            error: None,
            retryable: None,
            platform_post_id,
            posted_at: Some(posted_at),
            attempt_count,
        }
    }

    pub fn failure(error: String, retryable: bool, attempt_count: u32) -> Self {
        Self {
            status: PlatformStatus::Failure,
            error: Some(error),
            retryable: Some(retryable),
            platform_post_id: None,
            posted_at: None,
            attempt_count,
        }
    }
}

/// One row of a post's audit trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: PostState,
    pub to: PostState,
    pub reason: Option<String>,
    pub at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_new_defaults() {
        let post = Post::new("Hola mundo".to_string());

        assert!(Uuid::parse_str(&post.id).is_ok());
        assert_eq!(post.state, PostState::Draft);
        assert!(post.target_platforms.is_empty());
        assert!(post.platform_results.is_empty());
        assert_eq!(post.scheduled_at, None);
        assert_eq!(post.created_at, post.updated_at);
    }

    #[test]
    fn test_post_new_unique_ids() {
        let a = Post::new("a".to_string());
        let b = Post::new("b".to_string());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_post_state_round_trips_through_str() {
        for state in PostState::ALL {
            assert_eq!(state.as_str().parse::<PostState>().unwrap(), state);
        }
        assert!("archived".parse::<PostState>().is_err());
    }

    #[test]
    fn test_post_state_serde_is_snake_case() {
        let json = serde_json::to_string(&PostState::PartiallyFailed).unwrap();
        assert_eq!(json, r#""partially_failed""#);
    }

    #[test]
    fn test_schedule_time_states() {
        assert!(PostState::Scheduled.allows_schedule_time());
        assert!(PostState::PartiallyFailed.allows_schedule_time());
        assert!(!PostState::Approved.allows_schedule_time());
        assert!(!PostState::Draft.allows_schedule_time());
    }

    #[test]
    fn test_failed_platforms() {
        let mut post = Post::new("x".to_string());
        post.platform_results
            .insert("facebook".into(), PlatformResult::success(None, 1, 1));
        post.platform_results
            .insert("instagram".into(), PlatformResult::failure("boom".into(), true, 3));

        assert_eq!(post.failed_platforms(), vec!["instagram"]);
    }
}
