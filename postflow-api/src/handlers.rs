//! Request handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{TimeZone, Utc};
use libpostflow::generator::GenerationRequest;
use libpostflow::review::{ApproveRequest, ScheduleRequest};
use libpostflow::scheduling::parse_schedule;
use libpostflow::service::drafts::NewDraft;
use libpostflow::settings::{RedactedSettings, SettingsUpdate};
use libpostflow::types::TransitionRecord;
use libpostflow::{Post, PostState, PostflowError};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{ApiError, ApiResult, Envelope};
use crate::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// A schedule time given either as unix seconds or as text
/// (RFC 3339, `2h`, `tomorrow 10am`)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScheduleTime {
    Unix(i64),
    Text(String),
}

impl ScheduleTime {
    fn resolve(&self, now: i64) -> Result<i64, PostflowError> {
        match self {
            ScheduleTime::Unix(at) => Ok(*at),
            ScheduleTime::Text(text) => {
                let now = Utc.timestamp_opt(now, 0).single().ok_or_else(|| {
                    PostflowError::Validation(format!("Invalid current time: {}", now))
                })?;
                Ok(parse_schedule(text, now)?.timestamp())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostBody {
    #[serde(default)]
    pub content: String,
    pub image_url: Option<String>,
    pub topic: Option<String>,
    pub tone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub tone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    #[serde(default)]
    pub platforms: Vec<String>,
    pub scheduled_time: Option<ScheduleTime>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBody {
    pub scheduled_time: ScheduleTime,
    pub platforms: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub limit: Option<usize>,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn create_post(
    State(state): State<AppState>,
    payload: Result<Json<CreatePostBody>, JsonRejection>,
) -> ApiResult<Post> {
    let Json(body) = payload?;
    let post = state
        .service
        .drafts()
        .create(NewDraft {
            content: body.content,
            image_url: body.image_url,
            topic: body.topic,
            tone: body.tone,
        })
        .await?;
    Ok(Envelope::ok(post))
}

pub async fn generate_post(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> ApiResult<Post> {
    let Json(body) = payload?;
    let post = state
        .service
        .drafts()
        .generate(GenerationRequest {
            topic: body.topic,
            tone: body.tone,
        })
        .await?;
    Ok(Envelope::ok(post))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Post>> {
    let filter = query
        .state
        .as_deref()
        .map(str::parse::<PostState>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let posts = state.service.list_posts(filter, limit).await?;
    Ok(Envelope::ok(posts))
}

pub async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Post> {
    Ok(Envelope::ok(state.service.get_post(&id).await?))
}

pub async fn post_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<TransitionRecord>> {
    Ok(Envelope::ok(state.service.history(&id).await?))
}

pub async fn submit(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Post> {
    Ok(Envelope::ok(state.service.drafts().submit(&id, now()).await?))
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ApproveBody>, JsonRejection>,
) -> ApiResult<Post> {
    let Json(body) = payload?;
    let now = now();
    let scheduled_at = body
        .scheduled_time
        .map(|t| t.resolve(now))
        .transpose()?;

    let post = state
        .service
        .review()
        .approve(
            &id,
            ApproveRequest {
                target_platforms: body.platforms,
                scheduled_at,
            },
            now,
        )
        .await?;
    Ok(Envelope::ok(post))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<RejectBody>>,
) -> ApiResult<Post> {
    let body = payload.map(|Json(b)| b).unwrap_or_default();
    let post = state.service.review().reject(&id, body.reason, now()).await?;
    Ok(Envelope::ok(post))
}

pub async fn schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ScheduleBody>, JsonRejection>,
) -> ApiResult<Post> {
    let Json(body) = payload?;
    let now = now();
    let post = state
        .service
        .review()
        .schedule(
            &id,
            ScheduleRequest {
                scheduled_at: body.scheduled_time.resolve(now)?,
                target_platforms: body.platforms,
            },
            now,
        )
        .await?;
    Ok(Envelope::ok(post))
}

/// Claim a partially failed post and publish its failed platforms. With a
/// scheduler running the publishing happens there; otherwise within the
/// request. Answers with the claimed post.
pub async fn redispatch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Post> {
    let dispatcher = state.service.dispatcher();
    let claimed = dispatcher.claim_redispatch(&id, now()).await?;
    let post = claimed.clone();

    let unhandled = match &state.dispatches {
        Some(handoff) => handoff.submit(claimed).err(),
        None => Some(claimed),
    };

    if let Some(claimed) = unhandled {
        match dispatcher.run(claimed).await {
            Ok(report) => info!(post_id = %report.post_id, state = %report.state, "Re-dispatch finished"),
            Err(e) => error!(post_id = %id, "Re-dispatch failed: {}", e),
        }
    }

    Ok(Envelope::ok(post))
}

pub async fn get_settings(State(state): State<AppState>) -> ApiResult<RedactedSettings> {
    Ok(Envelope::ok(state.service.settings().snapshot().redacted()))
}

pub async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<RedactedSettings> {
    let Json(update) = payload?;
    let settings = state.service.settings().apply(update)?;
    info!("Settings updated");
    Ok(Envelope::ok(settings.redacted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_time_accepts_unix_and_text() {
        let now = 1_700_000_000;

        let unix: ScheduleTime = serde_json::from_value(serde_json::json!(1_700_000_600)).unwrap();
        assert_eq!(unix.resolve(now).unwrap(), 1_700_000_600);

        let text: ScheduleTime = serde_json::from_value(serde_json::json!("2h")).unwrap();
        assert_eq!(text.resolve(now).unwrap(), now + 7200);

        let rfc: ScheduleTime =
            serde_json::from_value(serde_json::json!("2023-11-14T22:23:20Z")).unwrap();
        assert_eq!(rfc.resolve(now).unwrap(), 1_700_000_600);
    }

    #[test]
    fn test_schedule_time_rejects_gibberish() {
        let text = ScheduleTime::Text("whenever works".to_string());
        assert!(matches!(
            text.resolve(1_700_000_000),
            Err(PostflowError::Validation(_))
        ));
    }
}
