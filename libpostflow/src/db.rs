//! Database operations for Postflow
//!
//! The store is the only place post state is written. Every state change goes
//! through [`Database::transition`], which re-reads the post, asks
//! [`lifecycle::step`] what the request means and applies the answer with a
//! compare-and-set on the `state` column.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, PostflowError, Result};
use crate::lifecycle::{self, Step, Transition};
use crate::types::{PlatformResult, PlatformStatus, Post, PostState, TransitionRecord};

/// Upper bound on read/decide/compare-and-set rounds for one request
const MAX_CAS_ROUNDS: usize = 10;

/// What happens to the per-platform results when a transition is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultsChange {
    #[default]
    Keep,
    /// Create a pending row for every target platform that has none
    InitPending,
    /// Turn every failed row back into pending; successes are untouched
    ResetFailures,
}

/// Side data written atomically with a state change
#[derive(Debug, Clone, Default)]
pub struct StateChange {
    pub target_platforms: Option<BTreeSet<String>>,
    pub scheduled_at: Option<i64>,
    pub reason: Option<String>,
    pub results: ResultsChange,
}

impl StateChange {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Outcome of [`Database::transition`]
#[derive(Debug, Clone)]
pub struct Applied {
    /// The post as stored after the request
    pub post: Post,
    /// State observed when the request was decided
    pub from: PostState,
    /// False when the request was a duplicate that had already taken effect
    pub changed: bool,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        tracing::debug!("Opened database at {}", expanded_path);

        Ok(Self { pool })
    }

    /// Insert a new post. Platform results are never written here.
    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, content, image_url, topic, tone, target_platforms,
                               scheduled_at, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(&post.topic)
        .bind(&post.tone)
        .bind(encode_platforms(&post.target_platforms)?)
        .bind(post.scheduled_at)
        .bind(post.state.as_str())
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post with its platform results
    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, content, image_url, topic, tone, target_platforms,
                   scheduled_at, state, created_at, updated_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        match row {
            Some(row) => {
                let mut post = post_from_row(&row)?;
                post.platform_results = self.platform_results(&post.id).await?;
                Ok(Some(post))
            }
            None => Ok(None),
        }
    }

    /// Like [`Database::get_post`], but a missing post is an error
    pub async fn require_post(&self, post_id: &str) -> Result<Post> {
        self.get_post(post_id)
            .await?
            .ok_or_else(|| PostflowError::NotFound(post_id.to_string()))
    }

    async fn platform_results(&self, post_id: &str) -> Result<BTreeMap<String, PlatformResult>> {
        let rows = sqlx::query(
            r#"
            SELECT platform, status, error, retryable, platform_post_id, posted_at, attempt_count
            FROM platform_results WHERE post_id = ?
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut results = BTreeMap::new();
        for row in rows {
            let status: String = row.get("status");
            let status = PlatformStatus::from_str(&status).map_err(DbError::Corrupt)?;
            let attempt_count: i64 = row.get("attempt_count");

            results.insert(
                row.get::<String, _>("platform"),
                PlatformResult {
                    status,
                    error: row.get("error"),
                    retryable: row.get("retryable"),
                    platform_post_id: row.get("platform_post_id"),
                    posted_at: row.get("posted_at"),
                    attempt_count: attempt_count.max(0) as u32,
                },
            );
        }

        Ok(results)
    }

    async fn load_posts(&self, rows: Vec<SqliteRow>) -> Result<Vec<Post>> {
        let mut posts = Vec::with_capacity(rows.len());
        for row in rows {
            let mut post = post_from_row(&row)?;
            post.platform_results = self.platform_results(&post.id).await?;
            posts.push(post);
        }
        Ok(posts)
    }

    /// Newest posts first, optionally restricted to one state
    pub async fn list_posts(&self, state: Option<PostState>, limit: usize) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, image_url, topic, tone, target_platforms,
                   scheduled_at, state, created_at, updated_at
            FROM posts
            WHERE (?1 IS NULL OR state = ?1)
            ORDER BY created_at DESC, id
            LIMIT ?2
            "#,
        )
        .bind(state.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.load_posts(rows).await
    }

    /// Scheduled posts whose time has come, earliest first
    pub async fn due_posts(&self, now: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, image_url, topic, tone, target_platforms,
                   scheduled_at, state, created_at, updated_at
            FROM posts
            WHERE state = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC, id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.load_posts(rows).await
    }

    /// Posts left in `dispatching` with no progress since `before`
    pub async fn stale_dispatches(&self, before: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, image_url, topic, tone, target_platforms,
                   scheduled_at, state, created_at, updated_at
            FROM posts
            WHERE state = 'dispatching' AND updated_at <= ?
            ORDER BY updated_at ASC, id
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.load_posts(rows).await
    }

    pub async fn count_by_state(&self) -> Result<BTreeMap<PostState, i64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM posts GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let state: String = row.get("state");
            let state = PostState::from_str(&state).map_err(DbError::Corrupt)?;
            counts.insert(state, row.get::<i64, _>("n"));
        }
        Ok(counts)
    }

    /// Apply a lifecycle transition.
    ///
    /// Duplicates of a request that already took effect return
    /// `changed: false`. A lost race for a claim returns
    /// [`PostflowError::ClaimConflict`]; any other lost race is re-decided
    /// against the new state.
    pub async fn transition(
        &self,
        post_id: &str,
        transition: Transition,
        change: StateChange,
        now: i64,
    ) -> Result<Applied> {
        for _ in 0..MAX_CAS_ROUNDS {
            let post = self.require_post(post_id).await?;
            let from = post.state;

            let to = match lifecycle::step(post_id, from, transition)? {
                Step::AlreadyThere => {
                    tracing::debug!(post_id, %transition, state = %from, "Duplicate transition ignored");
                    return Ok(Applied {
                        post,
                        from,
                        changed: false,
                    });
                }
                Step::Advance(to) => to,
            };

            if self.apply_step(&post, from, to, &change, now).await? {
                tracing::info!(post_id, from = %from, to = %to, "Post transitioned");
                let post = self.require_post(post_id).await?;
                return Ok(Applied {
                    post,
                    from,
                    changed: true,
                });
            }

            if transition.is_claim() {
                let current = self.require_post(post_id).await?;
                return Err(PostflowError::ClaimConflict {
                    post_id: post_id.to_string(),
                    state: current.state,
                });
            }

            tracing::debug!(post_id, %transition, "State changed underneath, retrying");
        }

        Err(DbError::Contention(post_id.to_string()).into())
    }

    /// One compare-and-set round. Returns false when `from` no longer holds.
    async fn apply_step(
        &self,
        post: &Post,
        from: PostState,
        to: PostState,
        change: &StateChange,
        now: i64,
    ) -> Result<bool> {
        let scheduled_at = change.scheduled_at.or(post.scheduled_at);
        if (scheduled_at.is_some() && !to.allows_schedule_time())
            || (to == PostState::Scheduled && scheduled_at.is_none())
        {
            return Err(PostflowError::Validation(format!(
                "Post {} cannot be {} with scheduled time {:?}",
                post.id, to, scheduled_at
            )));
        }

        let targets = change
            .target_platforms
            .as_ref()
            .map(encode_platforms)
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let updated = sqlx::query(
            r#"
            UPDATE posts
            SET state = ?,
                target_platforms = COALESCE(?, target_platforms),
                scheduled_at = COALESCE(?, scheduled_at),
                updated_at = MAX(updated_at, ?)
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(to.as_str())
        .bind(targets)
        .bind(change.scheduled_at)
        .bind(now)
        .bind(&post.id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        match change.results {
            ResultsChange::Keep => {}
            ResultsChange::InitPending => {
                let platforms = change
                    .target_platforms
                    .as_ref()
                    .unwrap_or(&post.target_platforms);
                for platform in platforms {
                    sqlx::query(
                        r#"
                        INSERT INTO platform_results (post_id, platform, status, attempt_count)
                        VALUES (?, ?, 'pending', 0)
                        ON CONFLICT(post_id, platform) DO NOTHING
                        "#,
                    )
                    .bind(&post.id)
                    .bind(platform)
                    .execute(&mut *tx)
                    .await
                    .map_err(DbError::SqlxError)?;
                }
            }
            ResultsChange::ResetFailures => {
                sqlx::query(
                    r#"
                    UPDATE platform_results
                    SET status = 'pending', error = NULL, retryable = NULL
                    WHERE post_id = ? AND status = 'failure'
                    "#,
                )
                .bind(&post.id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO post_transitions (post_id, from_state, to_state, reason, at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&change.reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    /// Count one publish attempt against a pending platform and refresh the
    /// post's `updated_at`, so a dispatch still making attempts never looks
    /// stale.
    ///
    /// Returns the new total, or `None` when the platform is not pending.
    pub async fn record_attempt(
        &self,
        post_id: &str,
        platform: &str,
        now: i64,
    ) -> Result<Option<u32>> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let row = sqlx::query(
            r#"
            UPDATE platform_results
            SET attempt_count = attempt_count + 1
            WHERE post_id = ? AND platform = ? AND status = 'pending'
            RETURNING attempt_count
            "#,
        )
        .bind(post_id)
        .bind(platform)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if row.is_some() {
            sqlx::query("UPDATE posts SET updated_at = MAX(updated_at, ?) WHERE id = ?")
                .bind(now)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(row.map(|r| r.get::<i64, _>("attempt_count").max(0) as u32))
    }

    /// Store the final outcome of one platform for the current dispatch.
    ///
    /// Only applies while the post is `dispatching`, and never overwrites a
    /// success. Returns whether a row was written.
    pub async fn record_platform_outcome(
        &self,
        post_id: &str,
        platform: &str,
        result: &PlatformResult,
        now: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let updated = sqlx::query(
            r#"
            UPDATE platform_results
            SET status = ?, error = ?, retryable = ?, platform_post_id = ?, posted_at = ?
            WHERE post_id = ? AND platform = ? AND status != 'success'
              AND EXISTS (SELECT 1 FROM posts WHERE id = ? AND state = 'dispatching')
            "#,
        )
        .bind(result.status.as_str())
        .bind(&result.error)
        .bind(result.retryable)
        .bind(&result.platform_post_id)
        .bind(result.posted_at)
        .bind(post_id)
        .bind(platform)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let written = updated.rows_affected() > 0;
        if written {
            sqlx::query("UPDATE posts SET updated_at = MAX(updated_at, ?) WHERE id = ?")
                .bind(now)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(written)
    }

    /// Audit trail of a post, oldest first
    pub async fn transitions(&self, post_id: &str) -> Result<Vec<TransitionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT from_state, to_state, reason, at
            FROM post_transitions WHERE post_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|row| {
                let from: String = row.get("from_state");
                let to: String = row.get("to_state");
                Ok(TransitionRecord {
                    from: PostState::from_str(&from).map_err(DbError::Corrupt)?,
                    to: PostState::from_str(&to).map_err(DbError::Corrupt)?,
                    reason: row.get("reason"),
                    at: row.get("at"),
                })
            })
            .collect()
    }
}

fn encode_platforms(platforms: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(platforms)
        .map_err(|e| DbError::Corrupt(format!("target platforms: {}", e)).into())
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let state: String = row.get("state");
    let state = PostState::from_str(&state).map_err(DbError::Corrupt)?;

    let targets: String = row.get("target_platforms");
    let target_platforms: BTreeSet<String> = serde_json::from_str(&targets)
        .map_err(|e| DbError::Corrupt(format!("target platforms: {}", e)))?;

    Ok(Post {
        id: row.get("id"),
        content: row.get("content"),
        image_url: row.get("image_url"),
        target_platforms,
        scheduled_at: row.get("scheduled_at"),
        state,
        platform_results: BTreeMap::new(),
        topic: row.get("topic"),
        tone: row.get("tone"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
