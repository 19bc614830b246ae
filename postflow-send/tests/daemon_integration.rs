//! Integration tests for postflow-send daemon

use assert_cmd::Command;
use libpostflow::review::ApproveRequest;
use libpostflow::service::drafts::NewDraft;
use libpostflow::service::PostflowService;
use libpostflow::{Config, PlatformStatus, PostState, SettingsStore};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Write a config pointing at a database inside the temp dir
fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("posts.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[scheduler]
poll_interval = 1

[dispatch]
max_attempts = 2
backoff_base_ms = 1
backoff_max_ms = 2
publish_timeout = 2
"#,
        db_path.display().to_string().replace('\\', "/")
    );
    fs::write(&config_path, config_content).unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

async fn open_service(db_path: &str) -> PostflowService {
    let mut config = Config::default();
    config.database.path = db_path.to_string();
    PostflowService::from_config(config, SettingsStore::default())
        .await
        .unwrap()
}

/// Create a post that was scheduled in the past and is due now
async fn create_due_post(db_path: &str) -> String {
    let service = open_service(db_path).await;
    let earlier = chrono::Utc::now().timestamp() - 120;

    let post = service
        .drafts()
        .create(NewDraft {
            content: "Publicación programada".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    service.drafts().submit(&post.id, earlier).await.unwrap();
    service
        .review()
        .approve(
            &post.id,
            ApproveRequest {
                target_platforms: vec!["facebook".to_string()],
                scheduled_at: Some(earlier + 60),
            },
            earlier,
        )
        .await
        .unwrap();
    post.id
}

fn daemon(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("postflow-send").unwrap();
    cmd.env("POSTFLOW_CONFIG", config_path)
        .env_remove("POSTFLOW_DB_PATH")
        .env_remove("FACEBOOK_ACCESS_TOKEN")
        .env_remove("INSTAGRAM_ACCESS_TOKEN")
        .env_remove("OPENAI_API_KEY")
        .env_remove("POSTFLOW_LOG_FORMAT")
        .env_remove("POSTFLOW_LOG_LEVEL")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help() {
    Command::cargo_bin("postflow-send")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--poll-interval"))
        .stdout(predicate::str::contains("--once"));
}

#[test]
fn test_once_flag_exits_immediately() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    daemon(&config_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("postflow-send daemon starting"))
        .stderr(predicate::str::contains("processed due posts once, exiting"));
}

#[test]
fn test_custom_poll_interval() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    daemon(&config_path)
        .arg("--once")
        .arg("--poll-interval")
        .arg("45")
        .assert()
        .success()
        .stderr(predicate::str::contains("Poll interval: 45s"));
}

#[test]
fn test_invalid_config_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let invalid_config = temp_dir.path().join("invalid.toml");
    fs::write(&invalid_config, "invalid toml content [[[").unwrap();

    daemon(invalid_config.to_str().unwrap())
        .arg("--once")
        .assert()
        .code(2);
}

#[test]
fn test_invalid_dispatch_settings_are_rejected() {
    let (temp_dir, _config_path, db_path) = setup_test_env();
    let config_path = temp_dir.path().join("zero.toml");
    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n\n[dispatch]\nmax_attempts = 0\n",
            db_path.replace('\\', "/")
        ),
    )
    .unwrap();

    daemon(config_path.to_str().unwrap())
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_attempts"));
}

#[tokio::test]
async fn test_dispatches_due_post() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    let post_id = create_due_post(&db_path).await;

    daemon(&config_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("Found 1 post(s) due for dispatch"));

    // Facebook has no page configured, so the publish fails permanently
    let service = open_service(&db_path).await;
    let post = service.get_post(&post_id).await.unwrap();
    assert_eq!(post.state, PostState::Failed);

    let result = &post.platform_results["facebook"];
    assert_eq!(result.status, PlatformStatus::Failure);
    assert_eq!(result.retryable, Some(false));
}

#[tokio::test]
async fn test_future_posts_are_left_alone() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    let service = open_service(&db_path).await;
    let now = chrono::Utc::now().timestamp();

    let post = service
        .drafts()
        .create(NewDraft {
            content: "Mañana".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    service.drafts().submit(&post.id, now).await.unwrap();
    service
        .review()
        .approve(
            &post.id,
            ApproveRequest {
                target_platforms: vec!["facebook".to_string()],
                scheduled_at: Some(now + 86_400),
            },
            now,
        )
        .await
        .unwrap();

    daemon(&config_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("due for dispatch").not());

    let post = service.get_post(&post.id).await.unwrap();
    assert_eq!(post.state, PostState::Scheduled);
}
