//! Integration tests for postflow-queue

use assert_cmd::Command;
use libpostflow::service::drafts::NewDraft;
use libpostflow::service::PostflowService;
use libpostflow::{Config, PostState, SettingsStore};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

struct TestEnv {
    _temp_dir: TempDir,
    config_path: String,
    service: PostflowService,
}

/// Config file, database and a service sharing that database
async fn setup_test_env() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("posts.db");

    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n",
            db_path.to_string_lossy().replace('\\', "/")
        ),
    )
    .unwrap();

    let mut config = Config::default();
    config.database.path = db_path.to_string_lossy().to_string();
    let service = PostflowService::from_config(config, SettingsStore::default())
        .await
        .unwrap();

    TestEnv {
        _temp_dir: temp_dir,
        config_path: config_path.to_string_lossy().to_string(),
        service,
    }
}

impl TestEnv {
    fn queue(&self) -> Command {
        let mut cmd = Command::cargo_bin("postflow-queue").unwrap();
        cmd.env("POSTFLOW_CONFIG", &self.config_path)
            .env_remove("POSTFLOW_DB_PATH")
            .env_remove("RUST_LOG");
        cmd
    }

    async fn draft(&self, content: &str) -> String {
        self.service
            .drafts()
            .create(NewDraft {
                content: content.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn pending(&self, content: &str) -> String {
        let id = self.draft(content).await;
        self.service
            .drafts()
            .submit(&id, chrono::Utc::now().timestamp())
            .await
            .unwrap();
        id
    }

    async fn state_of(&self, id: &str) -> PostState {
        self.service.get_post(id).await.unwrap().state
    }
}

#[tokio::test]
async fn test_list_empty_queue() {
    let env = setup_test_env().await;

    env.queue()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[tokio::test]
async fn test_list_filters_by_state() {
    let env = setup_test_env().await;
    let draft = env.draft("Solo borrador").await;
    let pending = env.pending("Esperando revisión").await;

    env.queue()
        .args(["list", "--state", "pending_review"])
        .assert()
        .success()
        .stdout(predicate::str::contains(pending.as_str()))
        .stdout(predicate::str::contains(draft.as_str()).not());
}

#[tokio::test]
async fn test_list_json() {
    let env = setup_test_env().await;
    env.draft("uno").await;
    env.draft("dos").await;

    let output = env
        .queue()
        .args(["list", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let posts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p["state"] == "draft"));
}

#[tokio::test]
async fn test_list_rejects_bad_input() {
    let env = setup_test_env().await;

    env.queue()
        .args(["list", "--format", "xml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));

    env.queue()
        .args(["list", "--state", "archived"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid post state"));
}

#[tokio::test]
async fn test_submit_draft() {
    let env = setup_test_env().await;
    let id = env.draft("Para revisar").await;

    env.queue()
        .args(["submit", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{} pending_review", id)));

    assert_eq!(env.state_of(&id).await, PostState::PendingReview);
}

#[tokio::test]
async fn test_approve_and_schedule() {
    let env = setup_test_env().await;
    let id = env.pending("Promoción de verano").await;

    env.queue()
        .args(["approve", &id, "--platforms", "Facebook", "--at", "+2h"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{} scheduled", id)));

    let post = env.service.get_post(&id).await.unwrap();
    assert_eq!(post.state, PostState::Scheduled);
    assert!(post.target_platforms.contains("facebook"));
    let delta = post.scheduled_at.unwrap() - chrono::Utc::now().timestamp();
    assert!((7100..=7200).contains(&delta));
}

#[tokio::test]
async fn test_approve_in_the_past_fails() {
    let env = setup_test_env().await;
    let id = env.pending("Tarde").await;

    env.queue()
        .args([
            "approve",
            &id,
            "--platforms",
            "facebook",
            "--at",
            "2001-01-01T00:00:00Z",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not in the future"));

    assert_eq!(env.state_of(&id).await, PostState::PendingReview);
}

#[tokio::test]
async fn test_reject_with_reason_shows_in_history() {
    let env = setup_test_env().await;
    let id = env.pending("Fuera de tono").await;

    env.queue()
        .args(["reject", &id, "--reason", "off brand"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rejected"));

    env.queue()
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending_review -> rejected (off brand)"));
}

#[tokio::test]
async fn test_schedule_requires_approval() {
    let env = setup_test_env().await;
    let id = env.draft("Sin aprobar").await;

    env.queue()
        .args(["schedule", &id, "+1h"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid transition"));

    assert_eq!(env.state_of(&id).await, PostState::Draft);
}

#[tokio::test]
async fn test_reschedule_approved_post() {
    let env = setup_test_env().await;
    let id = env.pending("Mover").await;

    env.queue()
        .args(["approve", &id, "--platforms", "facebook"])
        .assert()
        .success()
        .stdout(predicate::str::contains("approved"));

    env.queue()
        .args(["schedule", &id, "+1h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scheduled"));

    assert_eq!(env.state_of(&id).await, PostState::Scheduled);
}

#[tokio::test]
async fn test_redispatch_requires_partial_failure() {
    let env = setup_test_env().await;
    let id = env.draft("Nada que reintentar").await;

    env.queue()
        .args(["redispatch", &id])
        .assert()
        .code(3);
}

#[tokio::test]
async fn test_show_unknown_post() {
    let env = setup_test_env().await;

    env.queue()
        .args(["show", "missing-id"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Post not found"));
}

#[tokio::test]
async fn test_stats_json() {
    let env = setup_test_env().await;
    env.draft("a").await;
    env.draft("b").await;
    env.pending("c").await;

    let output = env
        .queue()
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["draft"], 2);
    assert_eq!(stats["pending_review"], 1);
    assert_eq!(stats["posted"], 0);
}
