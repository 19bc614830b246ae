//! Mock platform for testing
//!
//! Outcomes can be scripted per call, so tests can express "fails twice with
//! a retryable error, then succeeds" and then assert on call counts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::platforms::{Platform, PublishResult};
use crate::settings::Credentials;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,

    /// Returned once the script is exhausted
    pub default_result: PublishResult,

    /// Results returned in order, one per publish call
    pub script: Arc<Mutex<VecDeque<PublishResult>>>,

    /// Simulated network latency
    pub delay: Duration,

    pub character_limit: Option<usize>,

    pub requires_image: bool,

    /// Panic inside `publish`
    pub panics: bool,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Content of every publish call, in order
    pub published_content: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            default_result: PublishResult::Success {
                platform_post_id: None,
            },
            script: Arc::new(Mutex::new(VecDeque::new())),
            delay: Duration::ZERO,
            character_limit: None,
            requires_image: false,
            panics: false,
            publish_call_count: Arc::new(Mutex::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock platform for testing
#[derive(Debug, Clone)]
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Always fails with the given classification
    pub fn failure(name: &str, reason: &str, retryable: bool) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            default_result: PublishResult::failure(reason, retryable),
            ..Default::default()
        })
    }

    /// Returns `results` in order, then succeeds
    pub fn scripted(name: &str, results: Vec<PublishResult>) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            script: Arc::new(Mutex::new(results.into())),
            ..Default::default()
        })
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    pub fn with_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            character_limit: Some(limit),
            ..Default::default()
        })
    }

    /// Panics on every publish call
    pub fn panicking(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            panics: true,
            ..Default::default()
        })
    }

    pub fn requiring_image(mut self) -> Self {
        self.config.requires_image = true;
        self
    }

    /// Queue more scripted results
    pub fn push_results(&self, results: impl IntoIterator<Item = PublishResult>) {
        lock(&self.config.script).extend(results);
    }

    pub fn publish_call_count(&self) -> usize {
        *lock(&self.config.publish_call_count)
    }

    pub fn published_content(&self) -> Vec<String> {
        lock(&self.config.published_content).clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    fn requires_image(&self) -> bool {
        self.config.requires_image
    }

    async fn publish(
        &self,
        content: &str,
        _image_url: Option<&str>,
        _credentials: &Credentials,
    ) -> PublishResult {
        *lock(&self.config.publish_call_count) += 1;
        lock(&self.config.published_content).push(content.to_string());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if self.config.panics {
            panic!("mock platform {} panicked", self.config.name);
        }

        let scripted = lock(&self.config.script).pop_front();
        scripted.unwrap_or_else(|| self.config.default_result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_success() {
        let platform = MockPlatform::success("test");
        let result = platform.publish("hola", None, &Credentials::missing()).await;

        assert!(result.is_success());
        assert_eq!(platform.publish_call_count(), 1);
        assert_eq!(platform.published_content(), vec!["hola"]);
    }

    #[tokio::test]
    async fn test_mock_script_then_default() {
        let platform = MockPlatform::scripted(
            "test",
            vec![
                PublishResult::failure("timeout", true),
                PublishResult::failure("timeout", true),
            ],
        );
        let creds = Credentials::missing();

        assert!(platform.publish("x", None, &creds).await.is_retryable());
        assert!(platform.publish("x", None, &creds).await.is_retryable());
        assert!(platform.publish("x", None, &creds).await.is_success());
        assert_eq!(platform.publish_call_count(), 3);
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let platform = MockPlatform::failure("test", "denied", false);
        let clone = platform.clone();

        clone.publish("x", None, &Credentials::missing()).await;
        assert_eq!(platform.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_delay() {
        let platform = MockPlatform::with_delay("slow", Duration::from_millis(20));
        let start = std::time::Instant::now();
        platform.publish("x", None, &Credentials::missing()).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
