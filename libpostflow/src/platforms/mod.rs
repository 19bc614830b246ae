//! Platform publishers
//!
//! Every target platform implements [`Platform`]. The dispatcher only ever
//! sees `Arc<dyn Platform>` from a [`PlatformRegistry`], so adding a platform
//! means adding an implementation and registering it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libpostflow::platforms::{mock::MockPlatform, PlatformRegistry};
//!
//! let mut registry = PlatformRegistry::new();
//! registry.register(Arc::new(MockPlatform::success("facebook")));
//! assert!(registry.get("facebook").is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::PlatformError;
use crate::settings::Credentials;

pub mod facebook;
pub mod graph;
pub mod instagram;

// Available outside tests so integration tests and demos can use it
pub mod mock;

/// Result of a single publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    Success {
        platform_post_id: Option<String>,
    },
    Failure {
        reason: String,
        /// Mandatory so the dispatcher can decide without platform knowledge
        retryable: bool,
    },
}

impl PublishResult {
    pub fn success(platform_post_id: impl Into<String>) -> Self {
        PublishResult::Success {
            platform_post_id: Some(platform_post_id.into()),
        }
    }

    pub fn failure(reason: impl Into<String>, retryable: bool) -> Self {
        PublishResult::Failure {
            reason: reason.into(),
            retryable,
        }
    }

    /// Classify a platform error using [`PlatformError::is_retryable`]
    pub fn from_error(error: PlatformError) -> Self {
        let retryable = error.is_retryable();
        PublishResult::Failure {
            reason: error.to_string(),
            retryable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PublishResult::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishResult::Failure {
                retryable: true,
                ..
            }
        )
    }
}

impl From<std::result::Result<String, PlatformError>> for PublishResult {
    fn from(result: std::result::Result<String, PlatformError>) -> Self {
        match result {
            Ok(id) => PublishResult::success(id),
            Err(e) => PublishResult::from_error(e),
        }
    }
}

/// A publisher for one social platform
#[async_trait]
pub trait Platform: Send + Sync {
    /// Lowercase identifier used in `target_platforms` (e.g. "facebook")
    fn name(&self) -> &str;

    /// Maximum characters per post, or `None` if unlimited
    fn character_limit(&self) -> Option<usize>;

    /// Whether a post must carry an image to be published here
    fn requires_image(&self) -> bool {
        false
    }

    /// Check content against the platform rules without any network call
    fn validate_content(
        &self,
        content: &str,
        image_url: Option<&str>,
    ) -> std::result::Result<(), PlatformError> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation(format!(
                "{}: post content is empty",
                self.name()
            )));
        }

        if let Some(limit) = self.character_limit() {
            let length = content.chars().count();
            if length > limit {
                return Err(PlatformError::Validation(format!(
                    "{}: content is {} characters, limit is {}",
                    self.name(),
                    length,
                    limit
                )));
            }
        }

        if self.requires_image() && image_url.is_none() {
            return Err(PlatformError::Validation(format!(
                "{}: an image is required",
                self.name()
            )));
        }

        Ok(())
    }

    /// Publish content. Must never panic on platform errors; classify them
    /// into a [`PublishResult::Failure`] instead.
    async fn publish(
        &self,
        content: &str,
        image_url: Option<&str>,
        credentials: &Credentials,
    ) -> PublishResult;
}

/// Publishers keyed by platform name
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    platforms: HashMap<String, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher, replacing any previous one with the same name
    pub fn register(&mut self, platform: Arc<dyn Platform>) {
        self.platforms
            .insert(platform.name().to_lowercase(), platform);
    }

    pub fn with(mut self, platform: Arc<dyn Platform>) -> Self {
        self.register(platform);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Platform>> {
        self.platforms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.platforms.contains_key(name)
    }

    /// Registered platform names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.platforms.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the Graph API publishers described by the configuration.
    ///
    /// A platform without a config section is registered unconfigured, so
    /// posts targeting it fail with a non-retryable error at dispatch time.
    pub fn from_config(config: &Config) -> Self {
        let timeout = std::time::Duration::from_secs(config.dispatch.publish_timeout);

        let mut registry = Self::new();
        registry.register(Arc::new(facebook::FacebookPlatform::new(
            config.facebook.clone(),
            timeout,
        )));
        registry.register(Arc::new(instagram::InstagramPlatform::new(
            config.instagram.clone(),
            timeout,
        )));
        registry
    }
}
