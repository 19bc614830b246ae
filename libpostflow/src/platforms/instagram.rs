//! Instagram business account publisher
//!
//! Publishing is two calls: create a media container from the image URL, then
//! publish the container.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::InstagramConfig;
use crate::error::PlatformError;
use crate::platforms::graph::GraphClient;
use crate::platforms::{Platform, PublishResult};
use crate::settings::Credentials;

/// Maximum caption length
pub const INSTAGRAM_CHARACTER_LIMIT: usize = 2_200;

pub struct InstagramPlatform {
    config: Option<InstagramConfig>,
    client: Option<GraphClient>,
}

impl InstagramPlatform {
    pub fn new(config: Option<InstagramConfig>, timeout: Duration) -> Self {
        let client = config
            .as_ref()
            .map(|c| GraphClient::new("instagram", &c.graph_url, timeout));
        Self { config, client }
    }

    async fn publish_image(
        &self,
        config: &InstagramConfig,
        client: &GraphClient,
        caption: &str,
        image_url: &str,
        credentials: &Credentials,
    ) -> Result<String, PlatformError> {
        let container = client
            .post_form(
                &format!("{}/media", config.user_id),
                &[("image_url", image_url), ("caption", caption)],
                credentials,
            )
            .await?;

        tracing::debug!(container = %container, "Instagram media container created");

        client
            .post_form(
                &format!("{}/media_publish", config.user_id),
                &[("creation_id", container.as_str())],
                credentials,
            )
            .await
    }
}

#[async_trait]
impl Platform for InstagramPlatform {
    fn name(&self) -> &str {
        "instagram"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(INSTAGRAM_CHARACTER_LIMIT)
    }

    fn requires_image(&self) -> bool {
        true
    }

    async fn publish(
        &self,
        content: &str,
        image_url: Option<&str>,
        credentials: &Credentials,
    ) -> PublishResult {
        let (Some(config), Some(client)) = (&self.config, &self.client) else {
            return PublishResult::from_error(PlatformError::NotConfigured(
                "instagram: no [instagram] user_id configured".to_string(),
            ));
        };

        let Some(image_url) = image_url else {
            return PublishResult::from_error(PlatformError::Validation(
                "instagram: an image is required".to_string(),
            ));
        };

        self.publish_image(config, client, content, image_url, credentials)
            .await
            .into()
    }
}
