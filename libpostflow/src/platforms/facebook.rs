//! Facebook Page publisher

use std::time::Duration;

use async_trait::async_trait;

use crate::config::FacebookConfig;
use crate::error::PlatformError;
use crate::platforms::graph::GraphClient;
use crate::platforms::{Platform, PublishResult};
use crate::settings::Credentials;

/// Maximum length of a Page post
pub const FACEBOOK_CHARACTER_LIMIT: usize = 63_206;

pub struct FacebookPlatform {
    config: Option<FacebookConfig>,
    client: Option<GraphClient>,
}

impl FacebookPlatform {
    pub fn new(config: Option<FacebookConfig>, timeout: Duration) -> Self {
        let client = config
            .as_ref()
            .map(|c| GraphClient::new("facebook", &c.graph_url, timeout));
        Self { config, client }
    }
}

#[async_trait]
impl Platform for FacebookPlatform {
    fn name(&self) -> &str {
        "facebook"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(FACEBOOK_CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        content: &str,
        image_url: Option<&str>,
        credentials: &Credentials,
    ) -> PublishResult {
        let (Some(config), Some(client)) = (&self.config, &self.client) else {
            return PublishResult::from_error(PlatformError::NotConfigured(
                "facebook: no [facebook] page_id configured".to_string(),
            ));
        };

        let result = match image_url {
            Some(url) => {
                client
                    .post_form(
                        &format!("{}/photos", config.page_id),
                        &[("url", url), ("caption", content)],
                        credentials,
                    )
                    .await
            }
            None => {
                client
                    .post_form(
                        &format!("{}/feed", config.page_id),
                        &[("message", content)],
                        credentials,
                    )
                    .await
            }
        };

        result.into()
    }
}
