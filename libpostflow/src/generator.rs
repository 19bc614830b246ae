//! Content generation adapter
//!
//! One text completion plus one image generation per request. The generator
//! never touches the store; callers persist the result as a draft.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::settings::Credentials;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub topic: String,
    pub tone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedContent {
    pub text: String,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credentials: &Credentials,
    ) -> Result<GeneratedContent, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: String,
    size: &'a str,
    quality: &'a str,
    style: &'a str,
    n: u8,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Text and image generation against the OpenAI HTTP API
pub struct OpenAiGenerator {
    client: Client,
    config: GeneratorConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn text_prompt(&self, request: &GenerationRequest) -> String {
        format!(
            "Write a social media post in {language} about {topic} with a {tone} tone. \
             The post must be engaging and relevant for a {language}-speaking audience. \
             Reply with the post text only.",
            language = self.config.language,
            topic = request.topic,
            tone = request.tone,
        )
    }

    fn image_prompt(&self, request: &GenerationRequest) -> String {
        format!(
            "A hyper-realistic, photographic image about {topic}, relevant for a \
             {language}-speaking audience. Professional, high quality, sharp details \
             and realistic textures. Leave empty space in the top right corner for a \
             corporate logo.",
            topic = request.topic,
            language = self.config.language,
        )
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        api_key: &str,
        body: &B,
    ) -> Result<R, GenerationError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api(format!("{} {}: {}", path, status, body)));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GenerationError::Parse(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credentials: &Credentials,
    ) -> Result<GeneratedContent, GenerationError> {
        let api_key = credentials.expose().ok_or_else(|| {
            GenerationError::NotConfigured("OpenAI API key is not set".to_string())
        })?;

        tracing::info!(topic = %request.topic, model = %self.config.model, "Generating post text");

        let chat: ChatResponse = self
            .post_json(
                "chat/completions",
                api_key,
                &ChatRequest {
                    model: &self.config.model,
                    messages: vec![ChatMessage {
                        role: "system".to_string(),
                        content: self.text_prompt(request),
                    }],
                },
            )
            .await?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GenerationError::Parse("no completion returned".to_string()))?;

        tracing::info!(model = %self.config.image_model, "Generating post image");

        let images: ImageResponse = self
            .post_json(
                "images/generations",
                api_key,
                &ImageRequest {
                    model: &self.config.image_model,
                    prompt: self.image_prompt(request),
                    size: &self.config.image_size,
                    quality: "hd",
                    style: "natural",
                    n: 1,
                },
            )
            .await?;

        let image_url = images.data.into_iter().next().and_then(|d| d.url);
        if image_url.is_none() {
            return Err(GenerationError::Parse("no image returned".to_string()));
        }

        Ok(GeneratedContent { text, image_url })
    }
}

/// Generator returning canned content, for tests and offline demos
#[derive(Clone, Default)]
pub struct MockGenerator {
    failure: Option<String>,
    calls: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        _credentials: &Credentials,
    ) -> Result<GeneratedContent, GenerationError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(message) = &self.failure {
            return Err(GenerationError::Api(message.clone()));
        }

        Ok(GeneratedContent {
            text: format!("Post about {} ({})", request.topic, request.tone),
            image_url: Some(format!(
                "https://images.example.com/{}.png",
                request.topic.replace(' ', "-")
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            topic: "café de Colombia".to_string(),
            tone: "inspirador".to_string(),
        }
    }

    #[test]
    fn test_prompts_use_configured_language() {
        let generator = OpenAiGenerator::new(GeneratorConfig::default());
        let text = generator.text_prompt(&request());
        assert!(text.contains("Spanish"));
        assert!(text.contains("café de Colombia"));
        assert!(text.contains("inspirador"));

        let image = generator.image_prompt(&request());
        assert!(image.contains("top right corner"));
    }

    #[tokio::test]
    async fn test_openai_requires_key() {
        let generator = OpenAiGenerator::new(GeneratorConfig::default());
        let err = generator
            .generate(&request(), &Credentials::missing())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_mock_generator_records_calls() {
        let generator = MockGenerator::new();
        let content = generator
            .generate(&request(), &Credentials::missing())
            .await
            .unwrap();

        assert!(content.text.contains("café de Colombia"));
        assert!(content.image_url.is_some());
        assert_eq!(generator.calls(), vec![request()]);
    }

    #[tokio::test]
    async fn test_mock_generator_failure() {
        let generator = MockGenerator::failing("quota exceeded");
        let err = generator
            .generate(&request(), &Credentials::missing())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
