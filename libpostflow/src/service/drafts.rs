//! Draft creation, generation and submission for review

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::{Database, StateChange};
use crate::error::{PostflowError, Result};
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::lifecycle::Transition;
use crate::service::events::{Event, EventBus};
use crate::settings::SettingsStore;
use crate::types::Post;

/// Operator-written draft
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDraft {
    pub content: String,
    pub image_url: Option<String>,
    pub topic: Option<String>,
    pub tone: Option<String>,
}

#[derive(Clone)]
pub struct DraftService {
    db: Database,
    generator: Arc<dyn ContentGenerator>,
    settings: SettingsStore,
    events: EventBus,
}

impl DraftService {
    pub fn new(
        db: Database,
        generator: Arc<dyn ContentGenerator>,
        settings: SettingsStore,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            generator,
            settings,
            events,
        }
    }

    /// Store a new post in `draft`
    pub async fn create(&self, draft: NewDraft) -> Result<Post> {
        if draft.content.trim().is_empty() {
            return Err(PostflowError::Validation(
                "Post content cannot be empty".to_string(),
            ));
        }
        let image_url = draft.image_url.filter(|u| !u.trim().is_empty());

        let mut post = Post::new(draft.content).with_image(image_url);
        post.topic = draft.topic;
        post.tone = draft.tone;

        self.db.create_post(&post).await?;
        tracing::info!(post_id = %post.id, "Draft created");
        Ok(post)
    }

    /// Ask the generator for content and store it as a draft.
    ///
    /// A generation failure stores nothing.
    pub async fn generate(&self, request: GenerationRequest) -> Result<Post> {
        if request.topic.trim().is_empty() {
            return Err(PostflowError::Validation("Topic is required".to_string()));
        }

        let settings = self.settings.snapshot();
        let generated = self
            .generator
            .generate(&request, &settings.generator)
            .await
            .map_err(|e| {
                tracing::warn!(topic = %request.topic, "Generation failed: {}", e);
                PostflowError::Generation(e)
            })?;

        self.create(NewDraft {
            content: generated.text,
            image_url: generated.image_url,
            topic: Some(request.topic),
            tone: Some(request.tone).filter(|t| !t.trim().is_empty()),
        })
        .await
    }

    /// Move a draft to `pending_review`
    pub async fn submit(&self, post_id: &str, now: i64) -> Result<Post> {
        let applied = self
            .db
            .transition(post_id, Transition::Submit, StateChange::default(), now)
            .await?;

        if applied.changed {
            self.events.emit(Event::StateChanged {
                post_id: post_id.to_string(),
                from: applied.from,
                to: applied.post.state,
            });
        }
        Ok(applied.post)
    }
}
