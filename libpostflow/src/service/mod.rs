//! Service layer for Postflow
//!
//! `PostflowService` wires the store, platforms, settings and event bus into
//! the components every interface needs:
//!
//! - `DraftService`: create, generate and submit drafts
//! - `ReviewGate`: approve, reject and schedule
//! - `Dispatcher`: claim and publish to platforms
//! - `Scheduler`: find due posts and dispatch them
//! - `ValidationService`: content checks against platform rules
//! - `EventBus`: progress events
//!
//! ```no_run
//! use libpostflow::service::PostflowService;
//! use libpostflow::review::ApproveRequest;
//!
//! # async fn example() -> libpostflow::Result<()> {
//! let service = PostflowService::new().await?;
//! let now = chrono::Utc::now().timestamp();
//!
//! let post = service.review().approve(
//!     "post-id",
//!     ApproveRequest {
//!         target_platforms: vec!["facebook".to_string()],
//!         scheduled_at: Some(now + 3600),
//!     },
//!     now,
//! ).await?;
//! println!("{} is {}", post.id, post.state);
//! # Ok(())
//! # }
//! ```

pub mod drafts;
pub mod events;
pub mod validation;

use std::collections::BTreeMap;
use std::sync::Arc;

use self::drafts::DraftService;
use self::events::{EventBus, EventReceiver};
use self::validation::ValidationService;
use crate::dispatcher::{Dispatcher, RetryPolicy};
use crate::generator::{ContentGenerator, OpenAiGenerator};
use crate::platforms::PlatformRegistry;
use crate::review::ReviewGate;
use crate::scheduler::Scheduler;
use crate::settings::SettingsStore;
use crate::types::{Post, PostState, TransitionRecord};
use crate::{Config, Database, Result};

#[derive(Clone)]
pub struct PostflowService {
    db: Database,
    config: Arc<Config>,
    settings: SettingsStore,
    registry: PlatformRegistry,
    drafts: DraftService,
    review: ReviewGate,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    validation: ValidationService,
    events: EventBus,
}

impl PostflowService {
    /// Load configuration (defaults when no file exists) and credentials
    /// from the environment
    pub async fn new() -> Result<Self> {
        let config = Config::load_or_default()?;
        Self::from_config(config, SettingsStore::from_env()).await
    }

    /// Open the configured database and build the Graph API publishers and
    /// the OpenAI generator
    pub async fn from_config(config: Config, settings: SettingsStore) -> Result<Self> {
        let db = Database::new(&config.database_path()).await?;
        let registry = PlatformRegistry::from_config(&config);
        let generator = Arc::new(OpenAiGenerator::new(config.generator.clone()));
        Ok(Self::with_parts(db, config, settings, registry, generator))
    }

    /// Assemble a service from explicit parts, e.g. mock platforms in tests
    pub fn with_parts(
        db: Database,
        config: Config,
        settings: SettingsStore,
        registry: PlatformRegistry,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new(100);
        let validation = ValidationService::new(registry.clone());

        let drafts = DraftService::new(db.clone(), generator, settings.clone(), events.clone());
        let review = ReviewGate::new(db.clone(), validation.clone(), events.clone());
        let dispatcher = Dispatcher::new(
            db.clone(),
            registry.clone(),
            settings.clone(),
            RetryPolicy::from_config(&config.dispatch),
            events.clone(),
        );
        let scheduler = Scheduler::new(db.clone(), dispatcher.clone(), &config.scheduler);

        Self {
            db,
            config,
            settings,
            registry,
            drafts,
            review,
            dispatcher,
            scheduler,
            validation,
            events,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn drafts(&self) -> &DraftService {
        &self.drafts
    }

    pub fn review(&self) -> &ReviewGate {
        &self.review
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn validation(&self) -> &ValidationService {
        &self.validation
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Post> {
        self.db.require_post(post_id).await
    }

    pub async fn list_posts(&self, state: Option<PostState>, limit: usize) -> Result<Vec<Post>> {
        self.db.list_posts(state, limit).await
    }

    pub async fn history(&self, post_id: &str) -> Result<Vec<TransitionRecord>> {
        self.db.require_post(post_id).await?;
        self.db.transitions(post_id).await
    }

    pub async fn stats(&self) -> Result<BTreeMap<PostState, i64>> {
        self.db.count_by_state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::MockGenerator;
    use crate::platforms::mock::MockPlatform;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_from_config_opens_database() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.database.path = temp_dir
            .path()
            .join("nested/posts.db")
            .to_string_lossy()
            .to_string();

        let service = PostflowService::from_config(config, SettingsStore::default())
            .await
            .unwrap();
        assert!(temp_dir.path().join("nested/posts.db").exists());
        assert_eq!(service.registry().names(), vec!["facebook", "instagram"]);
        assert!(service.stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_of_unknown_post() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("svc.db").to_str().unwrap())
            .await
            .unwrap();
        let service = PostflowService::with_parts(
            db,
            Config::default(),
            SettingsStore::default(),
            PlatformRegistry::new().with(Arc::new(MockPlatform::success("facebook"))),
            Arc::new(MockGenerator::new()),
        );

        let err = service.history("nope").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
