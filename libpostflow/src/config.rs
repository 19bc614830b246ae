//! Configuration management for Postflow
//!
//! Configuration lives in a TOML file. Every section is optional and falls
//! back to defaults, so an empty file is a valid configuration. Secrets never
//! live here; see [`crate::settings`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub generator: GeneratorConfig,
    pub facebook: Option<FacebookConfig>,
    pub instagram: Option<InstagramConfig>,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/postflow/posts.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scans for due posts
    pub poll_interval: u64,
    /// Seconds after which a post stuck in `dispatching` is finalised
    pub stale_dispatch_after: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 30,
            stale_dispatch_after: 900,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Publish attempts per platform per dispatch, first attempt included
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Seconds before a single publish call is abandoned
    pub publish_timeout: u64,
}

impl DispatchConfig {
    /// Longest one platform can stay in flight: every attempt timing out,
    /// with the largest backoff between attempts
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = u64::from(self.max_attempts.max(1));
        Duration::from_secs(attempts.saturating_mul(self.publish_timeout.max(1)))
            + Duration::from_millis((attempts - 1).saturating_mul(self.backoff_max_ms))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            publish_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub image_model: String,
    pub image_size: String,
    /// Language the generated copy is written in
    pub language: String,
    pub timeout: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            language: "Spanish".to_string(),
            timeout: 120,
        }
    }
}

pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v19.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    pub page_id: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    /// Instagram business account id
    pub user_id: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
}

fn default_graph_url() -> String {
    DEFAULT_GRAPH_URL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5001".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    /// An unreadable or malformed file is still an error.
    pub fn load_or_default() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            let mut config = Self::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("POSTFLOW_DB_PATH") {
            self.database.path = path;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.dispatch.max_attempts == 0 {
            return Err(
                ConfigError::Invalid("dispatch.max_attempts must be at least 1".to_string())
                    .into(),
            );
        }
        if self.dispatch.publish_timeout == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.publish_timeout must be at least 1 second".to_string(),
            )
            .into());
        }

        let worst_case = self.dispatch.worst_case_duration();
        if Duration::from_secs(self.scheduler.stale_dispatch_after) <= worst_case {
            return Err(ConfigError::Invalid(format!(
                "scheduler.stale_dispatch_after ({}s) must exceed the longest possible dispatch ({}s)",
                self.scheduler.stale_dispatch_after,
                worst_case.as_secs_f64().ceil() as u64
            ))
            .into());
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTFLOW_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postflow").join("config.toml"))
}
