//! Runtime settings and credential handles
//!
//! Settings are loaded once at process start and replaced as a whole on
//! update. Readers take an `Arc<Settings>` snapshot and keep using it for the
//! duration of one operation, so an update never changes credentials under a
//! dispatch that is already running.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{PostflowError, Result};

/// Opaque credential handle for one platform or provider.
///
/// The pipeline only passes these around; only the publisher or generator
/// that owns the secret calls [`Credentials::expose`].
#[derive(Clone, Default)]
pub struct Credentials(Option<Arc<SecretString>>);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret: String = secret.into();
        if secret.trim().is_empty() {
            return Self::missing();
        }
        Self(Some(Arc::new(SecretString::from(secret))))
    }

    pub fn missing() -> Self {
        Self(None)
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    /// Reveal the secret. Intended for platform and generator implementations.
    pub fn expose(&self) -> Option<&str> {
        self.0.as_deref().map(|s| s.expose_secret())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Credentials(****)"),
            None => f.write_str("Credentials(missing)"),
        }
    }
}

fn from_env_var(name: &str) -> Credentials {
    std::env::var(name)
        .map(Credentials::new)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct Settings {
    pub generator: Credentials,
    platforms: BTreeMap<String, Credentials>,
    pub updated_at: i64,
}

impl Settings {
    /// Read `OPENAI_API_KEY`, `FACEBOOK_ACCESS_TOKEN` and
    /// `INSTAGRAM_ACCESS_TOKEN` from the environment.
    pub fn from_env() -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert("facebook".to_string(), from_env_var("FACEBOOK_ACCESS_TOKEN"));
        platforms.insert(
            "instagram".to_string(),
            from_env_var("INSTAGRAM_ACCESS_TOKEN"),
        );

        Self {
            generator: from_env_var("OPENAI_API_KEY"),
            platforms,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_platform(mut self, platform: &str, credentials: Credentials) -> Self {
        self.platforms.insert(platform.to_lowercase(), credentials);
        self
    }

    pub fn with_generator(mut self, credentials: Credentials) -> Self {
        self.generator = credentials;
        self
    }

    /// Credential handle for a platform; missing when none was configured
    pub fn credentials_for(&self, platform: &str) -> Credentials {
        self.platforms.get(platform).cloned().unwrap_or_default()
    }

    /// View safe to hand to operators
    pub fn redacted(&self) -> RedactedSettings {
        let mask = |c: &Credentials| {
            if c.is_present() {
                "****".to_string()
            } else {
                String::new()
            }
        };

        RedactedSettings {
            openai_api_key: mask(&self.generator),
            facebook_access_token: mask(&self.credentials_for("facebook")),
            instagram_access_token: mask(&self.credentials_for("instagram")),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedactedSettings {
    pub openai_api_key: String,
    pub facebook_access_token: String,
    pub instagram_access_token: String,
    pub updated_at: i64,
}

/// Replacement settings submitted by an operator
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub facebook_access_token: Option<String>,
    #[serde(default)]
    pub instagram_access_token: Option<String>,
}

/// Shared, atomically replaceable settings
#[derive(Clone)]
pub struct SettingsStore {
    current: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn from_env() -> Self {
        Self::new(Settings::from_env())
    }

    /// Current settings; the returned snapshot never changes
    pub fn snapshot(&self) -> Arc<Settings> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a complete new settings value
    pub fn replace(&self, settings: Settings) -> Arc<Settings> {
        let settings = Arc::new(settings);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&settings);
        settings
    }

    /// Validate an operator update and swap it in.
    ///
    /// Only the generator key is mandatory. Platform tokens are checked
    /// lazily, on the first publish that needs them.
    pub fn apply(&self, update: SettingsUpdate) -> Result<Arc<Settings>> {
        if update.openai_api_key.trim().is_empty() {
            return Err(PostflowError::Validation(
                "OpenAI API key is required".to_string(),
            ));
        }

        let settings = Settings {
            generator: Credentials::new(update.openai_api_key),
            ..Default::default()
        }
        .with_platform(
            "facebook",
            Credentials::new(update.facebook_access_token.unwrap_or_default()),
        )
        .with_platform(
            "instagram",
            Credentials::new(update.instagram_access_token.unwrap_or_default()),
        );

        let settings = Settings {
            updated_at: chrono::Utc::now().timestamp(),
            ..settings
        };

        tracing::info!("Settings replaced");
        Ok(self.replace(settings))
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("super-secret-token");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("super-secret-token"));
        assert_eq!(debug, "Credentials(****)");
    }

    #[test]
    fn test_blank_credentials_are_missing() {
        assert!(!Credentials::new("   ").is_present());
        assert!(Credentials::missing().expose().is_none());
    }

    #[test]
    fn test_unknown_platform_has_missing_credentials() {
        let settings = Settings::default();
        assert!(!settings.credentials_for("mastodon").is_present());
    }

    #[test]
    fn test_apply_requires_generator_key() {
        let store = SettingsStore::default();
        let err = store.apply(SettingsUpdate::default()).unwrap_err();
        assert!(matches!(err, PostflowError::Validation(_)));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_replace() {
        let store = SettingsStore::new(
            Settings::default().with_platform("facebook", Credentials::new("old")),
        );
        let before = store.snapshot();

        store
            .apply(SettingsUpdate {
                openai_api_key: "sk-test".to_string(),
                facebook_access_token: Some("new".to_string()),
                instagram_access_token: None,
            })
            .unwrap();

        assert_eq!(before.credentials_for("facebook").expose(), Some("old"));
        assert_eq!(
            store.snapshot().credentials_for("facebook").expose(),
            Some("new")
        );
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let settings = Settings::default()
            .with_generator(Credentials::new("sk-live"))
            .with_platform("facebook", Credentials::new("EAAB"));
        let redacted = settings.redacted();

        assert_eq!(redacted.openai_api_key, "****");
        assert_eq!(redacted.facebook_access_token, "****");
        assert_eq!(redacted.instagram_access_token, "");

        let json = serde_json::to_string(&redacted).unwrap();
        assert!(json.contains("openaiApiKey"));
        assert!(!json.contains("sk-live"));
    }
}
