//! Error types for Postflow

use thiserror::Error;

use crate::lifecycle::Transition;
use crate::types::PostState;

pub type Result<T> = std::result::Result<T, PostflowError>;

#[derive(Error, Debug)]
pub enum PostflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Malformed input to a transition; no state was changed.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for post {post_id}: cannot {transition} while {state}")]
    InvalidTransition {
        post_id: String,
        state: PostState,
        transition: Transition,
    },

    #[error("Conflicting transition for post {post_id}: {transition} requested but post is already {state}")]
    ConflictingTransition {
        post_id: String,
        state: PostState,
        transition: Transition,
    },

    /// Lost the race for `scheduled -> dispatching`; the winner proceeds.
    #[error("Claim conflict for post {post_id}: post is already {state}")]
    ClaimConflict { post_id: String, state: PostState },
}

impl PostflowError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostflowError::Validation(_)
            | PostflowError::NotFound(_)
            | PostflowError::InvalidTransition { .. }
            | PostflowError::ConflictingTransition { .. }
            | PostflowError::ClaimConflict { .. } => 3,
            PostflowError::Config(_) | PostflowError::Database(_) => 2,
            PostflowError::Platform(_) | PostflowError::Generation(_) => 1,
        }
    }

    /// Returns the HTTP status code used by the API surface
    pub fn status_code(&self) -> u16 {
        match self {
            PostflowError::Validation(_)
            | PostflowError::InvalidTransition { .. }
            | PostflowError::ConflictingTransition { .. }
            | PostflowError::ClaimConflict { .. } => 400,
            PostflowError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Gave up updating post {0} after repeated concurrent modifications")]
    Contention(String),
}

/// Errors raised by platform publishers.
///
/// The variant decides the retry classification: transport trouble is
/// transient, everything the platform actively refused is permanent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl PlatformError {
    /// Whether the dispatcher may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Network(_) | PlatformError::RateLimit(_) | PlatformError::Timeout(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generator not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_validation() {
        let error = PostflowError::Validation("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_transition_errors() {
        let invalid = PostflowError::InvalidTransition {
            post_id: "p1".to_string(),
            state: PostState::Rejected,
            transition: Transition::Approve,
        };
        assert_eq!(invalid.exit_code(), 3);

        let claim = PostflowError::ClaimConflict {
            post_id: "p1".to_string(),
            state: PostState::Dispatching,
        };
        assert_eq!(claim.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_config_and_database() {
        let config = PostflowError::Config(ConfigError::MissingField("database.path".into()));
        assert_eq!(config.exit_code(), 2);

        let db = PostflowError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        )));
        assert_eq!(db.exit_code(), 2);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PostflowError::Validation("x".into()).status_code(), 400);
        assert_eq!(PostflowError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            PostflowError::ConflictingTransition {
                post_id: "p".into(),
                state: PostState::Approved,
                transition: Transition::Reject,
            }
            .status_code(),
            400
        );
        assert_eq!(
            PostflowError::Generation(GenerationError::Api("boom".into())).status_code(),
            500
        );
    }

    #[test]
    fn test_invalid_transition_message_names_everything() {
        let error = PostflowError::InvalidTransition {
            post_id: "abc".to_string(),
            state: PostState::Rejected,
            transition: Transition::Approve,
        };
        let message = error.to_string();
        assert!(message.contains("abc"));
        assert!(message.contains("approve"));
        assert!(message.contains("rejected"));
    }

    #[test]
    fn test_platform_error_retry_classification() {
        assert!(PlatformError::Network("reset".into()).is_retryable());
        assert!(PlatformError::RateLimit("429".into()).is_retryable());
        assert!(PlatformError::Timeout("30s".into()).is_retryable());

        assert!(!PlatformError::Authentication("bad token".into()).is_retryable());
        assert!(!PlatformError::Validation("too long".into()).is_retryable());
        assert!(!PlatformError::Posting("policy".into()).is_retryable());
        assert!(!PlatformError::NotConfigured("no page".into()).is_retryable());
    }

    #[test]
    fn test_error_message_formatting_platform() {
        let error = PostflowError::Platform(PlatformError::Authentication(
            "Token expired".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Platform error: Authentication failed: Token expired"
        );
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let config_error = ConfigError::MissingField("test".to_string());
        let error: PostflowError = config_error.into();
        assert!(matches!(error, PostflowError::Config(_)));
    }
}
