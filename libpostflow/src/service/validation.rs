//! Content validation against platform rules
//!
//! Runs at approval time so content a platform would refuse never reaches
//! the scheduler.

use crate::error::{PostflowError, Result};
use crate::platforms::PlatformRegistry;

/// Maximum content size in bytes (100KB)
const MAX_CONTENT_LENGTH: usize = 100 * 1024;

#[derive(Clone)]
pub struct ValidationService {
    registry: PlatformRegistry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResponse {
    pub valid: bool,
    pub results: Vec<PlatformValidation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformValidation {
    pub platform: String,
    pub valid: bool,
    pub errors: Vec<String>,
    /// Non-blocking
    pub warnings: Vec<String>,
}

impl ValidationResponse {
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.errors.iter().cloned())
            .collect()
    }
}

impl ValidationService {
    pub fn new(registry: PlatformRegistry) -> Self {
        Self { registry }
    }

    pub fn validate<'a, I>(&self, content: &str, image_url: Option<&str>, platforms: I) -> ValidationResponse
    where
        I: IntoIterator<Item = &'a String>,
    {
        let results: Vec<PlatformValidation> = platforms
            .into_iter()
            .map(|platform| self.validate_platform(content, image_url, platform))
            .collect();

        ValidationResponse {
            valid: results.iter().all(|r| r.valid),
            results,
        }
    }

    fn validate_platform(&self, content: &str, image_url: Option<&str>, platform: &str) -> PlatformValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if content.len() > MAX_CONTENT_LENGTH {
            errors.push(format!(
                "Content too large: {} bytes (maximum: {} bytes)",
                content.len(),
                MAX_CONTENT_LENGTH
            ));
        }

        match self.registry.get(platform) {
            Some(publisher) => {
                if let Err(e) = publisher.validate_content(content, image_url) {
                    errors.push(e.to_string());
                }
            }
            None => warnings.push(format!(
                "{}: no publisher registered, dispatch will fail",
                platform
            )),
        }

        PlatformValidation {
            platform: platform.to_string(),
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Like [`ValidationService::validate`], collapsing failures into one
    /// [`PostflowError::Validation`]
    pub fn check<'a, I>(&self, content: &str, image_url: Option<&str>, platforms: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let response = self.validate(content, image_url, platforms);
        for result in &response.results {
            for warning in &result.warnings {
                tracing::warn!(platform = %result.platform, "{}", warning);
            }
        }

        if response.valid {
            Ok(())
        } else {
            Err(PostflowError::Validation(response.errors().join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockPlatform;
    use std::sync::Arc;

    fn service() -> ValidationService {
        ValidationService::new(
            PlatformRegistry::new()
                .with(Arc::new(MockPlatform::with_limit("short", 10)))
                .with(Arc::new(MockPlatform::success("photo").requiring_image())),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_for_all_platforms() {
        let response = service().validate("hola", Some("https://img"), &names(&["short", "photo"]));
        assert!(response.valid);
        assert_eq!(response.results.len(), 2);
    }

    #[test]
    fn test_reports_each_failing_platform() {
        let response = service().validate("demasiado largo", None, &names(&["short", "photo"]));
        assert!(!response.valid);
        assert!(response.results.iter().all(|r| !r.valid));
        assert_eq!(response.errors().len(), 2);
    }

    #[test]
    fn test_unknown_platform_only_warns() {
        let response = service().validate("hola", None, &names(&["myspace"]));
        assert!(response.valid);
        assert_eq!(response.results[0].warnings.len(), 1);
    }

    #[test]
    fn test_check_returns_validation_error() {
        let err = service()
            .check("hola", None, &names(&["photo"]))
            .unwrap_err();
        assert!(matches!(err, PostflowError::Validation(ref m) if m.contains("image")));
    }

    #[test]
    fn test_oversized_content() {
        let big = "a".repeat(MAX_CONTENT_LENGTH + 1);
        let response = service().validate(&big, None, &names(&["myspace"]));
        assert!(!response.valid);
    }
}
