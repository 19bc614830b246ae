//! Minimal Graph API client shared by the Facebook and Instagram publishers

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::PlatformError;
use crate::settings::Credentials;

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    platform: &'static str,
}

impl GraphClient {
    pub fn new(platform: &'static str, base_url: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            platform,
        }
    }

    /// POST form parameters to `{base_url}/{path}` and return the created object id
    pub async fn post_form(
        &self,
        path: &str,
        params: &[(&str, &str)],
        credentials: &Credentials,
    ) -> Result<String, PlatformError> {
        let token = credentials.expose().ok_or_else(|| {
            PlatformError::Authentication(format!("{}: no access token configured", self.platform))
        })?;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("access_token", token));

        tracing::debug!(platform = self.platform, path, "Graph API request");

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !(200..300).contains(&status) {
            return Err(classify_error(self.platform, status, &body));
        }

        serde_json::from_str::<IdResponse>(&body)
            .map(|r| r.id)
            .map_err(|e| {
                PlatformError::Posting(format!(
                    "{}: unexpected response ({}): {}",
                    self.platform, e, body
                ))
            })
    }

    fn transport_error(&self, error: reqwest::Error) -> PlatformError {
        if error.is_timeout() {
            PlatformError::Timeout(format!("{}: {}", self.platform, error))
        } else {
            PlatformError::Network(format!("{}: {}", self.platform, error))
        }
    }
}

/// Map a failed Graph API response onto a [`PlatformError`].
///
/// Graph error codes 4, 17, 32 and 613 are throttling; 190 is an invalid or
/// expired token.
pub fn classify_error(platform: &str, status: u16, body: &str) -> PlatformError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let code = parsed.as_ref().and_then(|e| e.error.code);
    let message = parsed
        .map(|e| e.error.message)
        .unwrap_or_else(|| body.to_string());
    let detail = format!("{} ({}): {}", platform, status, message);

    match (status, code) {
        (_, Some(190)) | (401 | 403, _) => PlatformError::Authentication(detail),
        (_, Some(4 | 17 | 32 | 613)) | (429, _) => PlatformError::RateLimit(detail),
        (500..=599, _) => PlatformError::Network(detail),
        (400 | 422, _) => PlatformError::Validation(detail),
        _ => PlatformError::Posting(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_expired_token() {
        let body = r#"{"error":{"message":"Error validating access token","type":"OAuthException","code":190}}"#;
        let err = classify_error("facebook", 400, body);
        assert!(matches!(err, PlatformError::Authentication(_)));
        assert!(err.to_string().contains("Error validating access token"));
    }

    #[test]
    fn test_classify_throttling() {
        let body = r#"{"error":{"message":"Application request limit reached","code":4}}"#;
        assert!(classify_error("instagram", 400, body).is_retryable());
        assert!(classify_error("instagram", 429, "slow down").is_retryable());
    }

    #[test]
    fn test_classify_server_error_is_retryable() {
        let err = classify_error("facebook", 503, "Service Unavailable");
        assert!(matches!(err, PlatformError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_bad_request_is_permanent() {
        let body = r#"{"error":{"message":"Invalid parameter","code":100}}"#;
        let err = classify_error("facebook", 400, body);
        assert!(matches!(err, PlatformError::Validation(_)));
        assert!(!err.is_retryable());

        let err = classify_error("facebook", 403, "");
        assert!(matches!(err, PlatformError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_request() {
        let client = GraphClient::new("facebook", "http://127.0.0.1:9", Duration::from_secs(1));
        let err = client
            .post_form("123/feed", &[("message", "hola")], &Credentials::missing())
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Authentication(_)));
    }
}
