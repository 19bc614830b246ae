//! Response envelope and error mapping

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use libpostflow::PostflowError;
use serde::Serialize;

/// `{ "success": true, "data": ... }` or `{ "success": false, "error": ... }`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Error raised by the pipeline
    Service(PostflowError),
    /// Body could not be parsed
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<PostflowError> for ApiError {
    fn from(e: PostflowError) -> Self {
        ApiError::Service(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Service(e) => {
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", e);
                }
                e.to_string()
            }
            ApiError::BadRequest(message) => message,
        };

        let body = Envelope::<()> {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libpostflow::types::PostState;

    #[test]
    fn test_status_follows_error_kind() {
        let not_found = ApiError::from(PostflowError::NotFound("p".into()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let conflict = ApiError::from(PostflowError::ClaimConflict {
            post_id: "p".into(),
            state: PostState::Dispatching,
        });
        assert_eq!(conflict.status(), StatusCode::BAD_REQUEST);

        let db = ApiError::from(PostflowError::Database(
            libpostflow::error::DbError::Corrupt("bad row".into()),
        ));
        assert_eq!(db.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_envelope_omits_missing_fields() {
        let Json(envelope) = Envelope::ok(42);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 42}));
    }
}
