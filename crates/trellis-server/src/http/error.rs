//! Error envelope: `{"success": false, "error": <message>, "code": "E####"}`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;
use trellis_core::{ErrorCode, TrackerError};

#[derive(Debug)]
pub enum ApiError {
    Tracker(TrackerError),
    /// Request shape problems caught before reaching the tracker.
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Tracker(err) => match err {
                TrackerError::Validation { .. } | TrackerError::InvalidState(_) => {
                    StatusCode::BAD_REQUEST
                }
                TrackerError::NotFound { .. } => StatusCode::NOT_FOUND,
                TrackerError::Conflict(_) | TrackerError::ArchiveBlocked { .. } => {
                    StatusCode::CONFLICT
                }
                TrackerError::Unauthorized => StatusCode::UNAUTHORIZED,
                TrackerError::Forbidden(_) => StatusCode::FORBIDDEN,
                TrackerError::Store(_) | TrackerError::Encoding(_) | TrackerError::Blob(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn code(&self) -> ErrorCode {
        match self {
            Self::Tracker(err) => err.code(),
            Self::BadRequest(_) => ErrorCode::ValidationFailed,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        Self::Tracker(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match &self {
            Self::Tracker(err) if err.is_internal() => {
                error!(code = %code, error = %err, "request failed");
                code.message().to_string()
            }
            Self::Internal(detail) => {
                error!(code = %code, error = %detail, "request failed");
                code.message().to_string()
            }
            Self::Tracker(err) => err.to_string(),
            Self::BadRequest(detail) => detail.clone(),
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "code": code.code(),
        });
        if let Some(hint) = code.hint() {
            body["hint"] = json!(hint);
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::error::Entity;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        let cases = [
            (TrackerError::validation("bad"), StatusCode::BAD_REQUEST),
            (TrackerError::InvalidState("done".into()), StatusCode::BAD_REQUEST),
            (TrackerError::not_found(Entity::Task, 4), StatusCode::NOT_FOUND),
            (TrackerError::Conflict("decided".into()), StatusCode::CONFLICT),
            (
                TrackerError::ArchiveBlocked {
                    task_id: 1,
                    assignee_id: 2,
                },
                StatusCode::CONFLICT,
            ),
            (TrackerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (TrackerError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (
                TrackerError::Store(rusqlite::Error::InvalidQuery),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let response =
            ApiError::from(TrackerError::Store(rusqlite::Error::InvalidQuery)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
