use crate::services::store_service::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for handler errors that keeps the message local.
///
/// Store-level failures are normalized into [`StoreError`] at the service
/// boundary and mapped onto HTTP statuses here; clients never see raw SDK
/// error detail.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 404 Not Found.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::not_found(err.to_string()),
            StoreError::InvalidKey | StoreError::InvalidArgument(_) => {
                AppError::bad_request(err.to_string())
            }
            StoreError::AccessDenied => {
                AppError::new(StatusCode::FORBIDDEN, "access denied by object store")
            }
            StoreError::Unavailable(_) => {
                tracing::warn!("store unavailable: {err}");
                AppError::new(StatusCode::BAD_GATEWAY, "object store unavailable")
            }
            StoreError::Internal(_) => {
                tracing::error!("store operation failed: {err}");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal object store error",
                )
            }
        }
    }
}
