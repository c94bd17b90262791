use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use neuropixel_common::error::NeuroPixelError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`NeuroPixelError`] for domain errors and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses of the form `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error.
    #[error(transparent)]
    Core(#[from] NeuroPixelError),

    /// A malformed request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                NeuroPixelError::NotFound(msg) => (StatusCode::NOT_FOUND, core.code(), msg.clone()),
                NeuroPixelError::Conflict(msg) => (StatusCode::CONFLICT, core.code(), msg.clone()),
                NeuroPixelError::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, core.code(), msg.clone())
                }
                NeuroPixelError::QueueFull(msg) => {
                    (StatusCode::SERVICE_UNAVAILABLE, core.code(), msg.clone())
                }
                other => {
                    tracing::error!(error = %other, "Internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
