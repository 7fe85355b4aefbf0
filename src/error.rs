use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use thiserror::Error;

/// Failure taxonomy for the certification core.
///
/// Precondition and validation failures carry messages meant to be shown to
/// the learner as-is; database failures are logged and flattened to a
/// generic 500 at the HTTP boundary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0}")]
    Precondition(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("authentication required")]
    Unauthorized,
    #[error("administrator access required")]
    Forbidden,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CoreError::Precondition(_) => (StatusCode::CONFLICT, self.to_string()),
            CoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            CoreError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            CoreError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            CoreError::Database(e) => {
                tracing::error!(error=%e, "database failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
