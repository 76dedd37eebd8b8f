use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures the dispatcher contains within a single turn.
///
/// None of these ever reach the user verbatim; the reply renderer turns each
/// kind into a fixed, user-safe message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid intent record: {0}")]
    InvalidIntent(String),

    #[error("ambiguous time: {0}")]
    AmbiguousTime(String),

    #[error("planning exhausted after {issued} backend commands")]
    PlanningExhausted { issued: usize },

    #[error("calendar backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("calendar error: {0}")]
    Calendar(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Calendar(_) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
