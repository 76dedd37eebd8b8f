use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{BackendCommand, BackendOutcome};
use crate::services::calendar;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DispatchRequest {
    pub command: String,
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// Run a raw command string such as `delete_event("abc")` straight against
/// the backend, bypassing planning and confirmation.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<DispatchRequest>,
) -> Result<Json<BackendOutcome>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let command: BackendCommand = payload
        .command
        .parse()
        .map_err(|e: anyhow::Error| AppError::BadRequest(e.to_string()))?;

    tracing::info!(command = command.name(), "dev dispatch");
    let outcome = calendar::execute(state.backend.as_ref(), &command)
        .await
        .map_err(|e| AppError::Calendar(e.to_string()))?;
    Ok(Json(outcome))
}
