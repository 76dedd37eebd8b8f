use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{IntentRecord, ReplyEnvelope};
use crate::services::conversation;
use crate::state::AppState;

pub const DEFAULT_CONVERSATION: &str = "default";

const FALLBACK_REPLY: &str = "Sorry, I'm having trouble understanding right now. Please try again in a moment.";

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
    /// Reference clock override, mostly for replaying conversations.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timezone: Option<String>,
}

pub async fn chat_by_path(
    State(state): State<Arc<AppState>>,
    Path(text): Path<String>,
) -> Json<ReplyEnvelope> {
    let zone = state.zone;
    Json(run(&state, DEFAULT_CONVERSATION, &text, Utc::now(), zone).await)
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ReplyEnvelope>, AppError> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }

    let zone: Tz = match payload.timezone.as_deref() {
        Some(name) => name
            .parse()
            .map_err(|_| AppError::BadRequest(format!("unknown timezone: {name}")))?,
        None => state.zone,
    };
    let conversation_id = payload
        .conversation_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_CONVERSATION);
    let now = payload.now.unwrap_or_else(Utc::now);

    Ok(Json(run(&state, conversation_id, message, now, zone).await))
}

/// One turn, always answered with an envelope. Extraction failures fall
/// back to an apology that leaves the record as it was.
async fn run(
    state: &Arc<AppState>,
    conversation_id: &str,
    message: &str,
    now: DateTime<Utc>,
    zone: Tz,
) -> ReplyEnvelope {
    match conversation::process_message(state, conversation_id, message, now, zone).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(conversation = conversation_id, error = %e, "failed to process message");
            ReplyEnvelope {
                casual: FALLBACK_REPLY.to_string(),
                system: String::new(),
                insight: state.sessions.insight(conversation_id).await.unwrap_or_default(),
            }
        }
    }
}

pub async fn get_insight(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<IntentRecord> {
    Json(state.sessions.insight(&id).await.unwrap_or_default())
}

/// Replace a conversation's insight with a client-held record. Any pending
/// confirmation is dropped, so the next "yes" cannot commit it.
pub async fn put_insight(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(candidate): Json<serde_json::Value>,
) -> Result<Json<IntentRecord>, AppError> {
    let record =
        IntentRecord::from_value(&candidate).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let now = Utc::now();
    let handle = state.sessions.handle(&id, now);
    let mut session = handle.lock().await;
    session.record = record.clone();
    session.pending = None;
    session.touch(now, state.sessions.ttl());

    tracing::info!(conversation = %id, intent = ?record.intent, "conversation insight replaced");
    Ok(Json(record))
}

pub async fn reset_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(&id) {
        tracing::info!(conversation = %id, "conversation reset");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("conversation {id}")))
    }
}
