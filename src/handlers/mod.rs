pub mod chat;
pub mod dev;
pub mod health;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/chat/:text", get(chat::chat_by_path))
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/conversations/:id",
            get(chat::get_insight)
                .put(chat::put_insight)
                .delete(chat::reset_conversation),
        )
        .route("/api/dev/dispatch", post(dev::dispatch))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
