use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use calendar_dispatcher::config::AppConfig;
use calendar_dispatcher::handlers;
use calendar_dispatcher::services::ai::groq::GroqProvider;
use calendar_dispatcher::services::ai::ollama::OllamaProvider;
use calendar_dispatcher::services::ai::LlmProvider;
use calendar_dispatcher::services::calendar::google::GoogleCalendar;
use calendar_dispatcher::services::calendar::memory::InMemoryCalendar;
use calendar_dispatcher::services::calendar::CalendarBackend;
use calendar_dispatcher::services::sessions::SessionStore;
use calendar_dispatcher::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    let zone = config.timezone().context("invalid DEFAULT_TIMEZONE")?;

    let llm: Box<dyn LlmProvider> = match config.llm_provider.as_str() {
        "groq" => {
            anyhow::ensure!(!config.groq_api_key.is_empty(), "GROQ_API_KEY must be set when LLM_PROVIDER=groq");
            tracing::info!("using Groq LLM provider (model: {})", config.groq_model);
            Box::new(GroqProvider::new(config.groq_api_key.clone(), config.groq_model.clone()))
        }
        _ => {
            tracing::info!("using Ollama LLM provider (url: {}, model: {})", config.ollama_url, config.ollama_model);
            Box::new(OllamaProvider::new(config.ollama_url.clone(), config.ollama_model.clone()))
        }
    };

    let backend: Arc<dyn CalendarBackend> = match config.calendar_backend.as_str() {
        "google" => {
            anyhow::ensure!(
                !config.google_access_token.is_empty(),
                "GOOGLE_ACCESS_TOKEN must be set when CALENDAR_BACKEND=google"
            );
            tracing::info!("using Google Calendar backend (calendar: {})", config.google_calendar_id);
            Arc::new(GoogleCalendar::new(
                config.google_calendar_id.clone(),
                config.google_access_token.clone(),
            ))
        }
        _ => {
            tracing::info!("using in-memory calendar backend");
            Arc::new(InMemoryCalendar::new())
        }
    };

    let state = Arc::new(AppState {
        config: config.clone(),
        zone,
        llm,
        backend,
        sessions: SessionStore::new(chrono::Duration::minutes(config.session_ttl_minutes)),
    });

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper.sessions.sweep(chrono::Utc::now());
        }
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr} (default timezone {})", zone.name());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
