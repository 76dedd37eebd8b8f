use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub admin_token: String,
    pub llm_provider: String,
    pub groq_api_key: String,
    pub groq_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub calendar_backend: String,
    pub google_calendar_id: String,
    pub google_access_token: String,
    pub default_timezone: String,
    pub backend_timeout_secs: u64,
    pub session_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "ollama".to_string()),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: env::var("GROQ_MODEL")
                .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string()),
            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string()),
            calendar_backend: env::var("CALENDAR_BACKEND").unwrap_or_else(|_| "memory".to_string()),
            google_calendar_id: env::var("GOOGLE_CALENDAR_ID")
                .unwrap_or_else(|_| "primary".to_string()),
            google_access_token: env::var("GOOGLE_ACCESS_TOKEN").unwrap_or_default(),
            default_timezone: env::var("DEFAULT_TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
            backend_timeout_secs: env::var("BACKEND_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            session_ttl_minutes: env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }

    pub fn timezone(&self) -> anyhow::Result<chrono_tz::Tz> {
        self.default_timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown timezone: {}", self.default_timezone))
    }
}
