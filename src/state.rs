use std::sync::Arc;

use chrono_tz::Tz;

use crate::config::AppConfig;
use crate::services::ai::LlmProvider;
use crate::services::calendar::CalendarBackend;
use crate::services::sessions::SessionStore;

pub struct AppState {
    pub config: AppConfig,
    /// Zone used when a request does not name one.
    pub zone: Tz,
    pub llm: Box<dyn LlmProvider>,
    pub backend: Arc<dyn CalendarBackend>,
    pub sessions: SessionStore,
}
