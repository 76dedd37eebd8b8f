use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::models::{IntentRecord, Session};

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

/// In-process conversation store.
///
/// Each conversation sits behind its own async mutex; a turn holds it from
/// start to finish, so turns for one conversation run strictly in order
/// while different conversations proceed in parallel.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Handle for `id`, starting a fresh session when none exists or the
    /// old one has expired.
    pub fn handle(&self, id: &str, now: DateTime<Utc>) -> SessionHandle {
        let mut sessions = self.map();
        if let Some(existing) = sessions.get(id) {
            let expired = existing
                .try_lock()
                .map(|session| session.is_expired(now))
                .unwrap_or(false);
            if !expired {
                return existing.clone();
            }
            tracing::info!(conversation = %id, "session expired, starting over");
        }

        let handle = Arc::new(tokio::sync::Mutex::new(Session::new(id, now, self.ttl)));
        sessions.insert(id.to_string(), handle.clone());
        handle
    }

    pub async fn insight(&self, id: &str) -> Option<IntentRecord> {
        let handle = self.map().get(id).cloned()?;
        let session = handle.lock().await;
        Some(session.record.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.map().remove(id).is_some()
    }

    /// Drop expired sessions that are not mid-turn. Returns how many went.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.map();
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => !session.is_expired(now),
            Err(_) => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
