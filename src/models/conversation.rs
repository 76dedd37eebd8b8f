use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::command::BackendCommand;
use super::event::CalendarEntry;
use super::insight::IntentRecord;

const HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

/// A mutation that is ready and waiting for the user's yes.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub command: BackendCommand,
    /// The existing event being moved or removed; `None` for new bookings.
    pub target: Option<CalendarEntry>,
}

/// Everything one conversation carries between turns.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub record: IntentRecord,
    pub pending: Option<PendingAction>,
    pub messages: Vec<ConversationMessage>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: id.to_string(),
            record: IntentRecord::default(),
            pending: None,
            messages: vec![],
            last_activity: now,
            expires_at: expiry(now, ttl),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_activity = now;
        self.expires_at = expiry(now, ttl);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn push_message(&mut self, role: &str, content: &str) {
        self.messages.push(ConversationMessage {
            role: role.to_string(),
            content: content.to_string(),
        });
        if self.messages.len() > HISTORY_LIMIT {
            let excess = self.messages.len() - HISTORY_LIMIT;
            self.messages.drain(..excess);
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
