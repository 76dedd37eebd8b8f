pub mod command;
pub mod conversation;
pub mod event;
pub mod extraction;
pub mod insight;
pub mod reply;

pub use command::{BackendCommand, BackendOutcome, EventPatch, ListQuery, NewEvent};
pub use conversation::{ConversationMessage, PendingAction, Session};
pub use event::{CalendarEntry, DedupKey};
pub use extraction::ExtractedIntent;
pub use insight::{Field, Intent, IntentRecord};
pub use reply::ReplyEnvelope;
