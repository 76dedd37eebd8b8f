use serde::{Deserialize, Serialize};

use super::insight::IntentRecord;

/// The one structured reply produced per user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyEnvelope {
    pub casual: String,
    pub system: String,
    pub insight: IntentRecord,
}
