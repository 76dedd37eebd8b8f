use serde::{Deserialize, Deserializer, Serialize};

use super::insight::Intent;

/// What the language model pulled out of one user message.
///
/// `when` stays a raw phrase ("tonight 9pm"); resolving it against the
/// reference clock is the time normalizer's job, not the model's.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractedIntent {
    #[serde(deserialize_with = "lenient_intent")]
    pub intent: Option<Intent>,
    pub when: Option<String>,
    pub duration: Option<String>,
    pub purpose: Option<String>,
    pub message_to_user: String,
}

impl ExtractedIntent {
    pub fn chat(message: &str) -> Self {
        Self {
            message_to_user: message.to_string(),
            ..Self::default()
        }
    }

    /// Drop blank and placeholder values models emit instead of null.
    pub fn cleaned(self) -> Self {
        Self {
            intent: self.intent,
            when: clean(self.when),
            duration: clean(self.duration),
            purpose: clean(self.purpose),
            message_to_user: self.message_to_user.trim().to_string(),
        }
    }

    pub fn has_details(&self) -> bool {
        self.when.is_some() || self.duration.is_some() || self.purpose.is_some()
    }

    pub fn is_scheduling(&self) -> bool {
        self.intent.is_some() || self.has_details()
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !matches!(v.to_lowercase().as_str(), "null" | "none" | "n/a"))
}

fn lenient_intent<'de, D>(deserializer: D) -> Result<Option<Intent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Intent::parse))
}
