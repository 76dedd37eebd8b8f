use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Book,
    Reschedule,
    Cancel,
    Check,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Book => "book",
            Intent::Reschedule => "reschedule",
            Intent::Cancel => "cancel",
            Intent::Check => "check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "book" => Some(Intent::Book),
            "reschedule" => Some(Intent::Reschedule),
            "cancel" => Some(Intent::Cancel),
            "check" => Some(Intent::Check),
            _ => None,
        }
    }

    /// Check is the only read-only intent.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Intent::Check)
    }

    /// Fields that must be known before this intent can be committed.
    pub fn required_fields(&self) -> &'static [Field] {
        match self {
            Intent::Book | Intent::Reschedule => &[Field::Date, Field::Time, Field::Purpose],
            Intent::Cancel => &[Field::Date, Field::Purpose],
            Intent::Check => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Time,
    Purpose,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Time => "time",
            Field::Purpose => "purpose",
        }
    }
}

/// The six-field memory carried from turn to turn.
///
/// Every field is always serialized; unknown values are emitted as `null`
/// rather than skipped, and a deserialized record with missing keys gets
/// them filled in the same way.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntentRecord {
    pub intent: Option<Intent>,
    pub date: Option<NaiveDate>,
    #[serde(with = "hhmm")]
    pub time: Option<NaiveTime>,
    pub duration: Option<String>,
    pub purpose: Option<String>,
    pub commit: bool,
}

impl IntentRecord {
    pub fn for_intent(intent: Intent) -> Self {
        Self {
            intent: Some(intent),
            ..Self::default()
        }
    }

    /// Validate an untyped candidate, such as a record a client puts onto a
    /// conversation.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, DispatchError> {
        if !value.is_object() {
            return Err(DispatchError::InvalidIntent(
                "insight must be a JSON object".to_string(),
            ));
        }
        let record: IntentRecord = serde_json::from_value(value.clone())
            .map_err(|e| DispatchError::InvalidIntent(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.commit {
            return Ok(());
        }
        let intent = match self.intent {
            Some(Intent::Check) => {
                return Err(DispatchError::InvalidIntent(
                    "check is read-only and cannot commit".to_string(),
                ))
            }
            Some(intent) => intent,
            None => {
                return Err(DispatchError::InvalidIntent(
                    "commit set without an intent".to_string(),
                ))
            }
        };
        let missing = self.missing_fields(intent);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(Field::as_str).collect();
            return Err(DispatchError::InvalidIntent(format!(
                "{} committed without {}",
                intent.as_str(),
                names.join(", ")
            )));
        }
        Ok(())
    }

    pub fn missing_fields(&self, intent: Intent) -> Vec<Field> {
        intent
            .required_fields()
            .iter()
            .copied()
            .filter(|field| match field {
                Field::Date => self.date.is_none(),
                Field::Time => self.time.is_none(),
                Field::Purpose => self.purpose.is_none(),
            })
            .collect()
    }

    /// A copy that passes validation: commit is the only field a rule can
    /// reject, so clearing it is always enough.
    pub fn repaired(&self) -> Self {
        Self {
            commit: false,
            ..self.clone()
        }
    }

    pub fn has_details(&self) -> bool {
        self.date.is_some()
            || self.time.is_some()
            || self.duration.is_some()
            || self.purpose.is_some()
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => serializer.serialize_str(&t.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => NaiveTime::parse_from_str(&s, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid time of day: {s}"))),
        }
    }
}
