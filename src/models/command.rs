use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::event::CalendarEntry;

pub const DEFAULT_MAX_RESULTS: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_min: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_max: Option<DateTime<Utc>>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            time_min: None,
            time_max: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

fn default_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}

/// Payload of `create_event`. Times are local wall-clock readings in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEvent {
    pub summary: String,
    #[serde(deserialize_with = "local_datetime")]
    pub start_time: NaiveDateTime,
    #[serde(deserialize_with = "local_datetime")]
    pub end_time: NaiveDateTime,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_local_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<NaiveDateTime>,
    #[serde(
        default,
        deserialize_with = "optional_local_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// One call against the calendar backend. Built fresh for every cycle and
/// never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    List(ListQuery),
    Create(NewEvent),
    Update { event_id: String, patch: EventPatch },
    Delete { event_id: String },
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCommand::List(_) => "list_events",
            BackendCommand::Create(_) => "create_event",
            BackendCommand::Update { .. } => "update_event",
            BackendCommand::Delete { .. } => "delete_event",
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, BackendCommand::List(_))
    }
}

impl fmt::Display for BackendCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            BackendCommand::List(query) => {
                let json = serde_json::to_string(query).map_err(|_| fmt::Error)?;
                write!(f, "{name}({json})")
            }
            BackendCommand::Create(event) => {
                let json = serde_json::to_string(event).map_err(|_| fmt::Error)?;
                write!(f, "{name}({json})")
            }
            BackendCommand::Update { event_id, patch } => {
                let json = serde_json::to_string(patch).map_err(|_| fmt::Error)?;
                write!(f, "{name}(\"{event_id}\", {json})")
            }
            BackendCommand::Delete { event_id } => write!(f, "{name}(\"{event_id}\")"),
        }
    }
}

impl FromStr for BackendCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = s.trim();
        if command.is_empty() {
            anyhow::bail!("empty command");
        }

        let (name, rest) = command
            .split_once('(')
            .ok_or_else(|| anyhow::anyhow!("invalid command format: {}", preview(command)))?;
        let args = rest
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| anyhow::anyhow!("invalid command format: {}", preview(command)))?
            .trim();

        match name.trim() {
            "list_events" => {
                if args.is_empty() {
                    Ok(BackendCommand::List(ListQuery::default()))
                } else {
                    Ok(BackendCommand::List(parse_payload(args)?))
                }
            }
            "create_event" => Ok(BackendCommand::Create(parse_payload(args)?)),
            "update_event" => {
                let (id, payload) = args
                    .split_once(',')
                    .ok_or_else(|| anyhow::anyhow!("update_event needs an id and a payload"))?;
                Ok(BackendCommand::Update {
                    event_id: unquote(id)?,
                    patch: parse_payload(payload)?,
                })
            }
            "delete_event" => Ok(BackendCommand::Delete {
                event_id: unquote(args)?,
            }),
            other => anyhow::bail!("unknown command: {other}"),
        }
    }
}

/// Result of one executed command, after deduplication for listings.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendOutcome {
    /// `fetched` counts the rows the backend returned before collapsing.
    Listed {
        events: Vec<CalendarEntry>,
        fetched: usize,
    },
    Created { event: CalendarEntry },
    Updated { event: CalendarEntry },
    Deleted { event_id: String },
}

fn preview(s: &str) -> String {
    s.chars().take(50).collect()
}

fn unquote(raw: &str) -> anyhow::Result<String> {
    let id = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    anyhow::ensure!(!id.is_empty(), "missing event id");
    Ok(id.to_string())
}

/// Strict JSON first, then a relaxed pass for the single-quoted literal style
/// language models like to emit.
fn parse_payload<T: serde::de::DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    let raw = raw.trim();
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(strict) => {
            let relaxed = raw
                .replace('\'', "\"")
                .replace("None", "null")
                .replace("True", "true")
                .replace("False", "false");
            serde_json::from_str(&relaxed)
                .map_err(|_| anyhow::anyhow!("invalid JSON in command: {strict}"))
        }
    }
}

fn parse_local(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

fn local_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_local(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime format: {raw}")))
}

fn optional_local_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_local(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime format: {raw}"))),
    }
}
