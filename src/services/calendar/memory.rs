use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;

use super::CalendarBackend;
use crate::models::{CalendarEntry, EventPatch, ListQuery, NewEvent};

/// Process-local calendar for development and tests.
///
/// It stores exactly what it is given, duplicates included, the way a real
/// provider can hand back repeated rows.
pub struct InMemoryCalendar {
    events: Mutex<Vec<CalendarEntry>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::with_events(vec![])
    }

    pub fn with_events(events: Vec<CalendarEntry>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    pub async fn snapshot(&self) -> Vec<CalendarEntry> {
        self.events.lock().await.clone()
    }
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self::new()
    }
}

fn to_utc(local: &NaiveDateTime, zone: &str) -> anyhow::Result<DateTime<Utc>> {
    let tz: Tz = zone
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown timezone: {zone}"))?;
    tz.from_local_datetime(local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("{local} does not exist in {zone}"))
}

#[async_trait]
impl CalendarBackend for InMemoryCalendar {
    async fn list_events(&self, query: &ListQuery) -> anyhow::Result<Vec<CalendarEntry>> {
        let events = self.events.lock().await;
        let mut matching: Vec<CalendarEntry> = events
            .iter()
            .filter(|e| query.time_min.map_or(true, |min| e.end > min))
            .filter(|e| query.time_max.map_or(true, |max| e.start < max))
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.start);
        matching.truncate(query.max_results as usize);
        Ok(matching)
    }

    async fn create_event(&self, event: &NewEvent) -> anyhow::Result<CalendarEntry> {
        let start = to_utc(&event.start_time, &event.timezone)?;
        let end = to_utc(&event.end_time, &event.timezone)?;
        anyhow::ensure!(end > start, "event must end after it starts");

        let entry = CalendarEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: event.summary.clone(),
            start,
            end,
            timezone: Some(event.timezone.clone()),
            description: event.description.clone(),
            location: event.location.clone(),
        };
        self.events.lock().await.push(entry.clone());
        tracing::info!(id = %entry.id, title = %entry.title, "created event");
        Ok(entry)
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> anyhow::Result<CalendarEntry> {
        let mut events = self.events.lock().await;
        let entry = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .with_context(|| format!("event not found: {event_id}"))?;

        let zone = patch
            .timezone
            .clone()
            .or_else(|| entry.timezone.clone())
            .unwrap_or_else(|| "UTC".to_string());

        let start = patch.start_time.as_ref().map(|t| to_utc(t, &zone)).transpose()?;
        let end = patch.end_time.as_ref().map(|t| to_utc(t, &zone)).transpose()?;

        if let Some(summary) = &patch.summary {
            entry.title = summary.clone();
        }
        if let Some(start) = start {
            entry.start = start;
        }
        if let Some(end) = end {
            entry.end = end;
        }
        if patch.timezone.is_some() {
            entry.timezone = Some(zone);
        }
        if let Some(description) = &patch.description {
            entry.description = Some(description.clone());
        }
        if let Some(location) = &patch.location {
            entry.location = Some(location.clone());
        }

        tracing::info!(id = %entry.id, "updated event");
        Ok(entry.clone())
    }

    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()> {
        let mut events = self.events.lock().await;
        let before = events.len();
        events.retain(|e| e.id != event_id);
        anyhow::ensure!(events.len() < before, "event not found: {event_id}");
        tracing::info!(id = %event_id, "deleted event");
        Ok(())
    }
}
