use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use super::CalendarBackend;
use crate::models::event::parse_instant;
use crate::models::{CalendarEntry, EventPatch, ListQuery, NewEvent};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar v3 over REST. Obtaining the access token is left to
/// whatever deploys the service.
pub struct GoogleCalendar {
    calendar_id: String,
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleCalendar {
    pub fn new(calendar_id: String, access_token: String) -> Self {
        Self {
            calendar_id,
            access_token,
            base_url: API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// `.../calendars/{calendar}/events[/{event}]` with each id
    /// percent-encoded as a single path segment.
    fn events_url(&self, event_id: Option<&str>) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url).context("invalid Google Calendar base url")?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow::anyhow!("Google Calendar base url cannot carry a path"))?;
            segments
                .pop_if_empty()
                .extend(["calendars", self.calendar_id.as_str(), "events"]);
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> anyhow::Result<Value> {
        let resp = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("failed to call Google Calendar ({what})"))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let data: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse Google Calendar response ({what})"))?;

        if !status.is_success() {
            anyhow::bail!("Google Calendar error ({}): {}", status, data);
        }
        Ok(data)
    }
}

fn time_body(local: &chrono::NaiveDateTime, zone: &str) -> Value {
    json!({
        "dateTime": local.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "timeZone": zone,
    })
}

/// Normalize one Google event resource. Timed events carry `dateTime`,
/// all-day events only `date`.
pub fn parse_google_event(value: &Value) -> Option<CalendarEntry> {
    let id = value["id"].as_str()?.to_string();
    let bound = |key: &str| {
        let node = &value[key];
        let zone = node["timeZone"].as_str();
        node["dateTime"]
            .as_str()
            .or_else(|| node["date"].as_str())
            .and_then(|raw| parse_instant(raw, zone))
    };

    Some(CalendarEntry {
        id,
        title: value["summary"].as_str().unwrap_or("No title").to_string(),
        start: bound("start")?,
        end: bound("end")?,
        timezone: value["start"]["timeZone"].as_str().map(str::to_string),
        description: value["description"].as_str().map(str::to_string),
        location: value["location"].as_str().map(str::to_string),
    })
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    async fn list_events(&self, query: &ListQuery) -> anyhow::Result<Vec<CalendarEntry>> {
        let now = Utc::now();
        let time_min = query.time_min.unwrap_or(now);
        let time_max = query.time_max.unwrap_or(now + Duration::days(30));

        let request = self.client.get(self.events_url(None)?).query(&[
            ("timeMin", time_min.to_rfc3339()),
            ("timeMax", time_max.to_rfc3339()),
            ("maxResults", query.max_results.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ]);
        let data = self.send(request, "list").await?;

        let items = data["items"].as_array().cloned().unwrap_or_default();
        let entries: Vec<CalendarEntry> = items.iter().filter_map(parse_google_event).collect();
        if entries.len() < items.len() {
            tracing::warn!(
                skipped = items.len() - entries.len(),
                "skipped calendar items without usable times"
            );
        }
        Ok(entries)
    }

    async fn create_event(&self, event: &NewEvent) -> anyhow::Result<CalendarEntry> {
        let mut body = json!({
            "summary": event.summary,
            "start": time_body(&event.start_time, &event.timezone),
            "end": time_body(&event.end_time, &event.timezone),
        });
        if let Some(description) = &event.description {
            body["description"] = json!(description);
        }
        if let Some(location) = &event.location {
            body["location"] = json!(location);
        }

        let request = self
            .client
            .post(self.events_url(None)?)
            .query(&[("sendUpdates", "none")])
            .json(&body);
        let data = self.send(request, "create").await?;
        parse_google_event(&data).context("created event missing id or times")
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> anyhow::Result<CalendarEntry> {
        let zone = patch.timezone.clone().unwrap_or_else(|| "UTC".to_string());
        let mut body = json!({});
        if let Some(summary) = &patch.summary {
            body["summary"] = json!(summary);
        }
        if let Some(start) = &patch.start_time {
            body["start"] = time_body(start, &zone);
        }
        if let Some(end) = &patch.end_time {
            body["end"] = time_body(end, &zone);
        }
        if let Some(description) = &patch.description {
            body["description"] = json!(description);
        }
        if let Some(location) = &patch.location {
            body["location"] = json!(location);
        }

        let request = self
            .client
            .patch(self.events_url(Some(event_id))?)
            .json(&body);
        let data = self.send(request, "update").await?;
        parse_google_event(&data).context("updated event missing id or times")
    }

    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()> {
        let request = self.client.delete(self.events_url(Some(event_id))?);
        self.send(request, "delete").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_encoded_as_single_segments() {
        let cal = GoogleCalendar::new(
            "en.usa#holiday@group.v.calendar.google.com".to_string(),
            "token".to_string(),
        );
        assert_eq!(
            cal.events_url(None).unwrap().as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/en.usa%23holiday@group.v.calendar.google.com/events"
        );
        let url = cal.events_url(Some("abc/../x?y#z")).unwrap();
        assert!(url.as_str().ends_with("/events/abc%2F..%2Fx%3Fy%23z"), "{url}");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_parse_timed_event() {
        let value = json!({
            "id": "abc",
            "summary": "Meeting with Ayush",
            "start": {"dateTime": "2025-07-03T15:30:00+05:30", "timeZone": "Asia/Kolkata"},
            "end": {"dateTime": "2025-07-03T16:30:00+05:30", "timeZone": "Asia/Kolkata"},
            "location": "Room 4"
        });
        let entry = parse_google_event(&value).unwrap();
        assert_eq!(entry.id, "abc");
        assert_eq!(entry.start, parse_instant("2025-07-03T10:00:00Z", None).unwrap());
        assert_eq!(entry.timezone.as_deref(), Some("Asia/Kolkata"));
        assert_eq!(entry.location.as_deref(), Some("Room 4"));
        assert!(entry.description.is_none());
    }

    #[test]
    fn test_parse_all_day_event_without_title() {
        let value = json!({
            "id": "day1",
            "start": {"date": "2025-07-04"},
            "end": {"date": "2025-07-05"}
        });
        let entry = parse_google_event(&value).unwrap();
        assert_eq!(entry.title, "No title");
        assert_eq!(entry.end - entry.start, Duration::days(1));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(parse_google_event(&json!({"summary": "x"})).is_none());
        assert!(parse_google_event(&json!({"id": "x", "start": {}, "end": {}})).is_none());
    }
}
