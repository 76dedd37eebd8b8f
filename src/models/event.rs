use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A calendar event as observed in a backend response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEntry {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Identity of a real-world event: same title, same start, same end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    title: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl CalendarEntry {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            title: normalize_title(&self.title),
            start: self.start,
            end: self.end,
        }
    }

    /// Half-open overlap: an entry ending exactly when the range starts is free.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }

    /// The purpose appears in the title, or the whole title appears in the
    /// purpose as complete words ("Ramesh" for "meet with Ramesh").
    pub fn matches_purpose(&self, purpose: &str) -> bool {
        let title = normalize_title(&self.title);
        let purpose = normalize_title(purpose);
        if title.is_empty() || purpose.is_empty() {
            return false;
        }
        title.contains(&purpose) || contains_words(&purpose, &title)
    }
}

fn contains_words(haystack: &str, needle: &str) -> bool {
    let words: Vec<&str> = needle.split(' ').collect();
    let hay: Vec<&str> = haystack.split(' ').collect();
    hay.windows(words.len()).any(|w| w == words.as_slice())
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse a backend timestamp into an instant.
///
/// Accepts RFC 3339 with `Z` or an offset, a naive local date-time read in
/// `zone` (UTC when absent or unknown), or a bare all-day date.
pub fn parse_instant(raw: &str, zone: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let tz: Tz = zone.and_then(|z| z.parse().ok()).unwrap_or(Tz::UTC);
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
