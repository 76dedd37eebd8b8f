use std::collections::HashMap;

use crate::models::CalendarEntry;

/// Collapse entries that describe the same real-world event.
///
/// First occurrence wins: it keeps its identifier and its position, and only
/// picks up optional details (description, location, timezone) it was
/// missing from the later copies.
pub fn collapse(entries: Vec<CalendarEntry>) -> Vec<CalendarEntry> {
    let mut seen = HashMap::new();
    let mut out: Vec<CalendarEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        let key = entry.dedup_key();
        match seen.get(&key).copied() {
            Some(idx) => {
                let kept: &mut CalendarEntry = &mut out[idx];
                tracing::debug!(kept = %kept.id, dropped = %entry.id, "collapsed duplicate event");
                if kept.description.is_none() {
                    kept.description = entry.description;
                }
                if kept.location.is_none() {
                    kept.location = entry.location;
                }
                if kept.timezone.is_none() {
                    kept.timezone = entry.timezone;
                }
            }
            None => {
                seen.insert(key, out.len());
                out.push(entry);
            }
        }
    }

    out
}
