use chrono::{DateTime, Utc};

use crate::models::CalendarEntry;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulingError {
    Conflict { with: CalendarEntry },
    EndsBeforeStart,
}

impl std::fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingError::Conflict { with } => {
                write!(f, "That time overlaps with \"{}\".", with.title)
            }
            SchedulingError::EndsBeforeStart => {
                write!(f, "That meeting would end before it starts.")
            }
        }
    }
}

/// Check a proposed `[start, end)` slot against already-listed entries.
///
/// `ignore_id` skips the event being moved when rescheduling, so a meeting
/// never conflicts with its own old slot.
pub fn validate_slot(
    entries: &[CalendarEntry],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    ignore_id: Option<&str>,
) -> Result<(), SchedulingError> {
    if end <= start {
        return Err(SchedulingError::EndsBeforeStart);
    }

    for entry in entries {
        if ignore_id == Some(entry.id.as_str()) {
            continue;
        }
        if entry.overlaps(start, end) {
            return Err(SchedulingError::Conflict {
                with: entry.clone(),
            });
        }
    }

    Ok(())
}
