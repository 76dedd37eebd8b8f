//! Two independent renderings of one planner response: a casual line for
//! the person, and the command text for the machine side.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::models::{
    BackendCommand, BackendOutcome, CalendarEntry, Field, IntentRecord, PendingAction,
    ReplyEnvelope,
};
use crate::services::planner::Response;
use crate::services::time;

const SUMMARY_LIMIT: usize = 5;

/// Everything a renderer may look at for one turn.
pub struct TurnView<'a> {
    pub response: &'a Response,
    pub record: &'a IntentRecord,
    /// Last command issued or attempted during the turn.
    pub command: Option<&'a BackendCommand>,
    /// Confirmation still open after the turn, if any.
    pub pending: Option<&'a PendingAction>,
    pub now: DateTime<Utc>,
    pub zone: Tz,
}

pub fn envelope(view: &TurnView) -> ReplyEnvelope {
    ReplyEnvelope {
        casual: casual(view),
        system: system(view),
        insight: view.record.clone(),
    }
}

pub fn system(view: &TurnView) -> String {
    view.command.map(|c| c.to_string()).unwrap_or_default()
}

pub fn casual(view: &TurnView) -> String {
    match view.response {
        Response::Chat(message) if !message.trim().is_empty() => message.clone(),
        Response::Chat(_) => "How can I help with your calendar?".to_string(),
        Response::AskFor(fields) => ask_for(fields),
        Response::Clarify(_) => {
            "Just to be sure, what time exactly? Something like \"3pm\" or \"15:00\" works.".to_string()
        }
        Response::Schedule { date, events } => schedule_summary(*date, events, view),
        Response::SlotTaken { conflict } => format!(
            "You already have \"{}\" {}. Want to pick another time?",
            conflict.title,
            time::to_display(conflict.start, view.zone, view.now)
        ),
        Response::NotFound => match &view.record.purpose {
            Some(purpose) => format!("I couldn't find \"{purpose}\" on your calendar."),
            None => "I couldn't find that event on your calendar.".to_string(),
        },
        Response::WhichOne(entries) => {
            let mut lines = vec!["I found a few matches:".to_string()];
            lines.extend(entries.iter().take(SUMMARY_LIMIT).map(|e| entry_line(e, view)));
            lines.push("Which one did you mean?".to_string());
            lines.join("\n")
        }
        Response::Confirm(action) => confirmation_question(action, view),
        Response::Done(outcome) => done(outcome, view),
        Response::Dropped => "No problem, I won't change anything.".to_string(),
        Response::Exhausted => {
            "Sorry, I couldn't pin that down in one go. Could you name the exact day or event?".to_string()
        }
        Response::Unavailable => {
            let mut text =
                "I'm having trouble accessing your calendar right now, retrying shortly.".to_string();
            if let Some(action) = view.pending {
                text.push(' ');
                text.push_str(&confirmation_question(action, view));
            }
            text
        }
    }
}

fn ask_for(fields: &[Field]) -> String {
    let parts: Vec<&str> = fields
        .iter()
        .map(|f| match f {
            Field::Date => "which day",
            Field::Time => "what time",
            Field::Purpose => "what it's for",
        })
        .collect();
    match parts.as_slice() {
        [] => "Could you tell me a bit more?".to_string(),
        [only] => format!("Sure! Could you tell me {only}?"),
        [init @ .., last] => format!("Sure! Could you tell me {} and {last}?", init.join(", ")),
    }
}

/// Day summary: first few events as "- title at time", then a count of the rest.
pub fn schedule_summary(date: NaiveDate, events: &[CalendarEntry], view: &TurnView) -> String {
    let day = time::format_day(date, today(view));
    if events.is_empty() {
        return format!("You're totally free {}! No events found.", day_phrase(&day));
    }

    let mut lines = vec![format!("Here's what you have {}:", day_phrase(&day))];
    lines.extend(
        events
            .iter()
            .take(SUMMARY_LIMIT)
            .map(|e| format!("- {} at {}", e.title, time::format_clock(e.start, view.zone))),
    );
    if events.len() > SUMMARY_LIMIT {
        lines.push(format!("...and {} more", events.len() - SUMMARY_LIMIT));
    }
    lines.join("\n")
}

fn entry_line(entry: &CalendarEntry, view: &TurnView) -> String {
    format!("- {} {}", entry.title, time::to_display(entry.start, view.zone, view.now))
}

fn confirmation_question(action: &PendingAction, view: &TurnView) -> String {
    match (&action.command, &action.target) {
        (BackendCommand::Create(event), _) => {
            let length = event.end_time - event.start_time;
            format!(
                "Shall I book \"{}\" {} for {}?",
                event.summary,
                local_display(&event.start_time, view),
                time::format_duration(length)
            )
        }
        (BackendCommand::Update { patch, .. }, Some(target)) => match &patch.start_time {
            Some(start) => format!(
                "Shall I move \"{}\" from {} to {}?",
                target.title,
                time::to_display(target.start, view.zone, view.now),
                local_display(start, view)
            ),
            None => format!("Shall I update \"{}\"?", target.title),
        },
        (BackendCommand::Delete { .. }, Some(target)) => format!(
            "Shall I cancel \"{}\" {}?",
            target.title,
            time::to_display(target.start, view.zone, view.now)
        ),
        (command, _) => format!("Shall I go ahead with {}?", command.name()),
    }
}

fn done(outcome: &BackendOutcome, view: &TurnView) -> String {
    match outcome {
        BackendOutcome::Created { event } => format!(
            "Done! \"{}\" is booked {}.",
            event.title,
            time::to_display(event.start, view.zone, view.now)
        ),
        BackendOutcome::Updated { event } => format!(
            "Done! \"{}\" now starts {}.",
            event.title,
            time::to_display(event.start, view.zone, view.now)
        ),
        BackendOutcome::Deleted { .. } => match &view.record.purpose {
            Some(purpose) => format!("Done! \"{purpose}\" has been cancelled."),
            None => "Done! The event has been cancelled.".to_string(),
        },
        BackendOutcome::Listed { events, .. } => format!("Found {} events.", events.len()),
    }
}

/// Local wall-clock display for commands, which carry naive times already
/// in the user's zone.
fn local_display(local: &NaiveDateTime, view: &TurnView) -> String {
    let day = time::format_day(local.date(), today(view));
    format!("{} at {}", day_phrase(&day), local.format("%-I:%M %p"))
}

fn day_phrase(day: &str) -> String {
    match day {
        "today" | "tomorrow" => day.to_string(),
        other => format!("on {other}"),
    }
}

fn today(view: &TurnView) -> NaiveDate {
    view.now.with_timezone(&view.zone).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::parse_instant;
    use crate::models::{Intent, NewEvent};

    fn entry(title: &str, start: &str) -> CalendarEntry {
        let start = parse_instant(start, None).unwrap();
        CalendarEntry {
            id: title.to_lowercase(),
            title: title.to_string(),
            start,
            end: start + chrono::Duration::hours(1),
            timezone: None,
            description: None,
            location: None,
        }
    }

    fn render(response: &Response, record: &IntentRecord) -> String {
        let view = TurnView {
            response,
            record,
            command: None,
            pending: None,
            now: parse_instant("2025-07-03T10:00:00Z", None).unwrap(),
            zone: Tz::Asia__Kolkata,
        };
        casual(&view)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    #[test]
    fn test_free_day() {
        let text = render(&Response::Schedule { date: date(3), events: vec![] }, &IntentRecord::default());
        assert_eq!(text, "You're totally free today! No events found.");
    }

    #[test]
    fn test_summary_lists_title_and_local_time() {
        let events = vec![entry("Meeting with Ayush", "2025-07-03T10:00:00Z")];
        let text = render(&Response::Schedule { date: date(3), events }, &IntentRecord::default());
        assert_eq!(text, "Here's what you have today:\n- Meeting with Ayush at 3:30 PM");
    }

    #[test]
    fn test_summary_truncates_long_days() {
        let events: Vec<CalendarEntry> = (0..7)
            .map(|i| entry(&format!("Slot {i}"), &format!("2025-07-04T0{i}:00:00Z")))
            .collect();
        let text = render(&Response::Schedule { date: date(4), events }, &IntentRecord::default());
        assert!(text.starts_with("Here's what you have tomorrow:"));
        assert_eq!(text.lines().filter(|l| l.starts_with("- ")).count(), 5);
        assert!(text.ends_with("...and 2 more"));
    }

    #[test]
    fn test_ask_for_joins_fields() {
        let text = render(&Response::AskFor(vec![Field::Date, Field::Time]), &IntentRecord::default());
        assert_eq!(text, "Sure! Could you tell me which day and what time?");
    }

    #[test]
    fn test_confirmation_names_event_and_slot() {
        let start = NaiveDateTime::parse_from_str("2025-07-03T21:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        let action = PendingAction {
            command: BackendCommand::Create(NewEvent {
                summary: "Meet with Ramesh".to_string(),
                start_time: start,
                end_time: start + chrono::Duration::minutes(30),
                timezone: "Asia/Kolkata".to_string(),
                description: None,
                location: None,
            }),
            target: None,
        };
        let text = render(&Response::Confirm(action), &IntentRecord::for_intent(Intent::Book));
        assert_eq!(text, "Shall I book \"Meet with Ramesh\" today at 9:00 PM for 30 mins?");
    }

    #[test]
    fn test_unavailable_hides_backend_detail() {
        let text = render(&Response::Unavailable, &IntentRecord::default());
        assert!(text.contains("trouble accessing your calendar"));
        assert!(!text.to_lowercase().contains("error"));
    }

    #[test]
    fn test_system_channel_is_command_text() {
        let command = BackendCommand::Delete { event_id: "evt_1".to_string() };
        let record = IntentRecord::default();
        let response = Response::Dropped;
        let view = TurnView {
            response: &response,
            record: &record,
            command: Some(&command),
            pending: None,
            now: Utc::now(),
            zone: Tz::UTC,
        };
        assert_eq!(system(&view), "delete_event(\"evt_1\")");
        assert_eq!(envelope(&view).casual, "No problem, I won't change anything.");
    }
}
