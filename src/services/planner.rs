//! Per-turn command planner.
//!
//! The planner never talks to the backend itself. It hands out one
//! [`Decision`] at a time; when that is a command, the caller executes it and
//! feeds the outcome back through [`Planner::ingest`] before asking again.
//! That keeps the confirmation gate and the command ceiling in one place
//! where both can be checked without any I/O.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::errors::DispatchError;
use crate::models::{
    BackendCommand, BackendOutcome, CalendarEntry, EventPatch, ExtractedIntent, Field, Intent,
    IntentRecord, ListQuery, NewEvent, PendingAction, Session,
};
use crate::services::dedup;
use crate::services::scheduling::{validate_slot, SchedulingError};
use crate::services::time;

pub const MAX_COMMANDS_PER_TURN: usize = 3;
const LOOKUP_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    Idle,
    NeedData,
    HaveData,
    ReadyToAct,
    AwaitingConfirmation,
    Committed,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Affirmative,
    Negative,
    Unclear,
}

/// What the turn should tell the user once planning stops.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Chat(String),
    AskFor(Vec<Field>),
    Clarify(String),
    Schedule {
        date: NaiveDate,
        events: Vec<CalendarEntry>,
    },
    SlotTaken {
        conflict: CalendarEntry,
    },
    NotFound,
    WhichOne(Vec<CalendarEntry>),
    Confirm(PendingAction),
    Done(BackendOutcome),
    Dropped,
    Exhausted,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Issue(BackendCommand),
    Respond(Response),
}

#[derive(Debug, Clone)]
enum Waiting {
    Day(NaiveDate),
    Search(ListQuery),
    Mutation,
}

/// Everything returned by a lookup over several days, kept so a reschedule
/// can check the new slot without listing again.
#[derive(Debug, Clone)]
struct Window {
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    events: Vec<CalendarEntry>,
}

#[derive(Debug)]
pub struct Planner {
    record: IntentRecord,
    state: PlannerState,
    now: DateTime<Utc>,
    zone: Tz,
    chat: String,
    clarify: Option<String>,
    abandoned: bool,
    issued: usize,
    waiting: Option<Waiting>,
    confirmed: Option<PendingAction>,
    pending: Option<PendingAction>,
    day: Option<(NaiveDate, Vec<CalendarEntry>)>,
    window: Option<Window>,
    hits: Vec<CalendarEntry>,
    next_page: Option<ListQuery>,
    target: Option<CalendarEntry>,
    done: Option<BackendOutcome>,
}

const AFFIRMATIVE_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "y", "sure", "ok", "okay", "confirm", "confirmed", "correct",
    "absolutely", "definitely", "perfect",
];
const AFFIRMATIVE_PHRASES: &[&str] = &[
    "go ahead", "do it", "sounds good", "please do", "book it", "that works", "looks good",
];
const NEGATIVE_WORDS: &[&str] = &[
    "no", "nope", "nah", "don't", "dont", "not", "stop", "wait", "never", "nevermind",
];
const NEGATIVE_PHRASES: &[&str] = &["never mind", "hold on", "forget it"];

/// Word-level read of a confirmation reply. Anything mixing yes and no
/// signals is unclear, never affirmative.
pub fn classify_reply(message: &str) -> ReplyKind {
    let lowered = message.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let joined = format!(" {} ", words.join(" "));
    let has_phrase = |phrases: &[&str]| phrases.iter().any(|p| joined.contains(&format!(" {p} ")));

    let yes = words.iter().any(|w| AFFIRMATIVE_WORDS.contains(w)) || has_phrase(AFFIRMATIVE_PHRASES);
    let no = words.iter().any(|w| NEGATIVE_WORDS.contains(w)) || has_phrase(NEGATIVE_PHRASES);

    match (yes, no) {
        (true, false) => ReplyKind::Affirmative,
        (false, true) => ReplyKind::Negative,
        _ => ReplyKind::Unclear,
    }
}

impl Planner {
    /// Fold the user's latest message into the session's record and pick
    /// the starting state for this turn.
    pub fn begin(
        session: &Session,
        extracted: &ExtractedIntent,
        message: &str,
        now: DateTime<Utc>,
        zone: Tz,
    ) -> Self {
        let mut planner = Planner {
            record: session.record.clone(),
            state: PlannerState::Idle,
            now,
            zone,
            chat: extracted.message_to_user.clone(),
            clarify: None,
            abandoned: false,
            issued: 0,
            waiting: None,
            confirmed: None,
            pending: None,
            day: None,
            window: None,
            hits: vec![],
            next_page: None,
            target: None,
            done: None,
        };

        let switching = match (session.record.intent, extracted.intent) {
            (Some(current), Some(requested)) => current != requested,
            _ => false,
        };

        if let Some(pending) = &session.pending {
            if switching {
                tracing::info!(
                    conversation = %session.id,
                    from = ?session.record.intent,
                    to = ?extracted.intent,
                    "new request while awaiting confirmation, declining pending action"
                );
                planner.state = PlannerState::Declined;
                planner.start_fresh(extracted);
                return planner;
            }

            // the model often echoes stored fields back; only a real change corrects
            let (revised, clarify) = planner.revised(extracted);
            let corrects = clarify.is_some() || revised != planner.record;

            match classify_reply(message) {
                ReplyKind::Affirmative if !corrects => {
                    planner.state = PlannerState::AwaitingConfirmation;
                    planner.confirmed = Some(pending.clone());
                }
                ReplyKind::Unclear if !corrects => {
                    planner.state = PlannerState::AwaitingConfirmation;
                    planner.pending = Some(pending.clone());
                }
                _ => {
                    planner.state = PlannerState::Declined;
                    if corrects {
                        planner.record = revised;
                        planner.clarify = clarify;
                    } else {
                        planner.abandoned = true;
                        planner.record = IntentRecord::default();
                    }
                }
            }
            return planner;
        }

        if switching || (session.record.commit && extracted.has_details()) {
            planner.start_fresh(extracted);
        } else {
            if planner.record.intent.is_none() {
                planner.record.intent = extracted.intent;
            }
            planner.apply_details(extracted);
        }
        planner
    }

    fn start_fresh(&mut self, extracted: &ExtractedIntent) {
        self.record = match extracted.intent.or(self.record.intent) {
            Some(intent) => IntentRecord::for_intent(intent),
            None => IntentRecord::default(),
        };
        self.apply_details(extracted);
    }

    fn apply_details(&mut self, extracted: &ExtractedIntent) {
        let (record, clarify) = self.revised(extracted);
        self.record = record;
        if clarify.is_some() {
            self.clarify = clarify;
        }
    }

    /// The record with the extracted details folded in, plus the reason a
    /// time phrase could not be read, if one could not.
    fn revised(&self, extracted: &ExtractedIntent) -> (IntentRecord, Option<String>) {
        let mut record = self.record.clone();
        let mut clarify = None;
        if let Some(when) = &extracted.when {
            match time::resolve_phrase(when, self.now, self.zone) {
                Ok(resolved) => {
                    if let Some(date) = resolved.date {
                        record.date = Some(date);
                    }
                    if let Some(t) = resolved.time {
                        record.time = Some(t);
                        if record.date.is_none() {
                            record.date = Some(self.today());
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(phrase = %when, error = %e, "could not resolve time phrase");
                    clarify = Some(e.to_string());
                }
            }
        }
        if let Some(duration) = &extracted.duration {
            match time::parse_duration(duration) {
                Some(length) => record.duration = Some(time::format_duration(length)),
                None => tracing::debug!(%duration, "ignoring unreadable meeting length"),
            }
        }
        if let Some(purpose) = &extracted.purpose {
            record.purpose = Some(purpose.clone());
        }
        (record, clarify)
    }

    pub fn record(&self) -> &IntentRecord {
        &self.record
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Final record plus whatever mutation should wait for the next turn.
    pub fn into_parts(self) -> (IntentRecord, Option<PendingAction>) {
        (self.record, self.pending)
    }

    /// Next step for this turn. The record is re-validated after every
    /// decision so a dropped field surfaces here rather than in a reply.
    pub fn decide(&mut self) -> Result<Decision, DispatchError> {
        let decision = self.transition()?;
        self.record.validate()?;
        tracing::debug!(state = ?self.state, issued = self.issued, "planner decision");
        Ok(decision)
    }

    pub fn ingest(&mut self, outcome: BackendOutcome) -> Result<(), DispatchError> {
        match (self.waiting.take(), outcome) {
            (Some(Waiting::Day(date)), BackendOutcome::Listed { events, .. }) => {
                self.day = Some((date, events));
                self.state = PlannerState::HaveData;
            }
            (Some(Waiting::Search(query)), BackendOutcome::Listed { events, fetched }) => {
                let purpose = self.record.purpose.clone().unwrap_or_default();
                self.hits
                    .extend(events.iter().filter(|e| e.matches_purpose(&purpose)).cloned());
                // duplicates are already gone, so a full page is judged on raw rows
                let full_page = fetched >= query.max_results as usize;
                self.next_page = match (full_page, events.last()) {
                    (true, Some(last)) => last
                        .start
                        .checked_add_signed(Duration::seconds(1))
                        .map(|from| ListQuery {
                            time_min: Some(from),
                            ..query.clone()
                        }),
                    _ => None,
                };
                let until = query.time_max.unwrap_or_else(|| self.lookup_end());
                match &mut self.window {
                    Some(window) => window.events.extend(events),
                    None => {
                        self.window = Some(Window {
                            from: query.time_min.unwrap_or(self.now),
                            until,
                            events,
                        })
                    }
                }
                self.state = PlannerState::HaveData;
            }
            (
                Some(Waiting::Mutation),
                outcome @ (BackendOutcome::Created { .. }
                | BackendOutcome::Updated { .. }
                | BackendOutcome::Deleted { .. }),
            ) => {
                self.record.commit = true;
                self.pending = None;
                self.done = Some(outcome);
                self.state = PlannerState::Committed;
            }
            (waiting, outcome) => {
                return Err(DispatchError::BackendUnavailable(format!(
                    "unexpected backend outcome {outcome:?} while waiting for {waiting:?}"
                )))
            }
        }
        self.record.validate()
    }

    fn transition(&mut self) -> Result<Decision, DispatchError> {
        if self.waiting.is_some() {
            return Err(DispatchError::BackendUnavailable(
                "planner resumed before the backend answered".to_string(),
            ));
        }
        loop {
            match self.state {
                PlannerState::Idle => {
                    if let Some(reason) = self.clarify.take() {
                        return Ok(Decision::Respond(Response::Clarify(reason)));
                    }
                    return self.plan_from_idle();
                }
                PlannerState::NeedData => {
                    return Err(DispatchError::BackendUnavailable(
                        "no listing received".to_string(),
                    ))
                }
                PlannerState::HaveData => return self.plan_from_data(),
                PlannerState::ReadyToAct => return self.request_confirmation(),
                PlannerState::AwaitingConfirmation => {
                    if let Some(action) = self.confirmed.take() {
                        return self.issue(action.command, Waiting::Mutation);
                    }
                    match &self.pending {
                        Some(action) => {
                            return Ok(Decision::Respond(Response::Confirm(action.clone())))
                        }
                        None => self.state = PlannerState::Idle,
                    }
                }
                PlannerState::Committed => {
                    let response = match self.done.clone() {
                        Some(outcome) => Response::Done(outcome),
                        None => Response::Chat(self.chat.clone()),
                    };
                    return Ok(Decision::Respond(response));
                }
                PlannerState::Declined => {
                    if self.abandoned {
                        return Ok(Decision::Respond(Response::Dropped));
                    }
                    self.state = PlannerState::Idle;
                }
            }
        }
    }

    fn plan_from_idle(&mut self) -> Result<Decision, DispatchError> {
        let Some(intent) = self.record.intent else {
            return Ok(Decision::Respond(Response::Chat(self.chat.clone())));
        };
        if self.record.commit {
            // already done; only a new request reopens the record
            return Ok(Decision::Respond(Response::Chat(self.chat.clone())));
        }

        match intent {
            Intent::Check => {
                let date = *self.record.date.get_or_insert(self.now.with_timezone(&self.zone).date_naive());
                self.list_day(date, None)
            }
            Intent::Book => {
                let missing = self.record.missing_fields(Intent::Book);
                match (missing.is_empty(), self.record.date) {
                    (true, Some(date)) => {
                        let until = self.slot()?.map(|(_, end)| end);
                        self.list_day(date, until)
                    }
                    _ => Ok(Decision::Respond(Response::AskFor(missing))),
                }
            }
            Intent::Cancel | Intent::Reschedule => {
                if self.record.purpose.is_none() {
                    return Ok(Decision::Respond(Response::AskFor(vec![Field::Purpose])));
                }
                if intent == Intent::Reschedule {
                    let missing: Vec<Field> = self
                        .record
                        .missing_fields(intent)
                        .into_iter()
                        .filter(|f| *f != Field::Purpose)
                        .collect();
                    if !missing.is_empty() {
                        return Ok(Decision::Respond(Response::AskFor(missing)));
                    }
                }
                let query = self.search_query(intent)?;
                self.issue(BackendCommand::List(query.clone()), Waiting::Search(query))
            }
        }
    }

    fn plan_from_data(&mut self) -> Result<Decision, DispatchError> {
        let Some(intent) = self.record.intent else {
            return Ok(Decision::Respond(Response::Chat(self.chat.clone())));
        };
        match intent {
            Intent::Check => {
                let (date, events) = self.day.clone().unwrap_or_else(|| (self.today(), vec![]));
                Ok(Decision::Respond(Response::Schedule { date, events }))
            }
            Intent::Book => self.check_slot(None),
            Intent::Cancel | Intent::Reschedule => {
                if self.target.is_none() {
                    if let Some(decision) = self.resolve_target(intent)? {
                        return Ok(decision);
                    }
                }
                if intent == Intent::Cancel {
                    self.state = PlannerState::ReadyToAct;
                    return self.request_confirmation();
                }
                let ignore = self.target.as_ref().map(|t| t.id.clone());
                self.check_slot(ignore.as_deref())
            }
        }
    }

    /// Narrow lookup hits to a single event, paging forward when a full
    /// page came back without a match.
    fn resolve_target(&mut self, intent: Intent) -> Result<Option<Decision>, DispatchError> {
        let mut hits = dedup::collapse(std::mem::take(&mut self.hits));

        if hits.len() > 1 && intent == Intent::Cancel {
            if let Some(wanted) = self.record.time {
                let zone = self.zone;
                let narrowed: Vec<CalendarEntry> = hits
                    .iter()
                    .filter(|e| e.start.with_timezone(&zone).time() == wanted)
                    .cloned()
                    .collect();
                if !narrowed.is_empty() {
                    hits = narrowed;
                }
            }
        }

        match hits.len() {
            0 => match self.next_page.take() {
                Some(next) => self
                    .issue(BackendCommand::List(next.clone()), Waiting::Search(next))
                    .map(Some),
                None => Ok(Some(Decision::Respond(Response::NotFound))),
            },
            1 => {
                let target = hits.remove(0);
                if intent == Intent::Cancel {
                    let local = target.start.with_timezone(&self.zone);
                    self.record.date = Some(local.date_naive());
                    self.record.time.get_or_insert(local.time());
                }
                tracing::info!(id = %target.id, title = %target.title, "resolved target event");
                self.target = Some(target);
                Ok(None)
            }
            _ => Ok(Some(Decision::Respond(Response::WhichOne(hits)))),
        }
    }

    fn check_slot(&mut self, ignore_id: Option<&str>) -> Result<Decision, DispatchError> {
        let Some((start, end)) = self.slot()? else {
            let missing = self.record.missing_fields(Intent::Book);
            return Ok(Decision::Respond(Response::AskFor(missing)));
        };

        let Some(events) = self.events_covering(start, end) else {
            let date = start.with_timezone(&self.zone).date_naive();
            return self.list_day(date, Some(end));
        };

        match validate_slot(&events, start, end, ignore_id) {
            Ok(()) => {
                self.state = PlannerState::ReadyToAct;
                self.request_confirmation()
            }
            Err(SchedulingError::Conflict { with }) => {
                tracing::info!(conflict = %with.id, "requested slot is taken");
                Ok(Decision::Respond(Response::SlotTaken { conflict: with }))
            }
            Err(SchedulingError::EndsBeforeStart) => Ok(Decision::Respond(Response::Clarify(
                "meeting length must be positive".to_string(),
            ))),
        }
    }

    /// Listed events known to cover `[start, end)`, if any listing does.
    fn events_covering(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Vec<CalendarEntry>> {
        let date = start.with_timezone(&self.zone).date_naive();
        if let Some((listed, events)) = &self.day {
            if *listed == date {
                let mut all = events.clone();
                if let Some(window) = &self.window {
                    all.extend(window.events.iter().cloned());
                }
                return Some(all);
            }
        }
        match &self.window {
            Some(window) if self.next_page.is_none() && window.from <= start && window.until >= end => {
                Some(window.events.clone())
            }
            _ => None,
        }
    }

    fn request_confirmation(&mut self) -> Result<Decision, DispatchError> {
        let action = self.build_action()?;
        if self.record.duration.is_none() && self.record.intent == Some(Intent::Book) {
            self.record.duration = Some(time::format_duration(self.meeting_length()));
        }
        self.record.commit = false;
        self.pending = Some(action.clone());
        self.state = PlannerState::AwaitingConfirmation;
        Ok(Decision::Respond(Response::Confirm(action)))
    }

    fn build_action(&self) -> Result<PendingAction, DispatchError> {
        let intent = self
            .record
            .intent
            .ok_or_else(|| DispatchError::InvalidIntent("no intent to act on".to_string()))?;
        let no_target = || DispatchError::InvalidIntent("no event selected".to_string());

        match intent {
            Intent::Check => Err(DispatchError::InvalidIntent(
                "check has nothing to confirm".to_string(),
            )),
            Intent::Book => {
                let (start, end) = self.local_slot()?;
                let summary = self.record.purpose.clone().unwrap_or_default();
                Ok(PendingAction {
                    command: BackendCommand::Create(NewEvent {
                        summary,
                        start_time: start,
                        end_time: end,
                        timezone: self.zone.name().to_string(),
                        description: None,
                        location: None,
                    }),
                    target: None,
                })
            }
            Intent::Reschedule => {
                let target = self.target.clone().ok_or_else(no_target)?;
                let (start, end) = self.local_slot()?;
                Ok(PendingAction {
                    command: BackendCommand::Update {
                        event_id: target.id.clone(),
                        patch: EventPatch {
                            start_time: Some(start),
                            end_time: Some(end),
                            timezone: Some(self.zone.name().to_string()),
                            ..EventPatch::default()
                        },
                    },
                    target: Some(target),
                })
            }
            Intent::Cancel => {
                let target = self.target.clone().ok_or_else(no_target)?;
                Ok(PendingAction {
                    command: BackendCommand::Delete {
                        event_id: target.id.clone(),
                    },
                    target: Some(target),
                })
            }
        }
    }

    fn meeting_length(&self) -> Duration {
        self.record
            .duration
            .as_deref()
            .and_then(time::parse_duration)
            .or_else(|| self.target.as_ref().map(|t| t.end - t.start))
            .unwrap_or_else(|| Duration::minutes(time::DEFAULT_DURATION_MINUTES))
    }

    /// The requested slot as instants, once date and time are both known.
    fn slot(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, DispatchError> {
        let (Some(date), Some(t)) = (self.record.date, self.record.time) else {
            return Ok(None);
        };
        let start = time::localize(date, t, self.zone)?.with_timezone(&Utc);
        let end = start.checked_add_signed(self.meeting_length()).ok_or_else(|| {
            DispatchError::AmbiguousTime(format!("{date} {} runs past the calendar", t.format("%H:%M")))
        })?;
        Ok(Some((start, end)))
    }

    fn local_slot(&self) -> Result<(NaiveDateTime, NaiveDateTime), DispatchError> {
        let (start, end) = self
            .slot()?
            .ok_or_else(|| DispatchError::InvalidIntent("slot needs a date and a time".to_string()))?;
        Ok((
            start.with_timezone(&self.zone).naive_local(),
            end.with_timezone(&self.zone).naive_local(),
        ))
    }

    fn today(&self) -> NaiveDate {
        self.now.with_timezone(&self.zone).date_naive()
    }

    fn midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(chrono::NaiveTime::MIN);
        self.zone
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }

    fn list_day(&mut self, date: NaiveDate, until: Option<DateTime<Utc>>) -> Result<Decision, DispatchError> {
        let day_end = self.midnight(next_day(date)?);
        let query = ListQuery {
            time_min: Some(self.midnight(date)),
            time_max: Some(until.map_or(day_end, |u| u.max(day_end))),
            ..ListQuery::default()
        };
        self.issue(BackendCommand::List(query), Waiting::Day(date))
    }

    fn search_query(&self, intent: Intent) -> Result<ListQuery, DispatchError> {
        Ok(match (intent, self.record.date) {
            (Intent::Cancel, Some(date)) => ListQuery {
                time_min: Some(self.midnight(date)),
                time_max: Some(self.midnight(next_day(date)?)),
                ..ListQuery::default()
            },
            _ => ListQuery {
                time_min: Some(self.now),
                time_max: Some(self.lookup_end()),
                ..ListQuery::default()
            },
        })
    }

    fn lookup_end(&self) -> DateTime<Utc> {
        self.now
            .checked_add_signed(Duration::days(LOOKUP_WINDOW_DAYS))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn issue(&mut self, command: BackendCommand, waiting: Waiting) -> Result<Decision, DispatchError> {
        if self.issued >= MAX_COMMANDS_PER_TURN {
            tracing::warn!(
                issued = self.issued,
                command = command.name(),
                "command ceiling reached for this turn"
            );
            return Err(DispatchError::PlanningExhausted {
                issued: self.issued,
            });
        }
        self.issued += 1;
        if !matches!(waiting, Waiting::Mutation) {
            self.state = PlannerState::NeedData;
        }
        self.waiting = Some(waiting);
        Ok(Decision::Issue(command))
    }
}

fn next_day(date: NaiveDate) -> Result<NaiveDate, DispatchError> {
    date.succ_opt()
        .ok_or_else(|| DispatchError::AmbiguousTime(format!("{date} is the last day on the calendar")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::parse_instant;
    use chrono::NaiveTime;

    fn now() -> DateTime<Utc> {
        parse_instant("2025-07-03T10:00:00Z", None).unwrap()
    }

    fn session(record: IntentRecord, pending: Option<PendingAction>) -> Session {
        let mut s = Session::new("test", now(), Duration::minutes(30));
        s.record = record;
        s.pending = pending;
        s
    }

    fn extracted(intent: Option<Intent>, when: Option<&str>, duration: Option<&str>, purpose: Option<&str>) -> ExtractedIntent {
        ExtractedIntent {
            intent,
            when: when.map(str::to_string),
            duration: duration.map(str::to_string),
            purpose: purpose.map(str::to_string),
            message_to_user: String::new(),
        }
    }

    fn entry(id: &str, title: &str, start: &str, end: &str) -> CalendarEntry {
        CalendarEntry {
            id: id.to_string(),
            title: title.to_string(),
            start: parse_instant(start, None).unwrap(),
            end: parse_instant(end, None).unwrap(),
            timezone: None,
            description: None,
            location: None,
        }
    }

    fn listed(events: Vec<CalendarEntry>) -> BackendOutcome {
        let fetched = events.len();
        BackendOutcome::Listed { events, fetched }
    }

    fn local(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn test_classify_reply() {
        assert_eq!(classify_reply("yes"), ReplyKind::Affirmative);
        assert_eq!(classify_reply("Yes please!"), ReplyKind::Affirmative);
        assert_eq!(classify_reply("sounds good"), ReplyKind::Affirmative);
        assert_eq!(classify_reply("no"), ReplyKind::Negative);
        assert_eq!(classify_reply("don't"), ReplyKind::Negative);
        assert_eq!(classify_reply("never mind"), ReplyKind::Negative);
        assert_eq!(classify_reply("not sure"), ReplyKind::Unclear);
        assert_eq!(classify_reply("hmm"), ReplyKind::Unclear);
        assert_eq!(classify_reply("yes, no, wait"), ReplyKind::Unclear);
    }

    #[test]
    fn test_booking_flow_lists_then_confirms_then_commits() {
        // step 1: request arrives, planner needs the day's events first
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Book), Some("tonight 9pm"), Some("30 mins"), Some("Meet with Ramesh"));
        let mut planner = Planner::begin(&start, &request, "Meet with Ramesh tonight 9pm 30 mins", now(), Tz::UTC);

        let decision = planner.decide().unwrap();
        assert!(matches!(decision, Decision::Issue(BackendCommand::List(_))));
        assert_eq!(planner.state(), PlannerState::NeedData);
        assert!(!planner.record().commit);

        // step 2: slot is free, so ask before touching anything
        planner.ingest(listed(vec![])).unwrap();
        let decision = planner.decide().unwrap();
        let action = match decision {
            Decision::Respond(Response::Confirm(action)) => action,
            other => panic!("expected confirmation, got {other:?}"),
        };
        assert_eq!(planner.state(), PlannerState::AwaitingConfirmation);
        assert!(!planner.record().commit);
        assert_eq!(planner.issued(), 1);

        let (record, pending) = planner.into_parts();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 7, 3));
        assert_eq!(record.time, NaiveTime::from_hms_opt(21, 0, 0));
        assert_eq!(record.duration.as_deref(), Some("30 mins"));
        assert_eq!(pending.as_ref(), Some(&action));

        // step 3: user says yes, the create goes out and commit flips
        let waiting = session(record, pending);
        let yes = extracted(None, None, None, None);
        let mut planner = Planner::begin(&waiting, &yes, "yes", now(), Tz::UTC);
        let decision = planner.decide().unwrap();
        let event = match decision {
            Decision::Issue(BackendCommand::Create(event)) => event,
            other => panic!("expected create, got {other:?}"),
        };
        assert_eq!(event.start_time, local("2025-07-03T21:00:00"));
        assert_eq!(event.end_time, local("2025-07-03T21:30:00"));
        assert_eq!(event.summary, "Meet with Ramesh");
        assert!(!planner.record().commit);

        let created = entry("evt_9", "Meet with Ramesh", "2025-07-03T21:00:00Z", "2025-07-03T21:30:00Z");
        planner.ingest(BackendOutcome::Created { event: created }).unwrap();
        let decision = planner.decide().unwrap();
        assert!(matches!(decision, Decision::Respond(Response::Done(_))));
        assert_eq!(planner.state(), PlannerState::Committed);
        assert!(planner.record().commit);
        let (_, pending) = planner.into_parts();
        assert!(pending.is_none());
    }

    #[test]
    fn test_mutation_never_issued_on_ready_turn() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Book), Some("tomorrow 10am"), None, Some("Gym"));
        let mut planner = Planner::begin(&start, &request, "book gym tomorrow 10am", now(), Tz::UTC);
        planner.decide().unwrap();
        planner.ingest(listed(vec![])).unwrap();
        match planner.decide().unwrap() {
            Decision::Respond(Response::Confirm(_)) => {}
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(planner.record().duration.as_deref(), Some("1 hour"));
    }

    #[test]
    fn test_conflict_reports_slot_taken() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Book), Some("today 2pm"), Some("1 hour"), Some("Review"));
        let mut planner = Planner::begin(&start, &request, "review today 2pm", now(), Tz::UTC);
        planner.decide().unwrap();
        planner
            .ingest(listed(vec![entry("x", "Standup", "2025-07-03T14:30:00Z", "2025-07-03T15:00:00Z")]))
            .unwrap();
        match planner.decide().unwrap() {
            Decision::Respond(Response::SlotTaken { conflict }) => assert_eq!(conflict.id, "x"),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(planner.state(), PlannerState::HaveData);
        assert!(planner.into_parts().1.is_none());
    }

    #[test]
    fn test_missing_fields_are_asked_for() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Book), None, None, Some("Dentist"));
        let mut planner = Planner::begin(&start, &request, "book a dentist visit", now(), Tz::UTC);
        match planner.decide().unwrap() {
            Decision::Respond(Response::AskFor(fields)) => {
                assert_eq!(fields, vec![Field::Date, Field::Time]);
            }
            other => panic!("expected question, got {other:?}"),
        }
        assert_eq!(planner.issued(), 0);
    }

    #[test]
    fn test_ambiguous_time_becomes_clarifying_question() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Book), Some("at 3"), None, Some("Call"));
        let mut planner = Planner::begin(&start, &request, "call at 3", now(), Tz::UTC);
        assert!(matches!(planner.decide().unwrap(), Decision::Respond(Response::Clarify(_))));
        assert!(planner.record().time.is_none());
        assert_eq!(planner.issued(), 0);
    }

    #[test]
    fn test_check_ends_at_have_data() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Check), None, None, None);
        let mut planner = Planner::begin(&start, &request, "check my schedule", now(), Tz::UTC);
        assert!(matches!(planner.decide().unwrap(), Decision::Issue(BackendCommand::List(_))));
        planner.ingest(listed(vec![])).unwrap();
        match planner.decide().unwrap() {
            Decision::Respond(Response::Schedule { date, events }) => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 7, 3).unwrap());
                assert!(events.is_empty());
            }
            other => panic!("expected schedule, got {other:?}"),
        }
        assert_eq!(planner.state(), PlannerState::HaveData);
        let (record, pending) = planner.into_parts();
        assert!(!record.commit);
        assert!(pending.is_none());
    }

    #[test]
    fn test_fourth_command_is_planning_exhausted() {
        let record = IntentRecord {
            purpose: Some("dentist".to_string()),
            ..IntentRecord::for_intent(Intent::Cancel)
        };
        let start = session(record, None);
        let mut planner = Planner::begin(&start, &extracted(None, None, None, None), "cancel it", now(), Tz::UTC);

        let page = |day: u32| -> Vec<CalendarEntry> {
            (0..50)
                .map(|i| {
                    let s = format!("2025-07-{:02}T{:02}:{:02}:00Z", day, 8 + i / 6, (i % 6) * 10);
                    let e = format!("2025-07-{:02}T{:02}:{:02}:05Z", day, 8 + i / 6, (i % 6) * 10);
                    entry(&format!("e{day}-{i}"), "Standup", &s, &e)
                })
                .collect()
        };

        for day in [4, 5, 6] {
            assert!(matches!(planner.decide().unwrap(), Decision::Issue(BackendCommand::List(_))));
            planner.ingest(listed(page(day))).unwrap();
        }
        assert_eq!(planner.issued(), MAX_COMMANDS_PER_TURN);
        assert_eq!(
            planner.decide(),
            Err(DispatchError::PlanningExhausted { issued: 3 })
        );
    }

    #[test]
    fn test_full_page_with_duplicates_still_pages_forward() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Cancel), None, None, Some("dentist"));
        let mut planner = Planner::begin(&start, &request, "cancel my dentist", now(), Tz::UTC);
        planner.decide().unwrap();

        // 50 rows from the backend, one of them a duplicate
        let events: Vec<CalendarEntry> = (0..49)
            .map(|i| {
                let s = format!("2025-07-04T{:02}:{:02}:00Z", 8 + i / 6, (i % 6) * 10);
                let e = format!("2025-07-04T{:02}:{:02}:05Z", 8 + i / 6, (i % 6) * 10);
                entry(&format!("s{i}"), "Standup", &s, &e)
            })
            .collect();
        let last_start = events[48].start;
        planner
            .ingest(BackendOutcome::Listed { events, fetched: 50 })
            .unwrap();

        match planner.decide().unwrap() {
            Decision::Issue(BackendCommand::List(query)) => {
                assert_eq!(query.time_min, Some(last_start + Duration::seconds(1)));
            }
            other => panic!("expected the next page, got {other:?}"),
        }
        planner
            .ingest(listed(vec![entry("d", "Dentist", "2025-07-09T09:00:00Z", "2025-07-09T09:30:00Z")]))
            .unwrap();
        match planner.decide().unwrap() {
            Decision::Respond(Response::Confirm(action)) => {
                assert_eq!(action.command, BackendCommand::Delete { event_id: "d".to_string() });
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(planner.issued(), 2);
    }

    #[test]
    fn test_slot_past_the_end_of_the_calendar_is_ambiguous() {
        let record = IntentRecord {
            intent: Some(Intent::Book),
            date: Some(NaiveDate::MAX),
            time: NaiveTime::from_hms_opt(23, 30, 0),
            duration: Some("30 mins".to_string()),
            purpose: Some("Gym".to_string()),
            commit: false,
        };
        let mut planner = Planner::begin(&session(record, None), &extracted(None, None, None, None), "book it", now(), Tz::UTC);
        assert!(matches!(planner.decide(), Err(DispatchError::AmbiguousTime(_))));
        assert_eq!(planner.issued(), 0);
    }

    #[test]
    fn test_unreadable_duration_is_not_stored() {
        let request = extracted(
            Some(Intent::Book),
            Some("tonight 9pm"),
            Some("99999999999999999999 hours"),
            Some("Gym"),
        );
        let mut planner = Planner::begin(&session(IntentRecord::default(), None), &request, "gym tonight 9pm", now(), Tz::UTC);
        assert!(planner.record().duration.is_none());
        assert!(matches!(planner.decide().unwrap(), Decision::Issue(BackendCommand::List(_))));
    }

    #[test]
    fn test_cancel_finds_target_and_asks() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Cancel), None, None, Some("dentist"));
        let mut planner = Planner::begin(&start, &request, "cancel my dentist", now(), Tz::UTC);
        planner.decide().unwrap();
        planner
            .ingest(listed(vec![
                entry("a", "Gym", "2025-07-05T07:00:00Z", "2025-07-05T08:00:00Z"),
                entry("b", "Dentist appointment", "2025-07-08T09:00:00Z", "2025-07-08T09:30:00Z"),
            ]))
            .unwrap();
        match planner.decide().unwrap() {
            Decision::Respond(Response::Confirm(action)) => {
                assert_eq!(action.command, BackendCommand::Delete { event_id: "b".to_string() });
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(planner.record().date, NaiveDate::from_ymd_opt(2025, 7, 8));
        assert_eq!(planner.record().time, NaiveTime::from_hms_opt(9, 0, 0));
    }

    #[test]
    fn test_cancel_with_several_matches_asks_which() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Cancel), None, None, Some("gym"));
        let mut planner = Planner::begin(&start, &request, "cancel gym", now(), Tz::UTC);
        planner.decide().unwrap();
        planner
            .ingest(listed(vec![
                entry("a", "Gym", "2025-07-05T07:00:00Z", "2025-07-05T08:00:00Z"),
                entry("b", "Gym", "2025-07-06T07:00:00Z", "2025-07-06T08:00:00Z"),
            ]))
            .unwrap();
        match planner.decide().unwrap() {
            Decision::Respond(Response::WhichOne(hits)) => assert_eq!(hits.len(), 2),
            other => panic!("expected disambiguation, got {other:?}"),
        }
    }

    #[test]
    fn test_reschedule_ignores_own_slot_and_builds_update() {
        let start = session(IntentRecord::default(), None);
        let request = extracted(Some(Intent::Reschedule), Some("2025-07-08 9:30am"), None, Some("dentist"));
        let mut planner = Planner::begin(&start, &request, "move my dentist to 9:30am on the 8th", now(), Tz::UTC);
        planner.decide().unwrap();
        planner
            .ingest(listed(vec![entry("b", "Dentist", "2025-07-08T09:00:00Z", "2025-07-08T10:00:00Z")]))
            .unwrap();
        match planner.decide().unwrap() {
            Decision::Respond(Response::Confirm(action)) => match action.command {
                BackendCommand::Update { event_id, patch } => {
                    assert_eq!(event_id, "b");
                    assert_eq!(patch.start_time, Some(local("2025-07-08T09:30:00")));
                    assert_eq!(patch.end_time, Some(local("2025-07-08T10:30:00")));
                }
                other => panic!("expected update, got {other:?}"),
            },
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(planner.issued(), 1);
    }

    fn awaiting_booking() -> Session {
        let record = IntentRecord {
            intent: Some(Intent::Book),
            date: NaiveDate::from_ymd_opt(2025, 7, 3),
            time: NaiveTime::from_hms_opt(21, 0, 0),
            duration: Some("30 mins".to_string()),
            purpose: Some("Meet with Ramesh".to_string()),
            commit: false,
        };
        let action = PendingAction {
            command: BackendCommand::Create(NewEvent {
                summary: "Meet with Ramesh".to_string(),
                start_time: local("2025-07-03T21:00:00"),
                end_time: local("2025-07-03T21:30:00"),
                timezone: "UTC".to_string(),
                description: None,
                location: None,
            }),
            target: None,
        };
        session(record, Some(action))
    }

    #[test]
    fn test_negative_reply_abandons() {
        let mut planner = Planner::begin(&awaiting_booking(), &extracted(None, None, None, None), "no", now(), Tz::UTC);
        assert_eq!(planner.state(), PlannerState::Declined);
        assert_eq!(planner.decide().unwrap(), Decision::Respond(Response::Dropped));
        let (record, pending) = planner.into_parts();
        assert_eq!(record, IntentRecord::default());
        assert!(pending.is_none());
    }

    #[test]
    fn test_correction_replans_instead_of_committing() {
        let correction = extracted(None, Some("10pm"), None, None);
        let mut planner = Planner::begin(&awaiting_booking(), &correction, "yes but make it 10pm", now(), Tz::UTC);
        assert_eq!(planner.state(), PlannerState::Declined);
        assert!(matches!(planner.decide().unwrap(), Decision::Issue(BackendCommand::List(_))));
        assert_eq!(planner.record().time, NaiveTime::from_hms_opt(22, 0, 0));
        assert!(!planner.record().commit);
    }

    #[test]
    fn test_affirmative_with_echoed_fields_commits() {
        let echo = extracted(Some(Intent::Book), Some("tonight 9pm"), Some("half an hour"), Some("Meet with Ramesh"));
        let mut planner = Planner::begin(&awaiting_booking(), &echo, "yes", now(), Tz::UTC);
        assert_eq!(planner.state(), PlannerState::AwaitingConfirmation);
        assert!(matches!(planner.decide().unwrap(), Decision::Issue(BackendCommand::Create(_))));
        assert_eq!(planner.issued(), 1);
    }

    #[test]
    fn test_negative_with_echoed_fields_abandons() {
        let echo = extracted(None, None, None, Some("Meet with Ramesh"));
        let mut planner = Planner::begin(&awaiting_booking(), &echo, "no", now(), Tz::UTC);
        assert_eq!(planner.decide().unwrap(), Decision::Respond(Response::Dropped));
    }

    #[test]
    fn test_unclear_reply_asks_again() {
        let mut planner = Planner::begin(&awaiting_booking(), &extracted(None, None, None, None), "hmm", now(), Tz::UTC);
        assert!(matches!(planner.decide().unwrap(), Decision::Respond(Response::Confirm(_))));
        assert_eq!(planner.issued(), 0);
        assert!(planner.into_parts().1.is_some());
    }

    #[test]
    fn test_new_intent_while_awaiting_declines_then_starts_fresh() {
        let check = extracted(Some(Intent::Check), None, None, None);
        let mut planner = Planner::begin(&awaiting_booking(), &check, "actually what's on today?", now(), Tz::UTC);
        assert_eq!(planner.state(), PlannerState::Declined);
        assert_eq!(planner.record().intent, Some(Intent::Check));
        assert!(planner.record().purpose.is_none());
        assert!(matches!(planner.decide().unwrap(), Decision::Issue(BackendCommand::List(_))));
    }

    #[test]
    fn test_committed_record_stays_committed_on_small_talk() {
        let mut done = awaiting_booking();
        done.pending = None;
        done.record.commit = true;
        let mut planner = Planner::begin(&done, &ExtractedIntent::chat("You're welcome!"), "thanks", now(), Tz::UTC);
        assert_eq!(
            planner.decide().unwrap(),
            Decision::Respond(Response::Chat("You're welcome!".to_string()))
        );
        assert!(planner.record().commit);
    }

    #[test]
    fn test_new_details_after_commit_start_a_new_record() {
        let mut done = awaiting_booking();
        done.pending = None;
        done.record.commit = true;
        let next = extracted(Some(Intent::Book), Some("tomorrow 8am"), None, Some("Gym"));
        let planner = Planner::begin(&done, &next, "also book gym tomorrow 8am", now(), Tz::UTC);
        assert!(!planner.record().commit);
        assert_eq!(planner.record().purpose.as_deref(), Some("Gym"));
        assert!(planner.record().duration.is_none());
    }
}
