use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::errors::DispatchError;
use crate::models::{
    BackendCommand, BackendOutcome, ExtractedIntent, IntentRecord, PendingAction, ReplyEnvelope,
    Session,
};
use crate::services::ai::intent::extract_intent;
use crate::services::calendar::{self, CalendarBackend};
use crate::services::planner::{Decision, Planner, Response};
use crate::services::reply::{self, TurnView};
use crate::state::AppState;

/// Clock and limits for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext {
    pub now: DateTime<Utc>,
    pub zone: Tz,
    pub backend_timeout: StdDuration,
}

/// Handle one user message end to end: extract, plan, execute, reply.
///
/// The conversation stays locked for the whole turn. The session is only
/// written back once the reply exists, so a turn abandoned midway leaves the
/// stored record exactly as it was.
pub async fn process_message(
    state: &Arc<AppState>,
    conversation_id: &str,
    message: &str,
    now: DateTime<Utc>,
    zone: Tz,
) -> anyhow::Result<ReplyEnvelope> {
    let handle = state.sessions.handle(conversation_id, now);
    let mut session = handle.lock().await;

    let reference = format!("{} ({})", now.with_timezone(&zone).to_rfc3339(), zone.name());
    let extracted = extract_intent(
        state.llm.as_ref(),
        &session.messages,
        message,
        &session.record,
        &reference,
    )
    .await?;

    tracing::info!(
        conversation = conversation_id,
        intent = ?extracted.intent,
        when = ?extracted.when,
        scheduling = extracted.is_scheduling(),
        awaiting = session.pending.is_some(),
        "processing message"
    );

    let ctx = TurnContext {
        now,
        zone,
        backend_timeout: StdDuration::from_secs(state.config.backend_timeout_secs),
    };
    let (reply, mut updated) =
        run_turn(state.backend.as_ref(), &session, &extracted, message, &ctx).await;

    updated.touch(now, state.sessions.ttl());
    *session = updated;
    Ok(reply)
}

/// Plan and execute one turn against `session`, returning the reply and
/// the session as it should look afterwards. `session` itself is untouched.
pub async fn run_turn(
    backend: &dyn CalendarBackend,
    session: &Session,
    extracted: &ExtractedIntent,
    message: &str,
    ctx: &TurnContext,
) -> (ReplyEnvelope, Session) {
    let mut planner = Planner::begin(session, extracted, message, ctx.now, ctx.zone);
    let revised = planner.record().clone();
    let mut last_command: Option<BackendCommand> = None;

    let result = loop {
        let command = match planner.decide() {
            Ok(Decision::Respond(response)) => break Ok(response),
            Ok(Decision::Issue(command)) => command,
            Err(e) => break Err(e),
        };

        tracing::info!(
            conversation = %session.id,
            command = command.name(),
            mutating = command.is_mutating(),
            issued = planner.issued(),
            "issuing backend command"
        );
        last_command = Some(command.clone());

        let outcome = match execute_with_retry(backend, &command, ctx.backend_timeout).await {
            Ok(outcome) => outcome,
            Err(e) => break Err(e),
        };
        if let Err(e) = planner.ingest(outcome) {
            break Err(e);
        }
    };

    let (response, record, pending) = match result {
        Ok(response) => {
            let (record, pending) = planner.into_parts();
            (response, record, pending)
        }
        Err(error) => settle_failure(error, planner, session, revised),
    };

    let record = match record.validate() {
        Ok(()) => record,
        Err(e) => {
            tracing::warn!(error = %e, "repairing intent record before reply");
            record.repaired()
        }
    };

    let view = TurnView {
        response: &response,
        record: &record,
        command: last_command.as_ref(),
        pending: pending.as_ref(),
        now: ctx.now,
        zone: ctx.zone,
    };
    let envelope = reply::envelope(&view);

    let mut updated = session.clone();
    updated.record = record;
    updated.pending = pending;
    updated.push_message("user", message);
    updated.push_message("assistant", &envelope.casual);

    (envelope, updated)
}

/// Turn a contained failure into a user-safe response and the record and
/// pending action to keep.
fn settle_failure(
    error: DispatchError,
    planner: Planner,
    session: &Session,
    revised: IntentRecord,
) -> (Response, IntentRecord, Option<PendingAction>) {
    match error {
        DispatchError::AmbiguousTime(reason) => {
            tracing::info!(%reason, "asking for a clearer time");
            let (record, pending) = planner.into_parts();
            (Response::Clarify(reason), record, pending)
        }
        DispatchError::PlanningExhausted { issued } => {
            tracing::warn!(conversation = %session.id, issued, "planning exhausted");
            let (record, _) = planner.into_parts();
            let record = IntentRecord {
                commit: session.record.commit && record.commit,
                ..record
            };
            (Response::Exhausted, record, None)
        }
        DispatchError::InvalidIntent(reason) => {
            tracing::warn!(conversation = %session.id, %reason, "invalid intent record, re-prompting");
            let (record, _) = planner.into_parts();
            let record = record.repaired();
            let response = match record.intent {
                Some(intent) if !record.missing_fields(intent).is_empty() => {
                    Response::AskFor(record.missing_fields(intent))
                }
                _ => Response::Chat(String::new()),
            };
            (response, record, None)
        }
        DispatchError::BackendUnavailable(reason) => {
            tracing::error!(conversation = %session.id, %reason, "calendar backend unavailable");
            let start = &session.record;
            let kept = IntentRecord {
                commit: start.commit,
                ..revised
            };
            let same_request = start.intent.is_none() || kept.intent == start.intent;
            if same_request && kept.validate().is_ok() {
                let pending = if kept == *start {
                    session.pending.clone()
                } else {
                    None
                };
                (Response::Unavailable, kept, pending)
            } else {
                (Response::Unavailable, start.clone(), session.pending.clone())
            }
        }
    }
}

/// Run one command with a deadline, retrying once with the same command.
async fn execute_with_retry(
    backend: &dyn CalendarBackend,
    command: &BackendCommand,
    timeout: StdDuration,
) -> Result<BackendOutcome, DispatchError> {
    let mut last_error = String::new();
    for attempt in 1..=2 {
        match tokio::time::timeout(timeout, calendar::execute(backend, command)).await {
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(e)) => {
                tracing::warn!(attempt, command = command.name(), error = %e, "backend command failed");
                last_error = e.to_string();
            }
            Err(_) => {
                tracing::warn!(attempt, command = command.name(), ?timeout, "backend command timed out");
                last_error = format!("{} timed out after {:?}", command.name(), timeout);
            }
        }
    }
    Err(DispatchError::BackendUnavailable(last_error))
}
