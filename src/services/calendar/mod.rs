pub mod google;
pub mod memory;

use async_trait::async_trait;

use crate::models::{BackendCommand, BackendOutcome, CalendarEntry, EventPatch, ListQuery, NewEvent};
use crate::services::dedup;

#[async_trait]
pub trait CalendarBackend: Send + Sync {
    async fn list_events(&self, query: &ListQuery) -> anyhow::Result<Vec<CalendarEntry>>;
    async fn create_event(&self, event: &NewEvent) -> anyhow::Result<CalendarEntry>;
    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> anyhow::Result<CalendarEntry>;
    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()>;
}

/// Run one command. Listings come back already collapsed, so nothing
/// downstream ever sees a duplicate row.
pub async fn execute(
    backend: &dyn CalendarBackend,
    command: &BackendCommand,
) -> anyhow::Result<BackendOutcome> {
    match command {
        BackendCommand::List(query) => {
            let raw = backend.list_events(query).await?;
            let fetched = raw.len();
            let events = dedup::collapse(raw);
            if events.len() < fetched {
                tracing::info!(fetched, kept = events.len(), "dropped duplicate events from listing");
            }
            Ok(BackendOutcome::Listed { events, fetched })
        }
        BackendCommand::Create(event) => Ok(BackendOutcome::Created {
            event: backend.create_event(event).await?,
        }),
        BackendCommand::Update { event_id, patch } => Ok(BackendOutcome::Updated {
            event: backend.update_event(event_id, patch).await?,
        }),
        BackendCommand::Delete { event_id } => {
            backend.delete_event(event_id).await?;
            Ok(BackendOutcome::Deleted {
                event_id: event_id.clone(),
            })
        }
    }
}
