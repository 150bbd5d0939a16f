use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{EventId, NewFailedWebhook, NewWebhookEvent, WebhookEvent};

/// Storage contract for raw webhook events and their processing lifecycle.
///
/// The arrival path is idempotent: recording the same `event_id` twice updates the duplicate counters on the
/// existing record instead of inserting a second one, and reports the arrival as a duplicate.
#[allow(async_fn_in_trait)]
pub trait EventManagement {
    /// Records an event arrival. If the event id is new, the event is inserted in the `received` state and `true` is
    /// returned in the second element. If it already exists, `is_duplicate` is set and `duplicate_count` is
    /// incremented on the stored record, which is returned with `false`.
    async fn record_event_arrival(&self, event: NewWebhookEvent) -> Result<(WebhookEvent, bool), EventApiError>;

    async fn fetch_event_by_event_id(&self, event_id: &EventId) -> Result<Option<WebhookEvent>, EventApiError>;

    /// Marks the event as queued for processing.
    async fn mark_event_queued(&self, event_id: &EventId) -> Result<(), EventApiError>;

    /// Transitions the event to `processing` and increments its attempt counter, returning the updated record.
    async fn begin_processing(&self, event_id: &EventId) -> Result<WebhookEvent, EventApiError>;

    /// Marks the event `completed`, stamping `processed_at` and the processing duration.
    async fn complete_event(&self, event_id: &EventId, duration_ms: i64) -> Result<(), EventApiError>;

    /// Returns the event to the `queued` state after a retryable failure, recording the error.
    async fn requeue_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError>;

    /// Marks the event `failed`. Used for failures outside the retry/quarantine policy (e.g. the event record
    /// disappeared mid-flight).
    async fn fail_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError>;

    /// Dead-letters the event. Quarantined events require operator intervention; there is no automatic replay.
    async fn quarantine_event(&self, event_id: &EventId, reason: &str) -> Result<(), EventApiError>;

    /// Recent events for the same resource, newest first, bounded by `since` and `limit`. Used by the pipeline to
    /// enrich the processing context.
    async fn fetch_recent_events_for_resource(
        &self,
        resource_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, EventApiError>;

    /// Best-effort forensic record for a request that could not be turned into an event.
    async fn record_failed_webhook(&self, failure: NewFailedWebhook) -> Result<(), EventApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum EventApiError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The event {0} does not exist")]
    EventNotFound(EventId),
}

impl From<sqlx::Error> for EventApiError {
    fn from(e: sqlx::Error) -> Self {
        EventApiError::DatabaseError(e.to_string())
    }
}
