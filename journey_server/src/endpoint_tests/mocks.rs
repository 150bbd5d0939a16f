use chrono::{DateTime, Utc};
use journey_engine::{
    db_types::{
        EventId,
        NewFailedWebhook,
        NewWebhookEvent,
        ProcessingState,
        ResourceType,
        WebhookEvent,
    },
    traits::{EventApiError, EventManagement},
};
use mockall::mock;
use sqlx::types::Json;

mock! {
    pub EventStore {}
    impl EventManagement for EventStore {
        async fn record_event_arrival(&self, event: NewWebhookEvent) -> Result<(WebhookEvent, bool), EventApiError>;
        async fn fetch_event_by_event_id(&self, event_id: &EventId) -> Result<Option<WebhookEvent>, EventApiError>;
        async fn mark_event_queued(&self, event_id: &EventId) -> Result<(), EventApiError>;
        async fn begin_processing(&self, event_id: &EventId) -> Result<WebhookEvent, EventApiError>;
        async fn complete_event(&self, event_id: &EventId, duration_ms: i64) -> Result<(), EventApiError>;
        async fn requeue_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError>;
        async fn fail_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError>;
        async fn quarantine_event(&self, event_id: &EventId, reason: &str) -> Result<(), EventApiError>;
        async fn fetch_recent_events_for_resource(
            &self,
            resource_id: &str,
            since: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<WebhookEvent>, EventApiError>;
        async fn record_failed_webhook(&self, failure: NewFailedWebhook) -> Result<(), EventApiError>;
    }
}

/// A stored event record, as `record_event_arrival` would return it.
pub fn stored_event(event_id: &str, duplicate_count: i64) -> WebhookEvent {
    WebhookEvent {
        id: 1,
        event_id: EventId(event_id.to_string()),
        event_type: "transfer_created".to_string(),
        resource_type: ResourceType::Transfer,
        resource_id: Some("tr_1".to_string()),
        resource_uri: Some("https://api.example.com/transfers/tr_1".to_string()),
        topic: "transfer_created".to_string(),
        event_timestamp: Some(Utc::now()),
        received_at: Utc::now(),
        payload: Json(serde_json::json!({})),
        payload_size: 2,
        signature: None,
        signature_valid: false,
        source_ip: None,
        is_duplicate: duplicate_count > 0,
        duplicate_count,
        processing_state: if duplicate_count > 0 { ProcessingState::Completed } else { ProcessingState::Received },
        processing_attempts: 0,
        last_processing_error: None,
        processed_at: None,
        processing_duration_ms: None,
        quarantined_at: None,
        quarantine_reason: None,
    }
}
