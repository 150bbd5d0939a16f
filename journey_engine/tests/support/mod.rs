//! Shared scaffolding for the engine integration tests: scratch databases, event builders and a failure-injecting
//! store wrapper.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use journey_engine::{
    db_types::{
        EventId,
        InstanceStatus,
        JourneyInstance,
        JourneyStep,
        NewFailedWebhook,
        NewJourneyInstance,
        NewJourneyStep,
        NewWebhookEvent,
        ProcessingState,
        ResourceType,
        TransferRecord,
        TransferUpdate,
        WebhookEvent,
    },
    journeys::{JourneyDefinition, NewJourneyDefinition},
    traits::{
        EventApiError,
        EventManagement,
        JourneyApiError,
        JourneyManagement,
        TransferApiError,
        TransferManagement,
    },
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    SqliteDatabase,
};
use serde_json::{json, Value};
use sqlx::types::Json;

pub async fn new_test_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

/// An in-memory webhook event, as the pipeline would hand it to the tracker.
pub fn make_event(
    event_id: &str,
    event_type: &str,
    resource_type: ResourceType,
    resource_id: &str,
    timestamp: DateTime<Utc>,
) -> WebhookEvent {
    WebhookEvent {
        id: 0,
        event_id: EventId(event_id.to_string()),
        event_type: event_type.to_string(),
        resource_type,
        resource_id: Some(resource_id.to_string()),
        resource_uri: None,
        topic: event_type.to_string(),
        event_timestamp: Some(timestamp),
        received_at: timestamp,
        payload: Json(json!({})),
        payload_size: 2,
        signature: None,
        signature_valid: false,
        source_ip: None,
        is_duplicate: false,
        duplicate_count: 0,
        processing_state: ProcessingState::Processing,
        processing_attempts: 1,
        last_processing_error: None,
        processed_at: None,
        processing_duration_ms: None,
        quarantined_at: None,
        quarantine_reason: None,
    }
}

pub fn new_arrival(event_id: &str, event_type: &str, resource_id: &str, resource_uri: &str) -> NewWebhookEvent {
    NewWebhookEvent {
        event_id: EventId(event_id.to_string()),
        event_type: event_type.to_string(),
        resource_type: journey_engine::helpers::resource_type_from_uri(resource_uri),
        resource_id: Some(resource_id.to_string()),
        resource_uri: Some(resource_uri.to_string()),
        topic: event_type.to_string(),
        event_timestamp: Some(Utc::now()),
        payload: json!({}),
        payload_size: 2,
        signature: None,
        signature_valid: false,
        source_ip: Some("10.0.0.1".to_string()),
    }
}

//--------------------------------------      FlakyStore       -------------------------------------------------------
/// Delegates everything to the wrapped store, but fails `apply_transfer_update` with a transient error until the
/// configured number of injected failures is used up. Lets the tests drive the retry and quarantine paths against
/// a real database.
#[derive(Clone)]
pub struct FlakyStore<B: Clone> {
    inner: B,
    failures_left: Arc<AtomicU32>,
}

impl<B: Clone> FlakyStore<B> {
    pub fn new(inner: B, failures: u32) -> Self {
        Self { inner, failures_left: Arc::new(AtomicU32::new(failures)) }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<B: EventManagement + Clone> EventManagement for FlakyStore<B> {
    async fn record_event_arrival(&self, event: NewWebhookEvent) -> Result<(WebhookEvent, bool), EventApiError> {
        self.inner.record_event_arrival(event).await
    }

    async fn fetch_event_by_event_id(&self, event_id: &EventId) -> Result<Option<WebhookEvent>, EventApiError> {
        self.inner.fetch_event_by_event_id(event_id).await
    }

    async fn mark_event_queued(&self, event_id: &EventId) -> Result<(), EventApiError> {
        self.inner.mark_event_queued(event_id).await
    }

    async fn begin_processing(&self, event_id: &EventId) -> Result<WebhookEvent, EventApiError> {
        self.inner.begin_processing(event_id).await
    }

    async fn complete_event(&self, event_id: &EventId, duration_ms: i64) -> Result<(), EventApiError> {
        self.inner.complete_event(event_id, duration_ms).await
    }

    async fn requeue_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError> {
        self.inner.requeue_event(event_id, error).await
    }

    async fn fail_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError> {
        self.inner.fail_event(event_id, error).await
    }

    async fn quarantine_event(&self, event_id: &EventId, reason: &str) -> Result<(), EventApiError> {
        self.inner.quarantine_event(event_id, reason).await
    }

    async fn fetch_recent_events_for_resource(
        &self,
        resource_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, EventApiError> {
        self.inner.fetch_recent_events_for_resource(resource_id, since, limit).await
    }

    async fn record_failed_webhook(&self, failure: NewFailedWebhook) -> Result<(), EventApiError> {
        self.inner.record_failed_webhook(failure).await
    }
}

impl<B: JourneyManagement + Clone> JourneyManagement for FlakyStore<B> {
    async fn seed_definition(
        &self,
        definition: NewJourneyDefinition,
    ) -> Result<Option<JourneyDefinition>, JourneyApiError> {
        self.inner.seed_definition(definition).await
    }

    async fn fetch_active_definitions(&self) -> Result<Vec<JourneyDefinition>, JourneyApiError> {
        self.inner.fetch_active_definitions().await
    }

    async fn fetch_definition(&self, id: i64) -> Result<Option<JourneyDefinition>, JourneyApiError> {
        self.inner.fetch_definition(id).await
    }

    async fn create_instance(&self, instance: NewJourneyInstance) -> Result<JourneyInstance, JourneyApiError> {
        self.inner.create_instance(instance).await
    }

    async fn update_instance(&self, instance: &JourneyInstance) -> Result<(), JourneyApiError> {
        self.inner.update_instance(instance).await
    }

    async fn fetch_instance(&self, id: i64) -> Result<Option<JourneyInstance>, JourneyApiError> {
        self.inner.fetch_instance(id).await
    }

    async fn fetch_open_instances(
        &self,
        definition_id: i64,
        resource_id: &str,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError> {
        self.inner.fetch_open_instances(definition_id, resource_id).await
    }

    async fn fetch_open_instances_for_resource(
        &self,
        resource_id: &str,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError> {
        self.inner.fetch_open_instances_for_resource(resource_id).await
    }

    async fn abandon_instances_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        resource_id: Option<&str>,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError> {
        self.inner.abandon_instances_inactive_since(cutoff, resource_id).await
    }

    async fn append_step(&self, step: NewJourneyStep) -> Result<JourneyStep, JourneyApiError> {
        self.inner.append_step(step).await
    }

    async fn fetch_steps_for_instance(&self, instance_id: i64) -> Result<Vec<JourneyStep>, JourneyApiError> {
        self.inner.fetch_steps_for_instance(instance_id).await
    }

    async fn step_exists(&self, instance_id: i64, event_id: &EventId) -> Result<bool, JourneyApiError> {
        self.inner.step_exists(instance_id, event_id).await
    }

    async fn instance_status_counts(&self) -> Result<Vec<(InstanceStatus, i64)>, JourneyApiError> {
        self.inner.instance_status_counts().await
    }
}

impl<B: TransferManagement + Clone> TransferManagement for FlakyStore<B> {
    async fn fetch_or_create_transfer(&self, transfer_id: &str) -> Result<TransferRecord, TransferApiError> {
        self.inner.fetch_or_create_transfer(transfer_id).await
    }

    async fn apply_transfer_update(
        &self,
        transfer_id: &str,
        update: TransferUpdate,
        customer_id: Option<&str>,
        raw_event: &Value,
    ) -> Result<TransferRecord, TransferApiError> {
        if self.take_failure() {
            return Err(TransferApiError::DatabaseError("injected transient failure".to_string()));
        }
        self.inner.apply_transfer_update(transfer_id, update, customer_id, raw_event).await
    }

    async fn fetch_transfer(&self, transfer_id: &str) -> Result<Option<TransferRecord>, TransferApiError> {
        self.inner.fetch_transfer(transfer_id).await
    }

    async fn link_customer(&self, customer_id: &str, event: &WebhookEvent) -> Result<(), TransferApiError> {
        self.inner.link_customer(customer_id, event).await
    }
}
