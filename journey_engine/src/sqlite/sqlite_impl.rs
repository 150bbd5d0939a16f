//! `SqliteDatabase` is a concrete implementation of a journey gateway storage backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

use super::db::{events, instances, journeys, steps, transfers};
use crate::{
    db_types::{
        EventId,
        InstanceStatus,
        JourneyInstance,
        JourneyStep,
        NewFailedWebhook,
        NewJourneyInstance,
        NewJourneyStep,
        NewWebhookEvent,
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
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = super::db::new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies any outstanding schema migrations. Called once at startup by the composition root.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await
    }
}

impl EventManagement for SqliteDatabase {
    async fn record_event_arrival(&self, event: NewWebhookEvent) -> Result<(WebhookEvent, bool), EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::record_arrival(event, &mut conn).await
    }

    async fn fetch_event_by_event_id(&self, event_id: &EventId) -> Result<Option<WebhookEvent>, EventApiError> {
        let mut conn = self.pool.acquire().await?;
        let event = events::fetch_by_event_id(event_id, &mut conn).await?;
        Ok(event)
    }

    async fn mark_event_queued(&self, event_id: &EventId) -> Result<(), EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::mark_queued(event_id, &mut conn).await
    }

    async fn begin_processing(&self, event_id: &EventId) -> Result<WebhookEvent, EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::begin_processing(event_id, &mut conn).await
    }

    async fn complete_event(&self, event_id: &EventId, duration_ms: i64) -> Result<(), EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::complete(event_id, duration_ms, &mut conn).await
    }

    async fn requeue_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::requeue(event_id, error, &mut conn).await
    }

    async fn fail_event(&self, event_id: &EventId, error: &str) -> Result<(), EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::fail(event_id, error, &mut conn).await
    }

    async fn quarantine_event(&self, event_id: &EventId, reason: &str) -> Result<(), EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::quarantine(event_id, reason, &mut conn).await
    }

    async fn fetch_recent_events_for_resource(
        &self,
        resource_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, EventApiError> {
        let mut conn = self.pool.acquire().await?;
        let recent = events::recent_for_resource(resource_id, since, limit, &mut conn).await?;
        Ok(recent)
    }

    async fn record_failed_webhook(&self, failure: NewFailedWebhook) -> Result<(), EventApiError> {
        let mut conn = self.pool.acquire().await?;
        events::insert_failed_webhook(failure, &mut conn).await
    }
}

impl JourneyManagement for SqliteDatabase {
    async fn seed_definition(
        &self,
        definition: NewJourneyDefinition,
    ) -> Result<Option<JourneyDefinition>, JourneyApiError> {
        definition.config.validate()?;
        let mut conn = self.pool.acquire().await?;
        journeys::seed_definition(definition, &mut conn).await
    }

    async fn fetch_active_definitions(&self) -> Result<Vec<JourneyDefinition>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let definitions = journeys::fetch_active_definitions(&mut conn).await?;
        Ok(definitions)
    }

    async fn fetch_definition(&self, id: i64) -> Result<Option<JourneyDefinition>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let definition = journeys::fetch_definition(id, &mut conn).await?;
        Ok(definition)
    }

    async fn create_instance(&self, instance: NewJourneyInstance) -> Result<JourneyInstance, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        instances::insert_instance(instance, &mut conn).await
    }

    async fn update_instance(&self, instance: &JourneyInstance) -> Result<(), JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        instances::update_instance(instance, &mut conn).await
    }

    async fn fetch_instance(&self, id: i64) -> Result<Option<JourneyInstance>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let instance = instances::fetch_instance(id, &mut conn).await?;
        Ok(instance)
    }

    async fn fetch_open_instances(
        &self,
        definition_id: i64,
        resource_id: &str,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let open = instances::fetch_open_instances(definition_id, resource_id, &mut conn).await?;
        Ok(open)
    }

    async fn fetch_open_instances_for_resource(
        &self,
        resource_id: &str,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let open = instances::fetch_open_for_resource(resource_id, &mut conn).await?;
        Ok(open)
    }

    async fn abandon_instances_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        resource_id: Option<&str>,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let abandoned = instances::abandon_inactive_since(cutoff, resource_id, &mut conn).await?;
        Ok(abandoned)
    }

    async fn append_step(&self, step: NewJourneyStep) -> Result<JourneyStep, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        steps::insert_step(step, &mut conn).await
    }

    async fn fetch_steps_for_instance(&self, instance_id: i64) -> Result<Vec<JourneyStep>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let steps = steps::fetch_for_instance(instance_id, &mut conn).await?;
        Ok(steps)
    }

    async fn step_exists(&self, instance_id: i64, event_id: &EventId) -> Result<bool, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let exists = steps::step_exists(instance_id, event_id, &mut conn).await?;
        Ok(exists)
    }

    async fn instance_status_counts(&self) -> Result<Vec<(InstanceStatus, i64)>, JourneyApiError> {
        let mut conn = self.pool.acquire().await?;
        let counts = instances::status_counts(&mut conn).await?;
        Ok(counts)
    }
}

impl TransferManagement for SqliteDatabase {
    async fn fetch_or_create_transfer(&self, transfer_id: &str) -> Result<TransferRecord, TransferApiError> {
        let mut conn = self.pool.acquire().await?;
        transfers::fetch_or_create_transfer(transfer_id, &mut conn).await
    }

    async fn apply_transfer_update(
        &self,
        transfer_id: &str,
        update: TransferUpdate,
        customer_id: Option<&str>,
        raw_event: &Value,
    ) -> Result<TransferRecord, TransferApiError> {
        let mut conn = self.pool.acquire().await?;
        transfers::apply_update(transfer_id, update, customer_id, raw_event, &mut conn).await
    }

    async fn fetch_transfer(&self, transfer_id: &str) -> Result<Option<TransferRecord>, TransferApiError> {
        let mut conn = self.pool.acquire().await?;
        let record = transfers::fetch_transfer(transfer_id, &mut conn).await?;
        Ok(record)
    }

    async fn link_customer(&self, customer_id: &str, event: &WebhookEvent) -> Result<(), TransferApiError> {
        let mut conn = self.pool.acquire().await?;
        transfers::link_customer(customer_id, event, &mut conn).await
    }
}
