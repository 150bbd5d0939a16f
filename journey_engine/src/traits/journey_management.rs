use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{EventId, InstanceStatus, JourneyInstance, JourneyStep, NewJourneyInstance, NewJourneyStep},
    journeys::{JourneyConfigError, JourneyDefinition, NewJourneyDefinition},
};

/// Storage contract for journey definitions, instances and their step logs.
///
/// Definitions are read-only at runtime; the tracker never mutates them. Steps are append-only.
#[allow(async_fn_in_trait)]
pub trait JourneyManagement {
    /// Publishes a definition if no active definition with the same name exists yet. Returns the stored definition,
    /// or `None` if seeding was skipped. The configuration is validated before it is written.
    async fn seed_definition(&self, definition: NewJourneyDefinition)
        -> Result<Option<JourneyDefinition>, JourneyApiError>;

    async fn fetch_active_definitions(&self) -> Result<Vec<JourneyDefinition>, JourneyApiError>;

    async fn fetch_definition(&self, id: i64) -> Result<Option<JourneyDefinition>, JourneyApiError>;

    async fn create_instance(&self, instance: NewJourneyInstance) -> Result<JourneyInstance, JourneyApiError>;

    /// Writes back every mutable field of the instance row. Callers serialise concurrent updates per
    /// (definition, resource) pair; the store does not arbitrate write conflicts.
    async fn update_instance(&self, instance: &JourneyInstance) -> Result<(), JourneyApiError>;

    async fn fetch_instance(&self, id: i64) -> Result<Option<JourneyInstance>, JourneyApiError>;

    /// Non-terminal (`active` or `stuck`) instances of one definition for one resource.
    async fn fetch_open_instances(
        &self,
        definition_id: i64,
        resource_id: &str,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError>;

    /// Non-terminal instances of any definition for one resource. Used by the resource-scoped abandonment sweep.
    async fn fetch_open_instances_for_resource(&self, resource_id: &str)
        -> Result<Vec<JourneyInstance>, JourneyApiError>;

    /// Transitions every non-terminal instance with `last_event_time` older than `cutoff` to `abandoned`, optionally
    /// restricted to one resource. Returns the abandoned instances.
    async fn abandon_instances_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        resource_id: Option<&str>,
    ) -> Result<Vec<JourneyInstance>, JourneyApiError>;

    async fn append_step(&self, step: NewJourneyStep) -> Result<JourneyStep, JourneyApiError>;

    /// Steps for one instance ordered by insertion (sequence order for in-order steps).
    async fn fetch_steps_for_instance(&self, instance_id: i64) -> Result<Vec<JourneyStep>, JourneyApiError>;

    /// Whether a step for this (instance, event) pair has already been written. The idempotency guard against
    /// reprocessing the same event into the same instance.
    async fn step_exists(&self, instance_id: i64, event_id: &EventId) -> Result<bool, JourneyApiError>;

    /// Aggregate instance counts by status, for the analytics layer.
    async fn instance_status_counts(&self) -> Result<Vec<(InstanceStatus, i64)>, JourneyApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum JourneyApiError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The journey definition {0} does not exist")]
    DefinitionNotFound(i64),
    #[error("The journey instance {0} does not exist")]
    InstanceNotFound(i64),
    #[error("Invalid journey configuration: {0}")]
    InvalidConfig(#[from] JourneyConfigError),
}

impl From<sqlx::Error> for JourneyApiError {
    fn from(e: sqlx::Error) -> Self {
        JourneyApiError::DatabaseError(e.to_string())
    }
}
