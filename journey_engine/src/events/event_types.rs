use crate::db_types::{EventId, JourneyInstance};

/// Published when a journey instance reaches `completed`.
#[derive(Debug, Clone)]
pub struct JourneyCompletedEvent {
    pub instance: JourneyInstance,
}

/// Published when a journey instance reaches `failed`.
#[derive(Debug, Clone)]
pub struct JourneyFailedEvent {
    pub instance: JourneyInstance,
}

/// Published when the pipeline dead-letters an event.
#[derive(Debug, Clone)]
pub struct EventQuarantinedEvent {
    pub event_id: EventId,
    pub reason: String,
}
