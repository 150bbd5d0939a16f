use serde_json::{Map, Value};

use crate::db_types::{JourneyInstance, TransferRecord, WebhookEvent};

/// Transient, per-event bag of derived data. Built fresh for every processing invocation, populated by enrichment
/// and the resource processors, consumed by the journey tracker, and discarded when processing completes. Never
/// persisted.
#[derive(Debug, Default)]
pub struct ProcessingContext {
    /// The domain transfer record affected by the event, when a transfer processor ran
    pub transfer: Option<TransferRecord>,
    /// The customer id resolved from the event, when one could be determined
    pub customer_id: Option<String>,
    /// Recent events for the same resource, newest first
    pub recent_events: Vec<WebhookEvent>,
    /// Journey instances that were open for the resource when processing began
    pub active_instances: Vec<JourneyInstance>,
    /// Free-form extras for processor-specific signals
    pub extras: Map<String, Value>,
}

impl ProcessingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_extra<S: Into<String>>(&mut self, key: S, value: Value) {
        self.extras.insert(key.into(), value);
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}
