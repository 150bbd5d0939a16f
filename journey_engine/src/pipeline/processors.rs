//! Resource event processors.
//!
//! A processor translates a raw event into domain-state mutations and populates the shared processing context for
//! the journey tracker. Processors are a closed set of tagged variants dispatched through an explicit match; the
//! pipeline walks its ordered registry and hands the event to the first processor whose `can_process` predicate
//! matches. New resource types slot in as new variants without touching the orchestration code.

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::{
    db_types::{ResourceType, TransferStatus, TransferUpdate, WebhookEvent},
    helpers::extract_resource_id,
    pipeline::ProcessingContext,
    traits::{TransferApiError, TransferManagement},
};

#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    /// Permanent failure; the pipeline sends these straight to quarantine.
    #[error("Validation failure: {0}")]
    Validation(String),
    #[error("{0}")]
    Transfer(#[from] TransferApiError),
}

pub enum EventProcessor {
    Transfer(TransferProcessor),
    Customer(CustomerProcessor),
}

impl EventProcessor {
    pub fn name(&self) -> &'static str {
        match self {
            EventProcessor::Transfer(_) => "transfer",
            EventProcessor::Customer(_) => "customer",
        }
    }

    pub fn can_process(&self, event: &WebhookEvent) -> bool {
        match self {
            EventProcessor::Transfer(_) => {
                event.resource_type == ResourceType::Transfer || event.event_type.contains("transfer")
            },
            EventProcessor::Customer(_) => {
                event.resource_type == ResourceType::Customer || event.event_type.contains("customer")
            },
        }
    }

    pub async fn process<B: TransferManagement>(
        &self,
        db: &B,
        event: &WebhookEvent,
        ctx: &mut ProcessingContext,
    ) -> Result<(), ProcessorError> {
        match self {
            EventProcessor::Transfer(p) => p.process(db, event, ctx).await,
            EventProcessor::Customer(p) => p.process(db, event, ctx).await,
        }
    }
}

/// The default processor registry, in dispatch order.
pub fn default_processors() -> Vec<EventProcessor> {
    vec![EventProcessor::Transfer(TransferProcessor), EventProcessor::Customer(CustomerProcessor)]
}

//--------------------------------------   TransferProcessor   -------------------------------------------------------
pub struct TransferProcessor;

impl TransferProcessor {
    async fn process<B: TransferManagement>(
        &self,
        db: &B,
        event: &WebhookEvent,
        ctx: &mut ProcessingContext,
    ) -> Result<(), ProcessorError> {
        let transfer_id = resolve_resource_identifier(event)
            .ok_or_else(|| ProcessorError::Validation(format!("Event {} carries no transfer id", event.event_id)))?;
        let record = db.fetch_or_create_transfer(&transfer_id).await?;
        let update = transfer_update_for(event);
        let customer_id = extract_customer_id(&event.payload.0).or_else(|| record.customer_id.clone());
        let updated = db
            .apply_transfer_update(&transfer_id, update, customer_id.as_deref(), &event.payload.0)
            .await?;
        debug!("🏦️ Transfer {transfer_id} is now {} after {}", updated.status, event.event_type);
        ctx.customer_id = customer_id;
        ctx.insert_extra("transfer_id", Value::String(transfer_id));
        ctx.transfer = Some(updated);
        Ok(())
    }
}

/// The fixed event-type → canonical status mapping. Unmapped event types default to `Unknown` rather than raising an
/// error.
pub fn transfer_status_for(event_type: &str) -> TransferStatus {
    match event_type {
        "transfer_created" | "bank_transfer_created" => TransferStatus::Pending,
        "transfer_pending" | "bank_transfer_pending" => TransferStatus::Pending,
        "transfer_completed" | "bank_transfer_completed" => TransferStatus::Processed,
        "transfer_failed" | "bank_transfer_failed" => TransferStatus::Failed,
        "transfer_returned" => TransferStatus::Failed,
        "transfer_cancelled" | "bank_transfer_cancelled" => TransferStatus::Cancelled,
        _ => TransferStatus::Unknown,
    }
}

fn transfer_update_for(event: &WebhookEvent) -> TransferUpdate {
    let status = transfer_status_for(&event.event_type);
    let payload = &event.payload.0;
    let (failure_reason, failure_code) = match status {
        TransferStatus::Failed => (
            string_field(payload, &["failure", "description"]).or_else(|| string_field(payload, &["reason"])),
            string_field(payload, &["failure", "code"]).or_else(|| string_field(payload, &["code"])),
        ),
        _ => (None, None),
    };
    let completed_at: Option<DateTime<Utc>> =
        (status == TransferStatus::Processed).then(|| event.effective_timestamp());
    TransferUpdate { status, failure_reason, failure_code, completed_at }
}

//--------------------------------------   CustomerProcessor   -------------------------------------------------------
pub struct CustomerProcessor;

impl CustomerProcessor {
    async fn process<B: TransferManagement>(
        &self,
        db: &B,
        event: &WebhookEvent,
        ctx: &mut ProcessingContext,
    ) -> Result<(), ProcessorError> {
        let customer_id = resolve_resource_identifier(event)
            .or_else(|| extract_customer_id(&event.payload.0))
            .ok_or_else(|| ProcessorError::Validation(format!("Event {} carries no customer id", event.event_id)))?;
        db.link_customer(&customer_id, event).await?;
        debug!("🧑️ Customer {customer_id} linked to event {}", event.event_id);
        ctx.customer_id = Some(customer_id);
        Ok(())
    }
}

//--------------------------------------       helpers        -------------------------------------------------------
/// The identifier of the affected resource: the event's own resource id if present, otherwise the trailing path
/// segment of its resource URL.
fn resolve_resource_identifier(event: &WebhookEvent) -> Option<String> {
    event
        .resource_id
        .clone()
        .or_else(|| event.resource_uri.as_deref().and_then(extract_resource_id))
}

/// A customer id carried in the payload, either inline or as a `_links.customer` reference.
fn extract_customer_id(payload: &Value) -> Option<String> {
    string_field(payload, &["customerId"])
        .or_else(|| string_field(payload, &["_links", "customer", "href"]).and_then(|href| extract_resource_id(&href)))
}

fn string_field(payload: &Value, path: &[&str]) -> Option<String> {
    let mut current = payload;
    for segment in path {
        current = current.get(segment)?;
    }
    current.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use sqlx::types::Json;

    use super::*;
    use crate::db_types::{EventId, ProcessingState};

    fn event(event_type: &str, resource_type: ResourceType) -> WebhookEvent {
        WebhookEvent {
            id: 1,
            event_id: EventId("ev_1".into()),
            event_type: event_type.to_string(),
            resource_type,
            resource_id: None,
            resource_uri: Some("https://api.example.com/transfers/tr_9".to_string()),
            topic: event_type.to_string(),
            event_timestamp: Some(Utc::now()),
            received_at: Utc::now(),
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

    #[test]
    fn status_mapping_is_fixed() {
        assert_eq!(transfer_status_for("transfer_created"), TransferStatus::Pending);
        assert_eq!(transfer_status_for("transfer_completed"), TransferStatus::Processed);
        assert_eq!(transfer_status_for("bank_transfer_completed"), TransferStatus::Processed);
        assert_eq!(transfer_status_for("transfer_failed"), TransferStatus::Failed);
        assert_eq!(transfer_status_for("transfer_returned"), TransferStatus::Failed);
        assert_eq!(transfer_status_for("transfer_cancelled"), TransferStatus::Cancelled);
        assert_eq!(transfer_status_for("something_else"), TransferStatus::Unknown);
    }

    #[test]
    fn dispatch_predicates() {
        let processors = default_processors();
        let transfer_event = event("transfer_created", ResourceType::Transfer);
        assert_eq!(processors.iter().find(|p| p.can_process(&transfer_event)).map(|p| p.name()), Some("transfer"));
        let customer_event = event("customer_created", ResourceType::Customer);
        assert_eq!(processors.iter().find(|p| p.can_process(&customer_event)).map(|p| p.name()), Some("customer"));
        let unknown_event = event("account_suspended", ResourceType::Account);
        assert!(processors.iter().find(|p| p.can_process(&unknown_event)).is_none());
    }

    #[test]
    fn failure_details_extracted_for_failed_transfers() {
        let mut ev = event("transfer_failed", ResourceType::Transfer);
        ev.payload = Json(json!({"failure": {"code": "R01", "description": "Insufficient funds"}}));
        let update = transfer_update_for(&ev);
        assert_eq!(update.status, TransferStatus::Failed);
        assert_eq!(update.failure_code.as_deref(), Some("R01"));
        assert_eq!(update.failure_reason.as_deref(), Some("Insufficient funds"));
        assert!(update.completed_at.is_none());
    }

    #[test]
    fn customer_id_from_links() {
        let payload = json!({"_links": {"customer": {"href": "https://api.example.com/customers/cu_77"}}});
        assert_eq!(extract_customer_id(&payload).as_deref(), Some("cu_77"));
        assert_eq!(extract_customer_id(&json!({"customerId": "cu_1"})).as_deref(), Some("cu_1"));
        assert_eq!(extract_customer_id(&json!({})), None);
    }
}
