use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

/// Sentinel sequence number for steps recorded out of order. These steps are kept for audit but never advance the
/// instance timeline.
pub const OUT_OF_ORDER_SEQUENCE: i64 = -1;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------        EventId        -------------------------------------------------------
/// The provider-assigned, globally unique identifier of a webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct EventId(pub String);

impl FromStr for EventId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------    ProcessingState    -------------------------------------------------------
/// The lifecycle state of a webhook event as it moves through the pipeline.
///
/// `received → queued → processing → completed | failed | quarantined`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Received,
    Queued,
    Processing,
    Completed,
    Failed,
    Quarantined,
}

impl Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingState::Received => "received",
            ProcessingState::Queued => "queued",
            ProcessingState::Processing => "processing",
            ProcessingState::Completed => "completed",
            ProcessingState::Failed => "failed",
            ProcessingState::Quarantined => "quarantined",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProcessingState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "quarantined" => Ok(Self::Quarantined),
            s => Err(ConversionError(format!("Invalid processing state: {s}"))),
        }
    }
}

//--------------------------------------      ResourceType     -------------------------------------------------------
/// The provider-side entity type an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Transfer,
    Customer,
    FundingSource,
    Account,
    Unknown,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::Transfer => "transfer",
            ResourceType::Customer => "customer",
            ResourceType::FundingSource => "funding_source",
            ResourceType::Account => "account",
            ResourceType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ResourceType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(Self::Transfer),
            "customer" => Ok(Self::Customer),
            "funding_source" => Ok(Self::FundingSource),
            "account" => Ok(Self::Account),
            "unknown" => Ok(Self::Unknown),
            s => Err(ConversionError(format!("Invalid resource type: {s}"))),
        }
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid resource type: {value}. But this conversion cannot fail. Defaulting to Unknown");
            ResourceType::Unknown
        })
    }
}

//--------------------------------------    NewWebhookEvent    -------------------------------------------------------
/// A webhook event as constructed by the receiver, before it has been persisted.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    /// The provider-assigned event identifier
    pub event_id: EventId,
    /// The normalized topic string
    pub event_type: String,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub resource_uri: Option<String>,
    /// The raw provider topic string, before normalization
    pub topic: String,
    /// The provider-asserted time of the event
    pub event_timestamp: Option<DateTime<Utc>>,
    pub payload: Value,
    pub payload_size: i64,
    pub signature: Option<String>,
    pub signature_valid: bool,
    pub source_ip: Option<String>,
}

//--------------------------------------      WebhookEvent     -------------------------------------------------------
/// A persisted webhook event, including its deduplication and processing lifecycle fields.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEvent {
    pub id: i64,
    pub event_id: EventId,
    pub event_type: String,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub resource_uri: Option<String>,
    pub topic: String,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub payload: Json<Value>,
    pub payload_size: i64,
    pub signature: Option<String>,
    pub signature_valid: bool,
    pub source_ip: Option<String>,
    pub is_duplicate: bool,
    /// The number of times this event id has arrived after the first time
    pub duplicate_count: i64,
    pub processing_state: ProcessingState,
    pub processing_attempts: i64,
    pub last_processing_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<i64>,
    pub quarantined_at: Option<DateTime<Utc>>,
    pub quarantine_reason: Option<String>,
}

impl WebhookEvent {
    /// The best available timestamp for the event: the provider-asserted time if present, otherwise the receipt time.
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.event_timestamp.unwrap_or(self.received_at)
    }
}

//--------------------------------------     FailedWebhook     -------------------------------------------------------
/// A forensic record of a webhook request that could not be turned into an event record. Always written best-effort;
/// the provider still receives a success acknowledgement.
#[derive(Debug, Clone, FromRow)]
pub struct FailedWebhook {
    pub id: i64,
    pub received_at: DateTime<Utc>,
    pub source_ip: Option<String>,
    pub error: String,
    pub raw_body: String,
}

#[derive(Debug, Clone)]
pub struct NewFailedWebhook {
    pub source_ip: Option<String>,
    pub error: String,
    pub raw_body: String,
}

//--------------------------------------     InstanceStatus    -------------------------------------------------------
/// The status of a journey instance.
///
/// Transitions are monotonic and one-directional: `active → {completed, failed, abandoned}`, or
/// `active → stuck → {active, completed, failed, abandoned}`. No transition leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Stuck,
    Completed,
    Failed,
    Abandoned,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Abandoned)
    }
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Active => "active",
            InstanceStatus::Stuck => "stuck",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

impl FromStr for InstanceStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "stuck" => Ok(Self::Stuck),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            s => Err(ConversionError(format!("Invalid instance status: {s}"))),
        }
    }
}

//--------------------------------------    JourneyInstance    -------------------------------------------------------
/// One run of a journey definition against one resource.
#[derive(Debug, Clone, FromRow)]
pub struct JourneyInstance {
    pub id: i64,
    pub definition_id: i64,
    /// The definition version captured at creation, so in-flight instances are unaffected by later definition edits
    pub definition_version: i64,
    pub resource_id: String,
    pub resource_type: ResourceType,
    /// Denormalized snapshot for display purposes
    pub resource_metadata: Json<Value>,
    pub status: InstanceStatus,
    pub start_time: DateTime<Utc>,
    pub last_event_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_step_index: i64,
    /// Ordered names of the expected steps completed so far
    pub completed_steps: Json<Vec<String>>,
    pub progress_percentage: i64,
    pub total_duration_ms: Option<i64>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub confidence_score: i64,
    pub risk_score: i64,
    pub risk_factors: Json<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewJourneyInstance {
    pub definition_id: i64,
    pub definition_version: i64,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub resource_metadata: Value,
    pub start_time: DateTime<Utc>,
    pub last_event_time: DateTime<Utc>,
}

//--------------------------------------      JourneyStep      -------------------------------------------------------
/// An append-only log entry of one event applied to one journey instance. Steps are immutable once written.
#[derive(Debug, Clone, FromRow)]
pub struct JourneyStep {
    pub id: i64,
    pub instance_id: i64,
    /// Monotonic per instance, or [`OUT_OF_ORDER_SEQUENCE`] for out-of-order arrivals
    pub sequence: i64,
    pub step_name: String,
    pub event_id: EventId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub duration_from_start_ms: i64,
    pub duration_from_previous_ms: i64,
    /// Whether the event matched a step declared in the journey definition
    pub expected: bool,
    /// Whether the event arrived within the matched step's timing window
    pub on_time: bool,
    pub event_metadata: Json<Value>,
}

#[derive(Debug, Clone)]
pub struct NewJourneyStep {
    pub instance_id: i64,
    pub sequence: i64,
    pub step_name: String,
    pub event_id: EventId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub duration_from_start_ms: i64,
    pub duration_from_previous_ms: i64,
    pub expected: bool,
    pub on_time: bool,
    pub event_metadata: Value,
}

impl NewJourneyStep {
    /// The bookkeeping step written when an instance is created.
    pub fn journey_started(instance_id: i64, event: &WebhookEvent, expected: bool) -> Self {
        Self {
            instance_id,
            sequence: 0,
            step_name: "Journey Started".to_string(),
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.effective_timestamp(),
            duration_from_start_ms: 0,
            duration_from_previous_ms: 0,
            expected,
            on_time: true,
            event_metadata: Value::Object(Default::default()),
        }
    }
}

//--------------------------------------    TransferStatus     -------------------------------------------------------
/// Canonical status of a transfer record, derived from the fixed event-type mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Processed,
    Cancelled,
    Failed,
    Unknown,
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processed => "processed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Failed => "failed",
            TransferStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

//--------------------------------------    TransferRecord     -------------------------------------------------------
/// The domain transaction record owned by this subsystem for transfer resources. The transfer processor
/// finds-or-creates these and mutates their status as events arrive.
#[derive(Debug, Clone, FromRow)]
pub struct TransferRecord {
    pub id: i64,
    pub transfer_id: String,
    pub customer_id: Option<String>,
    pub status: TransferStatus,
    pub failure_reason: Option<String>,
    pub failure_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Raw events applied to this transfer, oldest first
    pub audit_trail: Json<Vec<Value>>,
}

/// The mutation a transfer event translates into.
#[derive(Debug, Clone)]
pub struct TransferUpdate {
    pub status: TransferStatus,
    pub failure_reason: Option<String>,
    pub failure_code: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

//--------------------------------------   CustomerRelation    -------------------------------------------------------
/// A relation entry linking a customer id to an event. The subsystem does not own a customer table; these entries are
/// the only customer-domain writes it makes.
#[derive(Debug, Clone, FromRow)]
pub struct CustomerRelation {
    pub id: i64,
    pub customer_id: String,
    pub event_id: EventId,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn processing_state_round_trips() {
        for state in [
            ProcessingState::Received,
            ProcessingState::Queued,
            ProcessingState::Processing,
            ProcessingState::Completed,
            ProcessingState::Failed,
            ProcessingState::Quarantined,
        ] {
            assert_eq!(state.to_string().parse::<ProcessingState>().unwrap(), state);
        }
        assert!("bogus".parse::<ProcessingState>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!InstanceStatus::Active.is_terminal());
        assert!(!InstanceStatus::Stuck.is_terminal());
        assert!(InstanceStatus::Completed.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(InstanceStatus::Abandoned.is_terminal());
    }
}
