//! Journey definition data objects.
//!
//! A journey definition is versioned, data-driven configuration: start/end/failure event matchers, expected step
//! sequencing with timing windows, a per-resource concurrency policy and SLA thresholds. Definitions are validated
//! when they are loaded or seeded, never interpreted ad hoc at match time, and are read-only at runtime.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};
use thiserror::Error;

use crate::db_types::{ResourceType, WebhookEvent};

#[derive(Debug, Clone, Error)]
pub enum JourneyConfigError {
    #[error("A journey definition must declare at least one start event")]
    NoStartEvents,
    #[error("Event matcher has an empty event type")]
    EmptyEventType,
    #[error("Expected step '{0}' has an empty event type")]
    EmptyStepEventType(String),
    #[error("Expected step '{0}' has min_minutes > max_minutes")]
    InvalidStepWindow(String),
    #[error("timeout_minutes must be positive")]
    InvalidTimeout,
    #[error("max_active_per_resource must be at least 1")]
    InvalidActiveCap,
}

//--------------------------------------  ConflictResolution  --------------------------------------------------------
/// What happens when a start event arrives while instances are already active for the same (definition, resource)
/// pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the existing instance; the new start is skipped.
    Oldest,
    /// Abandon existing active instances, then create the new one.
    Newest,
    /// Allow up to `max_active_per_resource` concurrent instances.
    Parallel,
}

//--------------------------------------     EventMatcher     --------------------------------------------------------
/// Matches an event by type, optionally narrowed by resource type and field-level conditions on the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMatcher {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    /// Dot-path payload conditions that must all hold, e.g. `{"status": "pending"}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, Value>,
}

impl EventMatcher {
    pub fn new<S: Into<String>>(event_type: S) -> Self {
        Self { event_type: event_type.into(), resource_type: None, conditions: BTreeMap::new() }
    }

    pub fn for_resource<S: Into<String>>(event_type: S, resource_type: ResourceType) -> Self {
        Self { event_type: event_type.into(), resource_type: Some(resource_type), conditions: BTreeMap::new() }
    }

    pub fn matches(&self, event: &WebhookEvent) -> bool {
        if self.event_type != event.event_type {
            return false;
        }
        if let Some(rt) = self.resource_type {
            if rt != event.resource_type {
                return false;
            }
        }
        self.conditions.iter().all(|(path, want)| field_at_path(&event.payload.0, path) == Some(want))
    }
}

/// Walks a dot-delimited path into a JSON value.
fn field_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

//--------------------------------------     ExpectedStep     --------------------------------------------------------
/// A named, optionally time-bounded point in a journey definition that a matching event can satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedStep {
    pub name: String,
    pub event_type: String,
    #[serde(default)]
    pub required: bool,
    /// Earliest acceptable arrival, in minutes elapsed from the journey start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_minutes: Option<i64>,
    /// Latest acceptable arrival, in minutes elapsed from the journey start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_minutes: Option<i64>,
    /// Whether repeated arrivals of this step's event type are legitimate
    #[serde(default)]
    pub retryable: bool,
}

impl ExpectedStep {
    /// Evaluates on-time-ness for an arrival `elapsed_minutes` after the journey started. Absent bounds are treated
    /// as always satisfied in that direction.
    pub fn on_time(&self, elapsed_minutes: i64) -> bool {
        self.min_minutes.map_or(true, |min| elapsed_minutes >= min)
            && self.max_minutes.map_or(true, |max| elapsed_minutes <= max)
    }
}

//--------------------------------------     JourneyConfig    --------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyConfig {
    pub start_events: Vec<EventMatcher>,
    #[serde(default)]
    pub end_events: Vec<EventMatcher>,
    #[serde(default)]
    pub failure_events: Vec<EventMatcher>,
    #[serde(default)]
    pub expected_steps: Vec<ExpectedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<i64>,
    #[serde(default)]
    pub allow_multiple_active: bool,
    #[serde(default = "default_active_cap")]
    pub max_active_per_resource: i64,
    pub conflict_resolution: ConflictResolution,
}

fn default_active_cap() -> i64 {
    1
}

impl JourneyConfig {
    /// Rejects malformed configuration at load time.
    pub fn validate(&self) -> Result<(), JourneyConfigError> {
        if self.start_events.is_empty() {
            return Err(JourneyConfigError::NoStartEvents);
        }
        let matchers = self.start_events.iter().chain(&self.end_events).chain(&self.failure_events);
        for matcher in matchers {
            if matcher.event_type.trim().is_empty() {
                return Err(JourneyConfigError::EmptyEventType);
            }
        }
        for step in &self.expected_steps {
            if step.event_type.trim().is_empty() {
                return Err(JourneyConfigError::EmptyStepEventType(step.name.clone()));
            }
            if let (Some(min), Some(max)) = (step.min_minutes, step.max_minutes) {
                if min > max {
                    return Err(JourneyConfigError::InvalidStepWindow(step.name.clone()));
                }
            }
        }
        if self.timeout_minutes.map_or(false, |t| t <= 0) {
            return Err(JourneyConfigError::InvalidTimeout);
        }
        if self.max_active_per_resource < 1 {
            return Err(JourneyConfigError::InvalidActiveCap);
        }
        Ok(())
    }

    /// Whether any matcher or expected step in this configuration references the event's type. Used to select
    /// applicable definitions for an incoming event.
    pub fn references(&self, event: &WebhookEvent) -> bool {
        self.start_events.iter().any(|m| m.matches(event))
            || self.end_events.iter().any(|m| m.matches(event))
            || self.failure_events.iter().any(|m| m.matches(event))
            || self.expected_steps.iter().any(|s| s.event_type == event.event_type)
    }

    pub fn is_start(&self, event: &WebhookEvent) -> bool {
        self.start_events.iter().any(|m| m.matches(event))
    }

    pub fn is_end(&self, event: &WebhookEvent) -> bool {
        self.end_events.iter().any(|m| m.matches(event))
    }

    pub fn is_failure(&self, event: &WebhookEvent) -> bool {
        self.failure_events.iter().any(|m| m.matches(event))
    }

    pub fn find_expected_step(&self, event_type: &str) -> Option<&ExpectedStep> {
        self.expected_steps.iter().find(|s| s.event_type == event_type)
    }

    /// Whether the given event type terminates an instance (successfully or not).
    pub fn is_terminal_type(&self, event_type: &str) -> bool {
        self.end_events.iter().chain(&self.failure_events).any(|m| m.event_type == event_type)
    }
}

//--------------------------------------   JourneyThresholds  --------------------------------------------------------
/// SLA thresholds used by the analytics layer; carried on the definition, not interpreted by the tracker beyond
/// stuck detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyThresholds {
    pub target_duration_minutes: i64,
    pub warning_duration_minutes: i64,
    pub critical_duration_minutes: i64,
    /// Fraction of started journeys expected to complete, 0.0–1.0
    pub target_completion_rate: f64,
    pub max_failure_rate: f64,
}

impl Default for JourneyThresholds {
    fn default() -> Self {
        Self {
            target_duration_minutes: 60,
            warning_duration_minutes: 120,
            critical_duration_minutes: 240,
            target_completion_rate: 0.95,
            max_failure_rate: 0.05,
        }
    }
}

//--------------------------------------   JourneyDefinition  --------------------------------------------------------
/// A versioned, immutable-once-published journey definition. Only one version per name is active in the normal
/// operating mode.
#[derive(Debug, Clone, FromRow)]
pub struct JourneyDefinition {
    pub id: i64,
    pub name: String,
    pub version: i64,
    pub category: String,
    pub active: bool,
    pub tags: Json<Vec<String>>,
    pub config: Json<JourneyConfig>,
    pub thresholds: Json<JourneyThresholds>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJourneyDefinition {
    pub name: String,
    pub version: i64,
    pub category: String,
    pub active: bool,
    pub tags: Vec<String>,
    pub config: JourneyConfig,
    pub thresholds: JourneyThresholds,
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use sqlx::types::Json;

    use super::*;
    use crate::db_types::{EventId, ProcessingState, WebhookEvent};

    fn event(event_type: &str, resource_type: ResourceType, payload: Value) -> WebhookEvent {
        WebhookEvent {
            id: 1,
            event_id: EventId("ev_1".into()),
            event_type: event_type.to_string(),
            resource_type,
            resource_id: Some("res_1".into()),
            resource_uri: None,
            topic: event_type.to_string(),
            event_timestamp: Some(Utc::now()),
            received_at: Utc::now(),
            payload: Json(payload),
            payload_size: 0,
            signature: None,
            signature_valid: false,
            source_ip: None,
            is_duplicate: false,
            duplicate_count: 0,
            processing_state: ProcessingState::Received,
            processing_attempts: 0,
            last_processing_error: None,
            processed_at: None,
            processing_duration_ms: None,
            quarantined_at: None,
            quarantine_reason: None,
        }
    }

    #[test]
    fn matcher_filters_on_resource_type() {
        let matcher = EventMatcher::for_resource("transfer_created", ResourceType::Transfer);
        assert!(matcher.matches(&event("transfer_created", ResourceType::Transfer, json!({}))));
        assert!(!matcher.matches(&event("transfer_created", ResourceType::Customer, json!({}))));
        assert!(!matcher.matches(&event("transfer_completed", ResourceType::Transfer, json!({}))));
    }

    #[test]
    fn matcher_evaluates_payload_conditions() {
        let mut matcher = EventMatcher::new("transfer_created");
        matcher.conditions.insert("details.method".into(), json!("ach"));
        assert!(matcher.matches(&event("transfer_created", ResourceType::Transfer, json!({"details": {"method": "ach"}}))));
        assert!(!matcher.matches(&event("transfer_created", ResourceType::Transfer, json!({"details": {"method": "wire"}}))));
        assert!(!matcher.matches(&event("transfer_created", ResourceType::Transfer, json!({}))));
    }

    #[test]
    fn step_windows_default_open() {
        let step = ExpectedStep {
            name: "Settled".into(),
            event_type: "transfer_completed".into(),
            required: true,
            min_minutes: Some(5),
            max_minutes: None,
            retryable: false,
        };
        assert!(!step.on_time(2));
        assert!(step.on_time(5));
        assert!(step.on_time(50_000));
    }

    #[test]
    fn validation_rejects_malformed_configs() {
        let mut config = JourneyConfig {
            start_events: vec![],
            end_events: vec![],
            failure_events: vec![],
            expected_steps: vec![],
            timeout_minutes: None,
            allow_multiple_active: false,
            max_active_per_resource: 1,
            conflict_resolution: ConflictResolution::Oldest,
        };
        assert!(matches!(config.validate(), Err(JourneyConfigError::NoStartEvents)));
        config.start_events.push(EventMatcher::new("transfer_created"));
        assert!(config.validate().is_ok());
        config.expected_steps.push(ExpectedStep {
            name: "Backwards".into(),
            event_type: "transfer_pending".into(),
            required: false,
            min_minutes: Some(10),
            max_minutes: Some(5),
            retryable: false,
        });
        assert!(matches!(config.validate(), Err(JourneyConfigError::InvalidStepWindow(_))));
        config.expected_steps.clear();
        config.timeout_minutes = Some(0);
        assert!(matches!(config.validate(), Err(JourneyConfigError::InvalidTimeout)));
    }
}
