//! The built-in journey definitions.
//!
//! Seeded at startup when no active definition with the same name exists. These are plain data; operators publish
//! new versions through the store rather than editing code.

use std::collections::BTreeMap;

use crate::{
    db_types::ResourceType,
    journeys::{
        ConflictResolution,
        EventMatcher,
        ExpectedStep,
        JourneyConfig,
        JourneyThresholds,
        NewJourneyDefinition,
    },
};

pub fn default_definitions() -> Vec<NewJourneyDefinition> {
    vec![standard_ach_transfer(), customer_onboarding(), funding_source_verification()]
}

fn standard_ach_transfer() -> NewJourneyDefinition {
    NewJourneyDefinition {
        name: "Standard ACH Transfer".to_string(),
        version: 1,
        category: "transfers".to_string(),
        active: true,
        tags: vec!["ach".to_string(), "transfer".to_string()],
        config: JourneyConfig {
            start_events: vec![EventMatcher::for_resource("transfer_created", ResourceType::Transfer)],
            end_events: vec![EventMatcher::new("transfer_completed")],
            failure_events: vec![
                EventMatcher::new("transfer_failed"),
                EventMatcher::new("transfer_cancelled"),
                EventMatcher::new("transfer_returned"),
            ],
            expected_steps: vec![
                ExpectedStep {
                    name: "Transfer Created".to_string(),
                    event_type: "transfer_created".to_string(),
                    required: true,
                    min_minutes: None,
                    max_minutes: None,
                    retryable: false,
                },
                ExpectedStep {
                    name: "Transfer Pending".to_string(),
                    event_type: "transfer_pending".to_string(),
                    required: false,
                    min_minutes: None,
                    max_minutes: Some(60),
                    retryable: true,
                },
                ExpectedStep {
                    name: "Transfer Completed".to_string(),
                    event_type: "transfer_completed".to_string(),
                    required: true,
                    min_minutes: None,
                    max_minutes: Some(4320),
                    retryable: false,
                },
            ],
            timeout_minutes: Some(4320),
            allow_multiple_active: false,
            max_active_per_resource: 1,
            conflict_resolution: ConflictResolution::Oldest,
        },
        thresholds: JourneyThresholds {
            target_duration_minutes: 1440,
            warning_duration_minutes: 2880,
            critical_duration_minutes: 4320,
            target_completion_rate: 0.98,
            max_failure_rate: 0.02,
        },
    }
}

fn customer_onboarding() -> NewJourneyDefinition {
    NewJourneyDefinition {
        name: "Customer Onboarding".to_string(),
        version: 1,
        category: "customers".to_string(),
        active: true,
        tags: vec!["customer".to_string(), "verification".to_string()],
        config: JourneyConfig {
            start_events: vec![EventMatcher::for_resource("customer_created", ResourceType::Customer)],
            end_events: vec![EventMatcher::new("customer_verified")],
            failure_events: vec![EventMatcher::new("customer_suspended")],
            expected_steps: vec![
                ExpectedStep {
                    name: "Customer Created".to_string(),
                    event_type: "customer_created".to_string(),
                    required: true,
                    min_minutes: None,
                    max_minutes: None,
                    retryable: false,
                },
                ExpectedStep {
                    name: "Document Requested".to_string(),
                    event_type: "verification_document_needed".to_string(),
                    required: false,
                    min_minutes: None,
                    max_minutes: Some(1440),
                    retryable: true,
                },
                ExpectedStep {
                    name: "Customer Verified".to_string(),
                    event_type: "customer_verified".to_string(),
                    required: true,
                    min_minutes: None,
                    max_minutes: Some(10080),
                    retryable: false,
                },
            ],
            timeout_minutes: Some(10080),
            allow_multiple_active: false,
            max_active_per_resource: 1,
            conflict_resolution: ConflictResolution::Oldest,
        },
        thresholds: JourneyThresholds {
            target_duration_minutes: 2880,
            warning_duration_minutes: 7200,
            critical_duration_minutes: 10080,
            target_completion_rate: 0.9,
            max_failure_rate: 0.1,
        },
    }
}

fn funding_source_verification() -> NewJourneyDefinition {
    let mut added = EventMatcher::for_resource("funding_source_added", ResourceType::FundingSource);
    // Only bank accounts go through micro-deposit verification
    added.conditions = BTreeMap::from([("type".to_string(), serde_json::json!("bank"))]);
    NewJourneyDefinition {
        name: "Funding Source Verification".to_string(),
        version: 1,
        category: "funding".to_string(),
        active: true,
        tags: vec!["funding-source".to_string(), "verification".to_string()],
        config: JourneyConfig {
            start_events: vec![added],
            end_events: vec![EventMatcher::new("funding_source_verified")],
            failure_events: vec![EventMatcher::new("funding_source_removed")],
            expected_steps: vec![
                ExpectedStep {
                    name: "Funding Source Added".to_string(),
                    event_type: "funding_source_added".to_string(),
                    required: true,
                    min_minutes: None,
                    max_minutes: None,
                    retryable: false,
                },
                ExpectedStep {
                    name: "Micro-deposits Initiated".to_string(),
                    event_type: "microdeposits_added".to_string(),
                    required: false,
                    min_minutes: None,
                    max_minutes: Some(2880),
                    retryable: true,
                },
                ExpectedStep {
                    name: "Funding Source Verified".to_string(),
                    event_type: "funding_source_verified".to_string(),
                    required: true,
                    min_minutes: None,
                    max_minutes: Some(7200),
                    retryable: false,
                },
            ],
            timeout_minutes: Some(7200),
            allow_multiple_active: true,
            max_active_per_resource: 2,
            conflict_resolution: ConflictResolution::Parallel,
        },
        thresholds: JourneyThresholds::default(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtin_definitions_are_valid() {
        let definitions = default_definitions();
        assert_eq!(definitions.len(), 3);
        for definition in definitions {
            definition.config.validate().unwrap_or_else(|e| panic!("'{}' is malformed: {e}", definition.name));
        }
    }
}
