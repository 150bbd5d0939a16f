//! Pipeline behaviour: success, retry with backoff, quarantine and short-circuits, against a scratch SQLite store.

mod support;

use std::time::Duration;

use journey_engine::{
    db_types::{EventId, NewWebhookEvent, ProcessingState, ResourceType, TransferStatus},
    default_definitions,
    events::EventProducers,
    pipeline::{default_processors, EventPipeline, ProcessOutcome},
    traits::{EventManagement, JourneyManagement, TransferManagement},
    JourneyTracker,
};
use serde_json::json;
use support::{new_arrival, new_test_db, FlakyStore};

fn pipeline_over<B>(db: B) -> EventPipeline<B>
where B: EventManagement + TransferManagement + JourneyManagement + Clone {
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    EventPipeline::new(db, tracker, EventProducers::default(), default_processors())
}

#[tokio::test]
async fn successful_event_completes_and_mutates_domain_state() {
    let db = new_test_db().await;
    for definition in default_definitions() {
        db.seed_definition(definition).await.unwrap();
    }
    let pipeline = pipeline_over(db.clone());
    let arrival = new_arrival("ev_ok", "transfer_created", "tr_100", "https://api.example.com/transfers/tr_100");
    db.record_event_arrival(arrival).await.unwrap();

    let outcome = pipeline.process_event(&EventId("ev_ok".into())).await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    let event = db.fetch_event_by_event_id(&EventId("ev_ok".into())).await.unwrap().unwrap();
    assert_eq!(event.processing_state, ProcessingState::Completed);
    assert_eq!(event.processing_attempts, 1);
    assert!(event.processed_at.is_some());
    assert!(event.processing_duration_ms.is_some());

    let transfer = db.fetch_transfer("tr_100").await.unwrap().expect("Transfer record was not created");
    assert_eq!(transfer.status, TransferStatus::Pending);
    assert_eq!(transfer.audit_trail.0.len(), 1);

    let open = db.fetch_open_instances_for_resource("tr_100").await.unwrap();
    assert_eq!(open.len(), 1, "a journey instance should have been started");
}

#[tokio::test]
async fn transient_failures_retry_with_backoff_then_quarantine() {
    let db = new_test_db().await;
    let flaky = FlakyStore::new(db.clone(), 10);
    let pipeline = pipeline_over(flaky);
    let arrival = new_arrival("ev_flaky", "transfer_created", "tr_200", "https://api.example.com/transfers/tr_200");
    db.record_event_arrival(arrival).await.unwrap();
    let event_id = EventId("ev_flaky".into());

    let outcome = pipeline.process_event(&event_id).await;
    assert_eq!(outcome, ProcessOutcome::Retry { delay: Duration::from_secs(2) });
    let event = db.fetch_event_by_event_id(&event_id).await.unwrap().unwrap();
    assert_eq!(event.processing_state, ProcessingState::Queued);
    assert_eq!(event.processing_attempts, 1);
    assert!(event.last_processing_error.as_deref().unwrap_or_default().contains("injected transient failure"));

    let outcome = pipeline.process_event(&event_id).await;
    assert_eq!(outcome, ProcessOutcome::Retry { delay: Duration::from_secs(4) });

    let outcome = pipeline.process_event(&event_id).await;
    assert_eq!(outcome, ProcessOutcome::Quarantined);
    let event = db.fetch_event_by_event_id(&event_id).await.unwrap().unwrap();
    assert_eq!(event.processing_state, ProcessingState::Quarantined);
    assert_eq!(event.processing_attempts, 3);
    assert!(event.quarantined_at.is_some());
    let reason = event.quarantine_reason.unwrap_or_default();
    assert!(reason.contains("3 attempt"), "quarantine reason should mention the attempt count: {reason}");
}

#[tokio::test]
async fn validation_failures_are_quarantined_without_retries() {
    let db = new_test_db().await;
    let pipeline = pipeline_over(db.clone());
    // A transfer event with no resource reference at all cannot be processed, ever
    let arrival = NewWebhookEvent {
        event_id: EventId("ev_invalid".into()),
        event_type: "transfer_created".to_string(),
        resource_type: ResourceType::Transfer,
        resource_id: None,
        resource_uri: None,
        topic: "transfer_created".to_string(),
        event_timestamp: Some(chrono::Utc::now()),
        payload: json!({}),
        payload_size: 2,
        signature: None,
        signature_valid: false,
        source_ip: None,
    };
    db.record_event_arrival(arrival).await.unwrap();

    let outcome = pipeline.process_event(&EventId("ev_invalid".into())).await;
    assert_eq!(outcome, ProcessOutcome::Quarantined);
    let event = db.fetch_event_by_event_id(&EventId("ev_invalid".into())).await.unwrap().unwrap();
    assert_eq!(event.processing_state, ProcessingState::Quarantined);
    assert_eq!(event.processing_attempts, 1);
}

#[tokio::test]
async fn completed_events_are_not_reprocessed() {
    let db = new_test_db().await;
    let pipeline = pipeline_over(db.clone());
    let arrival = new_arrival("ev_done", "transfer_created", "tr_300", "https://api.example.com/transfers/tr_300");
    db.record_event_arrival(arrival).await.unwrap();
    let event_id = EventId("ev_done".into());
    db.complete_event(&event_id, 5).await.unwrap();

    let outcome = pipeline.process_event(&event_id).await;
    assert_eq!(outcome, ProcessOutcome::Skipped);
    let event = db.fetch_event_by_event_id(&event_id).await.unwrap().unwrap();
    assert_eq!(event.processing_attempts, 0, "a completed event must not be attempted again");
}

#[tokio::test]
async fn unknown_event_types_still_complete() {
    let db = new_test_db().await;
    let pipeline = pipeline_over(db.clone());
    let arrival = new_arrival("ev_odd", "account_suspended", "ac_1", "https://api.example.com/accounts/ac_1");
    db.record_event_arrival(arrival).await.unwrap();

    // No processor claims account events; that is not fatal
    let outcome = pipeline.process_event(&EventId("ev_odd".into())).await;
    assert_eq!(outcome, ProcessOutcome::Completed);
}
