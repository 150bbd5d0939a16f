//! End-to-end journey tracker behaviour against a scratch SQLite store.

mod support;

use chrono::{Duration, Utc};
use journey_engine::{
    db_types::{InstanceStatus, ResourceType, OUT_OF_ORDER_SEQUENCE},
    default_definitions,
    events::EventProducers,
    journeys::{ConflictResolution, EventMatcher, JourneyConfig, JourneyThresholds, NewJourneyDefinition},
    traits::JourneyManagement,
    JourneyTracker,
    SqliteDatabase,
};
use journey_engine::pipeline::ProcessingContext;
use support::{make_event, new_test_db};

async fn seed_defaults(db: &SqliteDatabase) {
    for definition in default_definitions() {
        db.seed_definition(definition).await.expect("Error seeding definition");
    }
}

fn simple_definition(name: &str, conflict_resolution: ConflictResolution, cap: i64) -> NewJourneyDefinition {
    NewJourneyDefinition {
        name: name.to_string(),
        version: 1,
        category: "transfers".to_string(),
        active: true,
        tags: vec![],
        config: JourneyConfig {
            start_events: vec![EventMatcher::for_resource("transfer_created", ResourceType::Transfer)],
            end_events: vec![EventMatcher::new("transfer_completed")],
            failure_events: vec![EventMatcher::new("transfer_failed")],
            expected_steps: vec![],
            timeout_minutes: Some(4320),
            allow_multiple_active: matches!(conflict_resolution, ConflictResolution::Parallel),
            max_active_per_resource: cap,
            conflict_resolution,
        },
        thresholds: JourneyThresholds::default(),
    }
}

#[tokio::test]
async fn standard_ach_transfer_lifecycle() {
    let db = new_test_db().await;
    seed_defaults(&db).await;
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();
    let t0 = Utc::now() - Duration::minutes(10);

    let created = make_event("ev_1", "transfer_created", ResourceType::Transfer, "tr_1", t0);
    let summary = tracker.process_event(&created, &ctx).await.expect("Error processing start event");
    assert_eq!(summary.instances_started, 1);

    let open = db.fetch_open_instances_for_resource("tr_1").await.unwrap();
    assert_eq!(open.len(), 1);
    let instance = &open[0];
    assert_eq!(instance.status, InstanceStatus::Active);
    assert_eq!(instance.current_step_index, 0);
    assert!(instance.completed_steps.0.is_empty());
    assert_eq!(instance.progress_percentage, 0);
    assert_eq!(instance.confidence_score, 50);
    assert!(instance.estimated_completion_time.is_some());
    let steps = db.fetch_steps_for_instance(instance.id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_name, "Journey Started");
    assert_eq!(steps[0].sequence, 0);
    assert_eq!(steps[0].duration_from_start_ms, 0);

    let completed = make_event("ev_2", "transfer_completed", ResourceType::Transfer, "tr_1", t0 + Duration::minutes(5));
    tracker.process_event(&completed, &ctx).await.expect("Error processing end event");

    let instance = db.fetch_instance(instance.id).await.unwrap().expect("Instance vanished");
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.total_duration_ms, Some(300_000));
    assert_eq!(instance.end_time, Some(t0 + Duration::minutes(5)));
    assert_eq!(instance.progress_percentage, 100);
    let steps = db.fetch_steps_for_instance(instance.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1].sequence, 1);
    assert!(steps[1].expected);
    assert!(steps[1].on_time);
    assert_eq!(steps[1].duration_from_start_ms, 300_000);
}

#[tokio::test]
async fn newest_conflict_resolution_abandons_the_first_instance() {
    let db = new_test_db().await;
    db.seed_definition(simple_definition("Expedited Transfer", ConflictResolution::Newest, 1))
        .await
        .expect("Error seeding definition")
        .expect("Definition was not stored");
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();
    let t0 = Utc::now() - Duration::minutes(5);

    let first = make_event("ev_1", "transfer_created", ResourceType::Transfer, "tr_9", t0);
    tracker.process_event(&first, &ctx).await.unwrap();
    let second = make_event("ev_2", "transfer_created", ResourceType::Transfer, "tr_9", t0 + Duration::minutes(1));
    tracker.process_event(&second, &ctx).await.unwrap();

    let open = db.fetch_open_instances_for_resource("tr_9").await.unwrap();
    assert_eq!(open.len(), 1, "exactly one instance should remain active");
    let counts = db.instance_status_counts().await.unwrap();
    let abandoned = counts.iter().find(|(s, _)| *s == InstanceStatus::Abandoned).map(|(_, n)| *n);
    assert_eq!(abandoned, Some(1));
}

#[tokio::test]
async fn parallel_conflict_resolution_caps_active_instances() {
    let db = new_test_db().await;
    db.seed_definition(simple_definition("Parallel Transfer", ConflictResolution::Parallel, 2))
        .await
        .unwrap()
        .unwrap();
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();
    let t0 = Utc::now() - Duration::minutes(5);

    for (i, id) in ["ev_1", "ev_2", "ev_3"].iter().enumerate() {
        let event =
            make_event(id, "transfer_created", ResourceType::Transfer, "tr_p", t0 + Duration::seconds(i as i64));
        tracker.process_event(&event, &ctx).await.unwrap();
    }
    let open = db.fetch_open_instances_for_resource("tr_p").await.unwrap();
    assert_eq!(open.len(), 2, "creation beyond the cap must be rejected");
}

#[tokio::test]
async fn out_of_order_events_are_recorded_but_do_not_advance() {
    let db = new_test_db().await;
    seed_defaults(&db).await;
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();
    let t0 = Utc::now() - Duration::minutes(30);

    let created = make_event("ev_1", "transfer_created", ResourceType::Transfer, "tr_2", t0);
    tracker.process_event(&created, &ctx).await.unwrap();
    // Timestamped before the journey started
    let stale = make_event("ev_0", "transfer_pending", ResourceType::Transfer, "tr_2", t0 - Duration::minutes(10));
    tracker.process_event(&stale, &ctx).await.unwrap();

    let open = db.fetch_open_instances_for_resource("tr_2").await.unwrap();
    let instance = &open[0];
    assert_eq!(instance.status, InstanceStatus::Active);
    assert_eq!(instance.current_step_index, 0);
    assert_eq!(instance.progress_percentage, 0);
    let steps = db.fetch_steps_for_instance(instance.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    let unsequenced = &steps[1];
    assert_eq!(unsequenced.sequence, OUT_OF_ORDER_SEQUENCE);
    assert_eq!(unsequenced.event_metadata.0["out_of_order"], serde_json::json!(true));
}

#[tokio::test]
async fn stale_instances_go_stuck_on_any_event_for_the_resource() {
    let db = new_test_db().await;
    seed_defaults(&db).await;
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();

    let created = make_event("ev_1", "transfer_created", ResourceType::Transfer, "tr_3", Utc::now());
    tracker.process_event(&created, &ctx).await.unwrap();
    let open = db.fetch_open_instances_for_resource("tr_3").await.unwrap();
    let mut instance = open[0].clone();
    // Age the instance past the stuck threshold (half of the 4320 minute timeout)
    instance.last_event_time = Utc::now() - Duration::minutes(2200);
    db.update_instance(&instance).await.unwrap();

    // The sweep is resource-scoped, so an event that matches no definition at all still flushes it out
    let unrelated = make_event("ev_2", "account_suspended", ResourceType::Account, "tr_3", Utc::now());
    tracker.process_event(&unrelated, &ctx).await.unwrap();

    let instance = db.fetch_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.status, InstanceStatus::Stuck);
    assert_eq!(instance.risk_score, 75);
    assert!(!instance.risk_factors.0.is_empty());
}

#[tokio::test]
async fn accepted_event_returns_a_stuck_instance_to_active() {
    let db = new_test_db().await;
    seed_defaults(&db).await;
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();
    let t0 = Utc::now() - Duration::minutes(20);

    let created = make_event("ev_1", "transfer_created", ResourceType::Transfer, "tr_4", t0);
    tracker.process_event(&created, &ctx).await.unwrap();
    let open = db.fetch_open_instances_for_resource("tr_4").await.unwrap();
    let mut instance = open[0].clone();
    instance.status = InstanceStatus::Stuck;
    instance.risk_score = 75;
    db.update_instance(&instance).await.unwrap();

    let pending = make_event("ev_2", "transfer_pending", ResourceType::Transfer, "tr_4", t0 + Duration::minutes(5));
    tracker.process_event(&pending, &ctx).await.unwrap();

    let instance = db.fetch_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.status, InstanceStatus::Active);
    assert_eq!(instance.current_step_index, 1);
}

#[tokio::test]
async fn reprocessing_the_same_event_is_idempotent() {
    let db = new_test_db().await;
    seed_defaults(&db).await;
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();
    let t0 = Utc::now() - Duration::minutes(10);

    let created = make_event("ev_1", "transfer_created", ResourceType::Transfer, "tr_5", t0);
    tracker.process_event(&created, &ctx).await.unwrap();
    // A retry delivers the same event a second time
    tracker.process_event(&created, &ctx).await.unwrap();

    let open = db.fetch_open_instances_for_resource("tr_5").await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].current_step_index, 0);
    let steps = db.fetch_steps_for_instance(open[0].id).await.unwrap();
    assert_eq!(steps.len(), 1, "no second step may be written for the same event id");
}

#[tokio::test]
async fn repeated_terminal_event_is_rejected_as_high_severity_conflict() {
    let db = new_test_db().await;
    seed_defaults(&db).await;
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let ctx = ProcessingContext::new();
    let t0 = Utc::now() - Duration::minutes(10);

    let created = make_event("ev_1", "transfer_created", ResourceType::Transfer, "tr_6", t0);
    tracker.process_event(&created, &ctx).await.unwrap();
    let failed = make_event("ev_2", "transfer_failed", ResourceType::Transfer, "tr_6", t0 + Duration::minutes(1));
    tracker.process_event(&failed, &ctx).await.unwrap();
    let instance_id = {
        let counts = db.instance_status_counts().await.unwrap();
        assert!(counts.iter().any(|(s, n)| *s == InstanceStatus::Failed && *n == 1));
        // The failed instance is terminal; re-open it artificially to provoke the conflict path
        let all = db.fetch_open_instances_for_resource("tr_6").await.unwrap();
        assert!(all.is_empty());
        let mut instance = db.fetch_instance(1).await.unwrap().unwrap();
        instance.status = InstanceStatus::Active;
        db.update_instance(&instance).await.unwrap();
        instance.id
    };

    let repeat = make_event("ev_3", "transfer_failed", ResourceType::Transfer, "tr_6", t0 + Duration::minutes(2));
    tracker.process_event(&repeat, &ctx).await.unwrap();

    let instance = db.fetch_instance(instance_id).await.unwrap().unwrap();
    // The repeated terminal event must not have been applied
    assert_eq!(instance.current_step_index, 1);
    let steps = db.fetch_steps_for_instance(instance_id).await.unwrap();
    let rejected = steps.iter().find(|s| s.event_id.as_str() == "ev_3").expect("conflict must still be recorded");
    assert_eq!(rejected.sequence, OUT_OF_ORDER_SEQUENCE);
    assert_eq!(rejected.event_metadata.0["conflict_severity"], serde_json::json!("high"));
}
