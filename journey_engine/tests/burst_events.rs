use std::time::Duration;

use journey_engine::{
    db_types::{EventId, ProcessingState},
    default_definitions,
    events::EventProducers,
    pipeline::{default_processors, EventPipeline, ProcessOutcome},
    traits::{EventManagement, JourneyManagement},
    JourneyTracker,
};
use log::*;

mod support;
use support::{new_arrival, new_test_db};

const NUM_EVENTS: u64 = 20;
const RATE: u64 = 100; // events per second

#[tokio::test]
async fn burst_events() {
    info!("🚀️ Starting event injection test");
    let db = new_test_db().await;
    for definition in default_definitions() {
        db.seed_definition(definition).await.expect("Error seeding definition");
    }
    let tracker = JourneyTracker::new(db.clone(), EventProducers::default());
    let pipeline = EventPipeline::new(db.clone(), tracker, EventProducers::default(), default_processors());

    let delay = Duration::from_millis(1000 / RATE);
    let mut timer = tokio::time::interval(delay);
    info!("🚀️ Injecting {NUM_EVENTS} events");
    for i in 0..NUM_EVENTS {
        timer.tick().await;
        let transfer = format!("tr_{}", (i + 1) % 5);
        let uri = format!("https://api.example.com/transfers/{transfer}");
        let event_id = format!("ev_burst_{i}");
        let arrival = new_arrival(&event_id, "transfer_created", &transfer, &uri);
        db.record_event_arrival(arrival).await.expect("Error recording event");
        let outcome = pipeline.process_event(&EventId(event_id.clone())).await;
        assert_eq!(outcome, ProcessOutcome::Completed, "event {i} did not complete");
    }

    for i in 0..NUM_EVENTS {
        let event_id = EventId(format!("ev_burst_{i}"));
        let event = db.fetch_event_by_event_id(&event_id).await.unwrap().expect("Event vanished");
        assert_eq!(event.processing_state, ProcessingState::Completed);
    }
    info!("🚀️ test complete");
}
