//! Deduplication service behaviour: counting, durable fallback and eviction.

mod support;

use chrono::Duration;
use journey_engine::{dedup::DeduplicationService, db_types::EventId, traits::EventManagement, DedupStatus};
use support::{new_arrival, new_test_db};

#[tokio::test]
async fn counts_start_at_zero_and_increment() {
    let db = new_test_db().await;
    let dedup = DeduplicationService::new(db, Duration::days(7));
    let id = EventId("ev_1".into());

    assert_eq!(dedup.check(&id).await.unwrap(), DedupStatus { duplicate: false, count: 0 });
    assert_eq!(dedup.check(&id).await.unwrap(), DedupStatus { duplicate: true, count: 1 });
    assert_eq!(dedup.check(&id).await.unwrap(), DedupStatus { duplicate: true, count: 2 });
}

#[tokio::test]
async fn durable_store_catches_duplicates_after_restart() {
    let db = new_test_db().await;
    let arrival = new_arrival("ev_2", "transfer_created", "tr_1", "https://api.example.com/transfers/tr_1");
    db.record_event_arrival(arrival).await.unwrap();

    // A fresh service models a process restart: the in-memory tier is empty but the store is authoritative
    let dedup = DeduplicationService::new(db, Duration::days(7));
    let status = dedup.check(&EventId("ev_2".into())).await.unwrap();
    assert!(status.duplicate);
    assert_eq!(status.count, 1, "the cache entry is seeded from the stored duplicate counter");
}

#[tokio::test]
async fn eviction_is_a_memory_bound_not_a_correctness_guarantee() {
    let db = new_test_db().await;
    let dedup = DeduplicationService::new(db, Duration::milliseconds(10));
    let id = EventId("ev_3".into());

    assert!(!dedup.check(&id).await.unwrap().duplicate);
    assert_eq!(dedup.tracked_entries().await, 1);
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    assert_eq!(dedup.evict_expired().await, 1);
    assert_eq!(dedup.tracked_entries().await, 0);
    // The event was never persisted, so after eviction it is treated as new again
    assert!(!dedup.check(&id).await.unwrap().duplicate);
}
