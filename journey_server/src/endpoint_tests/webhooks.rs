use std::sync::Arc;

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web, App};
use chrono::Duration;
use jg_common::Secret;
use journey_engine::{breaker::CircuitBreaker, dedup::DeduplicationService, pipeline::PipelineHandle};

use super::mocks::{stored_event, MockEventStore};
use crate::{
    config::ServerOptions,
    data_objects::WebhookAck,
    helpers::calculate_hmac,
    receiver::WebhookReceiver,
    routes::WebhookEventRoute,
};

const SECRET: &str = "test-webhook-secret";
const SIGNATURE_HEADER: &str = "X-Request-Signature-SHA-256";

fn test_options() -> ServerOptions {
    ServerOptions { use_x_forwarded_for: false, use_forwarded: false, signature_header: SIGNATURE_HEADER.to_string() }
}

/// Posts a body to the webhook route against a receiver built from the given mocks. Returns the response status
/// and the parsed acknowledgement.
async fn post_webhook(
    receiver_store: MockEventStore,
    dedup_store: MockEventStore,
    body: &str,
    signature: Option<String>,
) -> anyhow::Result<(StatusCode, WebhookAck)> {
    let _ = env_logger::try_init();
    let dedup = Arc::new(DeduplicationService::new(dedup_store, Duration::days(7)));
    let breaker = Arc::new(CircuitBreaker::default());
    // Keep the receiving half alive so enqueues during the request succeed
    let (handle, _jobs) = PipelineHandle::channel(4);
    let receiver =
        WebhookReceiver::new(receiver_store, dedup, breaker, handle, Secret::new(SECRET.to_string()), false);
    let app = App::new()
        .app_data(web::Data::new(receiver))
        .app_data(web::Data::new(test_options()))
        .service(WebhookEventRoute::<MockEventStore>::new());
    let service = test::init_service(app).await;
    let mut req = TestRequest::post().uri("/webhook/events").set_payload(body.to_string());
    if let Some(signature) = signature {
        req = req.insert_header((SIGNATURE_HEADER, signature));
    }
    let (_, res) = test::try_call_service(&service, req.to_request())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .into_parts();
    let status = res.status();
    let bytes = res.into_body().try_into_bytes().map_err(|_| anyhow::anyhow!("Could not read response body"))?;
    let ack = serde_json::from_slice(&bytes)?;
    Ok((status, ack))
}

#[actix_web::test]
async fn malformed_bodies_are_still_acknowledged() -> anyhow::Result<()> {
    let mut store = MockEventStore::new();
    store.expect_record_failed_webhook().times(1).returning(|failure| {
        assert!(failure.raw_body.contains("certainly not json"));
        Ok(())
    });
    let dedup_store = MockEventStore::new();

    let (status, ack) = post_webhook(store, dedup_store, "certainly not json", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(ack.received);
    assert_eq!(ack.error, Some(true));
    assert!(ack.request_id.is_some());
    assert!(ack.event_id.is_none());
    Ok(())
}

#[actix_web::test]
async fn unsigned_events_are_recorded_with_an_invalid_signature_flag() -> anyhow::Result<()> {
    let mut store = MockEventStore::new();
    store.expect_record_event_arrival().times(1).returning(|event| {
        assert!(!event.signature_valid, "an unsigned event must be flagged for audit");
        assert_eq!(event.event_id.as_str(), "ev_1");
        assert_eq!(event.event_type, "bank_transfer_completed", "the topic must be normalized");
        Ok((stored_event("ev_1", 0), true))
    });
    store.expect_mark_event_queued().times(1).returning(|_| Ok(()));
    let mut dedup_store = MockEventStore::new();
    dedup_store.expect_fetch_event_by_event_id().times(1).returning(|_| Ok(None));

    let body = r#"{
        "id": "ev_1",
        "topic": "customer_bank_transfer_completed",
        "timestamp": "2026-08-05T12:00:00Z",
        "_links": {"resource": {"href": "https://api.example.com/transfers/tr_1"}}
    }"#;
    let (status, ack) = post_webhook(store, dedup_store, body, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(ack.received);
    assert_eq!(ack.duplicate, Some(false));
    assert_eq!(ack.event_id.as_deref(), Some("ev_1"));
    assert!(ack.processing_time.is_some());
    Ok(())
}

#[actix_web::test]
async fn correctly_signed_events_are_marked_valid() -> anyhow::Result<()> {
    let body = r#"{"id": "ev_2", "topic": "transfer_created"}"#;
    let signature = calculate_hmac(SECRET, body.as_bytes());

    let mut store = MockEventStore::new();
    store.expect_record_event_arrival().times(1).returning(|event| {
        assert!(event.signature_valid);
        assert!(event.signature.is_some());
        Ok((stored_event("ev_2", 0), true))
    });
    store.expect_mark_event_queued().times(1).returning(|_| Ok(()));
    let mut dedup_store = MockEventStore::new();
    dedup_store.expect_fetch_event_by_event_id().times(1).returning(|_| Ok(None));

    let (status, ack) = post_webhook(store, dedup_store, body, Some(signature)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(ack.received);
    assert_eq!(ack.duplicate, Some(false));
    Ok(())
}

#[actix_web::test]
async fn duplicate_arrivals_are_acknowledged_but_not_requeued() -> anyhow::Result<()> {
    let mut store = MockEventStore::new();
    store.expect_record_event_arrival().times(1).returning(|_| Ok((stored_event("ev_3", 1), false)));
    // A duplicate must never be handed to the pipeline again
    store.expect_mark_event_queued().times(0);
    let mut dedup_store = MockEventStore::new();
    dedup_store.expect_fetch_event_by_event_id().times(1).returning(|_| Ok(Some(stored_event("ev_3", 0))));

    let body = r#"{"id": "ev_3", "topic": "transfer_created"}"#;
    let (status, ack) = post_webhook(store, dedup_store, body, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(ack.received);
    assert_eq!(ack.duplicate, Some(true));
    Ok(())
}

#[actix_web::test]
async fn store_failures_never_reach_the_provider() -> anyhow::Result<()> {
    use journey_engine::traits::EventApiError;

    let mut store = MockEventStore::new();
    store
        .expect_record_event_arrival()
        .times(1)
        .returning(|_| Err(EventApiError::DatabaseError("store is down".to_string())));
    store.expect_record_failed_webhook().times(1).returning(|_| Ok(()));
    let mut dedup_store = MockEventStore::new();
    dedup_store.expect_fetch_event_by_event_id().times(1).returning(|_| Ok(None));

    let body = r#"{"id": "ev_4", "topic": "transfer_created"}"#;
    let (status, ack) = post_webhook(store, dedup_store, body, None).await?;
    assert_eq!(status, StatusCode::OK, "the provider must always receive a success acknowledgement");
    assert!(ack.received);
    assert_eq!(ack.error, Some(true));
    Ok(())
}

#[actix_web::test]
async fn envelopes_without_an_event_id_become_failed_webhooks() -> anyhow::Result<()> {
    let mut store = MockEventStore::new();
    store.expect_record_failed_webhook().times(1).returning(|failure| {
        assert!(failure.error.contains("no event id"));
        Ok(())
    });
    let dedup_store = MockEventStore::new();

    let body = r#"{"topic": "transfer_created"}"#;
    let (status, ack) = post_webhook(store, dedup_store, body, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack.error, Some(true));
    Ok(())
}
