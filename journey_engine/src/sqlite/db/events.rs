use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{EventId, NewFailedWebhook, NewWebhookEvent, ProcessingState, WebhookEvent},
    traits::EventApiError,
};

/// Records an event arrival idempotently. A new event id inserts a fresh row in the `received` state; a repeat
/// arrival bumps the duplicate counters on the existing row instead.
pub async fn record_arrival(
    event: NewWebhookEvent,
    conn: &mut SqliteConnection,
) -> Result<(WebhookEvent, bool), EventApiError> {
    let result = match fetch_by_event_id(&event.event_id, conn).await? {
        Some(_) => {
            let updated = sqlx::query_as(
                r#"
                UPDATE webhook_events
                SET is_duplicate = 1, duplicate_count = duplicate_count + 1
                WHERE event_id = $1
                RETURNING *;
            "#,
            )
            .bind(event.event_id.as_str())
            .fetch_one(conn)
            .await?;
            (updated, false)
        },
        None => {
            let inserted = insert_event(event, conn).await?;
            debug!("📝️ Event [{}] inserted with id {}", inserted.event_id, inserted.id);
            (inserted, true)
        },
    };
    Ok(result)
}

async fn insert_event(event: NewWebhookEvent, conn: &mut SqliteConnection) -> Result<WebhookEvent, EventApiError> {
    let event = sqlx::query_as(
        r#"
            INSERT INTO webhook_events (
                event_id,
                event_type,
                resource_type,
                resource_id,
                resource_uri,
                topic,
                event_timestamp,
                payload,
                payload_size,
                signature,
                signature_valid,
                source_ip
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *;
        "#,
    )
    .bind(event.event_id)
    .bind(event.event_type)
    .bind(event.resource_type)
    .bind(event.resource_id)
    .bind(event.resource_uri)
    .bind(event.topic)
    .bind(event.event_timestamp)
    .bind(Json(event.payload))
    .bind(event.payload_size)
    .bind(event.signature)
    .bind(event.signature_valid)
    .bind(event.source_ip)
    .fetch_one(conn)
    .await?;
    Ok(event)
}

pub async fn fetch_by_event_id(
    event_id: &EventId,
    conn: &mut SqliteConnection,
) -> Result<Option<WebhookEvent>, sqlx::Error> {
    let event = sqlx::query_as("SELECT * FROM webhook_events WHERE event_id = $1")
        .bind(event_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(event)
}

pub async fn mark_queued(event_id: &EventId, conn: &mut SqliteConnection) -> Result<(), EventApiError> {
    set_state(event_id, ProcessingState::Queued, conn).await
}

async fn set_state(
    event_id: &EventId,
    state: ProcessingState,
    conn: &mut SqliteConnection,
) -> Result<(), EventApiError> {
    let result = sqlx::query("UPDATE webhook_events SET processing_state = $1 WHERE event_id = $2")
        .bind(state)
        .bind(event_id.as_str())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EventApiError::EventNotFound(event_id.clone()));
    }
    Ok(())
}

/// Transitions the event to `processing` and increments the attempt counter.
pub async fn begin_processing(
    event_id: &EventId,
    conn: &mut SqliteConnection,
) -> Result<WebhookEvent, EventApiError> {
    let event: Option<WebhookEvent> = sqlx::query_as(
        r#"
        UPDATE webhook_events
        SET processing_state = 'processing', processing_attempts = processing_attempts + 1
        WHERE event_id = $1
        RETURNING *;
    "#,
    )
    .bind(event_id.as_str())
    .fetch_optional(conn)
    .await?;
    event.ok_or_else(|| EventApiError::EventNotFound(event_id.clone()))
}

pub async fn complete(event_id: &EventId, duration_ms: i64, conn: &mut SqliteConnection) -> Result<(), EventApiError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET processing_state = 'completed', processed_at = CURRENT_TIMESTAMP, processing_duration_ms = $1
        WHERE event_id = $2
    "#,
    )
    .bind(duration_ms)
    .bind(event_id.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EventApiError::EventNotFound(event_id.clone()));
    }
    Ok(())
}

pub async fn requeue(event_id: &EventId, error: &str, conn: &mut SqliteConnection) -> Result<(), EventApiError> {
    let result = sqlx::query(
        "UPDATE webhook_events SET processing_state = 'queued', last_processing_error = $1 WHERE event_id = $2",
    )
    .bind(error)
    .bind(event_id.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EventApiError::EventNotFound(event_id.clone()));
    }
    Ok(())
}

pub async fn fail(event_id: &EventId, error: &str, conn: &mut SqliteConnection) -> Result<(), EventApiError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET processing_state = 'failed', last_processing_error = $1, processed_at = CURRENT_TIMESTAMP
        WHERE event_id = $2
    "#,
    )
    .bind(error)
    .bind(event_id.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EventApiError::EventNotFound(event_id.clone()));
    }
    Ok(())
}

pub async fn quarantine(event_id: &EventId, reason: &str, conn: &mut SqliteConnection) -> Result<(), EventApiError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET processing_state = 'quarantined', quarantined_at = CURRENT_TIMESTAMP, quarantine_reason = $1
        WHERE event_id = $2
    "#,
    )
    .bind(reason)
    .bind(event_id.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EventApiError::EventNotFound(event_id.clone()));
    }
    Ok(())
}

/// Recent events for a resource, newest first, bounded by `since` and `limit`.
pub async fn recent_for_resource(
    resource_id: &str,
    since: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<WebhookEvent>, sqlx::Error> {
    let events = sqlx::query_as(
        r#"
        SELECT * FROM webhook_events
        WHERE resource_id = $1 AND received_at >= $2
        ORDER BY received_at DESC
        LIMIT $3
    "#,
    )
    .bind(resource_id)
    .bind(since)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(events)
}

pub async fn insert_failed_webhook(
    failure: NewFailedWebhook,
    conn: &mut SqliteConnection,
) -> Result<(), EventApiError> {
    sqlx::query("INSERT INTO failed_webhooks (source_ip, error, raw_body) VALUES ($1, $2, $3)")
        .bind(failure.source_ip)
        .bind(failure.error)
        .bind(failure.raw_body)
        .execute(conn)
        .await?;
    Ok(())
}
