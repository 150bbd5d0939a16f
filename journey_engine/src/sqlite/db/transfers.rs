use log::debug;
use serde_json::Value;
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{TransferRecord, TransferUpdate, WebhookEvent},
    traits::TransferApiError,
};

pub async fn fetch_transfer(
    transfer_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<TransferRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM transfer_records WHERE transfer_id = $1")
        .bind(transfer_id)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

pub async fn fetch_or_create_transfer(
    transfer_id: &str,
    conn: &mut SqliteConnection,
) -> Result<TransferRecord, TransferApiError> {
    if let Some(record) = fetch_transfer(transfer_id, &mut *conn).await? {
        return Ok(record);
    }
    let record = sqlx::query_as("INSERT INTO transfer_records (transfer_id) VALUES ($1) RETURNING *")
        .bind(transfer_id)
        .fetch_one(conn)
        .await?;
    debug!("📝️ Transfer record created for {transfer_id}");
    Ok(record)
}

/// Applies a status update and appends the raw event to the audit trail. The customer id is only ever set, never
/// cleared.
pub async fn apply_update(
    transfer_id: &str,
    update: TransferUpdate,
    customer_id: Option<&str>,
    raw_event: &Value,
    conn: &mut SqliteConnection,
) -> Result<TransferRecord, TransferApiError> {
    let record = fetch_or_create_transfer(transfer_id, &mut *conn).await?;
    let mut audit_trail = record.audit_trail.0;
    audit_trail.push(raw_event.clone());
    let updated = sqlx::query_as(
        r#"
        UPDATE transfer_records SET
            status = $1,
            failure_reason = COALESCE($2, failure_reason),
            failure_code = COALESCE($3, failure_code),
            completed_at = COALESCE($4, completed_at),
            customer_id = COALESCE($5, customer_id),
            audit_trail = $6,
            updated_at = CURRENT_TIMESTAMP
        WHERE transfer_id = $7
        RETURNING *;
    "#,
    )
    .bind(update.status)
    .bind(update.failure_reason)
    .bind(update.failure_code)
    .bind(update.completed_at)
    .bind(customer_id)
    .bind(Json(audit_trail))
    .bind(transfer_id)
    .fetch_one(conn)
    .await?;
    Ok(updated)
}

/// Upserts a relation entry linking a customer to an event. Repeat deliveries are no-ops.
pub async fn link_customer(
    customer_id: &str,
    event: &WebhookEvent,
    conn: &mut SqliteConnection,
) -> Result<(), TransferApiError> {
    sqlx::query(
        "INSERT OR IGNORE INTO customer_relations (customer_id, event_id, event_type) VALUES ($1, $2, $3)",
    )
    .bind(customer_id)
    .bind(event.event_id.as_str())
    .bind(&event.event_type)
    .execute(conn)
    .await?;
    Ok(())
}
