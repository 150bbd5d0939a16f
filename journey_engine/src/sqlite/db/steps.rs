use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{EventId, JourneyStep, NewJourneyStep},
    traits::JourneyApiError,
};

pub async fn insert_step(step: NewJourneyStep, conn: &mut SqliteConnection) -> Result<JourneyStep, JourneyApiError> {
    let step = sqlx::query_as(
        r#"
            INSERT INTO journey_steps (
                instance_id,
                sequence,
                step_name,
                event_id,
                event_type,
                timestamp,
                duration_from_start_ms,
                duration_from_previous_ms,
                expected,
                on_time,
                event_metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *;
        "#,
    )
    .bind(step.instance_id)
    .bind(step.sequence)
    .bind(step.step_name)
    .bind(step.event_id)
    .bind(step.event_type)
    .bind(step.timestamp)
    .bind(step.duration_from_start_ms)
    .bind(step.duration_from_previous_ms)
    .bind(step.expected)
    .bind(step.on_time)
    .bind(Json(step.event_metadata))
    .fetch_one(conn)
    .await?;
    Ok(step)
}

pub async fn fetch_for_instance(
    instance_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<JourneyStep>, sqlx::Error> {
    let steps = sqlx::query_as("SELECT * FROM journey_steps WHERE instance_id = $1 ORDER BY id ASC")
        .bind(instance_id)
        .fetch_all(conn)
        .await?;
    Ok(steps)
}

pub async fn step_exists(
    instance_id: i64,
    event_id: &EventId,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM journey_steps WHERE instance_id = $1 AND event_id = $2")
        .bind(instance_id)
        .bind(event_id.as_str())
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}
