use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{types::Json, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{InstanceStatus, JourneyInstance, NewJourneyInstance},
    traits::JourneyApiError,
};

pub async fn insert_instance(
    instance: NewJourneyInstance,
    conn: &mut SqliteConnection,
) -> Result<JourneyInstance, JourneyApiError> {
    let instance = sqlx::query_as(
        r#"
            INSERT INTO journey_instances (
                definition_id,
                definition_version,
                resource_id,
                resource_type,
                resource_metadata,
                start_time,
                last_event_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(instance.definition_id)
    .bind(instance.definition_version)
    .bind(instance.resource_id)
    .bind(instance.resource_type)
    .bind(Json(instance.resource_metadata))
    .bind(instance.start_time)
    .bind(instance.last_event_time)
    .fetch_one(conn)
    .await?;
    Ok(instance)
}

/// Writes back every mutable field of the instance row. Concurrent writers are serialised above this layer.
pub async fn update_instance(
    instance: &JourneyInstance,
    conn: &mut SqliteConnection,
) -> Result<(), JourneyApiError> {
    let result = sqlx::query(
        r#"
        UPDATE journey_instances SET
            status = $1,
            last_event_time = $2,
            end_time = $3,
            current_step_index = $4,
            completed_steps = $5,
            progress_percentage = $6,
            total_duration_ms = $7,
            estimated_completion_time = $8,
            confidence_score = $9,
            risk_score = $10,
            risk_factors = $11,
            notes = $12,
            resource_metadata = $13
        WHERE id = $14
    "#,
    )
    .bind(instance.status)
    .bind(instance.last_event_time)
    .bind(instance.end_time)
    .bind(instance.current_step_index)
    .bind(&instance.completed_steps)
    .bind(instance.progress_percentage)
    .bind(instance.total_duration_ms)
    .bind(instance.estimated_completion_time)
    .bind(instance.confidence_score)
    .bind(instance.risk_score)
    .bind(&instance.risk_factors)
    .bind(&instance.notes)
    .bind(&instance.resource_metadata)
    .bind(instance.id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(JourneyApiError::InstanceNotFound(instance.id));
    }
    Ok(())
}

pub async fn fetch_instance(id: i64, conn: &mut SqliteConnection) -> Result<Option<JourneyInstance>, sqlx::Error> {
    let instance =
        sqlx::query_as("SELECT * FROM journey_instances WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(instance)
}

/// Non-terminal instances of one definition for one resource, oldest first.
pub async fn fetch_open_instances(
    definition_id: i64,
    resource_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<JourneyInstance>, sqlx::Error> {
    let instances = sqlx::query_as(
        r#"
        SELECT * FROM journey_instances
        WHERE definition_id = $1 AND resource_id = $2 AND status IN ('active', 'stuck')
        ORDER BY start_time ASC
    "#,
    )
    .bind(definition_id)
    .bind(resource_id)
    .fetch_all(conn)
    .await?;
    Ok(instances)
}

/// Non-terminal instances of any definition for one resource.
pub async fn fetch_open_for_resource(
    resource_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<JourneyInstance>, sqlx::Error> {
    let instances = sqlx::query_as(
        r#"
        SELECT * FROM journey_instances
        WHERE resource_id = $1 AND status IN ('active', 'stuck')
        ORDER BY start_time ASC
    "#,
    )
    .bind(resource_id)
    .fetch_all(conn)
    .await?;
    Ok(instances)
}

/// Force-terminates non-terminal instances whose last event is older than the cutoff, optionally restricted to one
/// resource. Returns the abandoned instances.
pub async fn abandon_inactive_since(
    cutoff: DateTime<Utc>,
    resource_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Vec<JourneyInstance>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
        UPDATE journey_instances
        SET status = 'abandoned', end_time = CURRENT_TIMESTAMP
        WHERE status IN ('active', 'stuck') AND last_event_time < "#,
    );
    builder.push_bind(cutoff);
    if let Some(resource_id) = resource_id {
        builder.push(" AND resource_id = ");
        builder.push_bind(resource_id);
    }
    builder.push(" RETURNING *");
    trace!("📝️ Executing query: {}", builder.sql());
    let abandoned = builder.build_query_as::<JourneyInstance>().fetch_all(conn).await?;
    Ok(abandoned)
}

pub async fn status_counts(conn: &mut SqliteConnection) -> Result<Vec<(InstanceStatus, i64)>, sqlx::Error> {
    let counts: Vec<(InstanceStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM journey_instances GROUP BY status")
            .fetch_all(conn)
            .await?;
    Ok(counts)
}
