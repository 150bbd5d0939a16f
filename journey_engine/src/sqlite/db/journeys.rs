use log::debug;
use sqlx::{types::Json, SqliteConnection};

use crate::{
    journeys::{JourneyDefinition, NewJourneyDefinition},
    traits::JourneyApiError,
};

/// Publishes a definition unless an active definition with the same name already exists. The configuration must be
/// validated by the caller before it reaches this function.
pub async fn seed_definition(
    definition: NewJourneyDefinition,
    conn: &mut SqliteConnection,
) -> Result<Option<JourneyDefinition>, JourneyApiError> {
    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM journey_definitions WHERE name = $1 AND active = 1")
            .bind(&definition.name)
            .fetch_one(&mut *conn)
            .await?;
    if existing > 0 {
        debug!("🗂️ Journey definition '{}' is already published. Skipping seed.", definition.name);
        return Ok(None);
    }
    let stored = insert_definition(definition, conn).await?;
    Ok(Some(stored))
}

async fn insert_definition(
    definition: NewJourneyDefinition,
    conn: &mut SqliteConnection,
) -> Result<JourneyDefinition, JourneyApiError> {
    let definition = sqlx::query_as(
        r#"
            INSERT INTO journey_definitions (name, version, category, active, tags, config, thresholds)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(definition.name)
    .bind(definition.version)
    .bind(definition.category)
    .bind(definition.active)
    .bind(Json(definition.tags))
    .bind(Json(definition.config))
    .bind(Json(definition.thresholds))
    .fetch_one(conn)
    .await?;
    Ok(definition)
}

pub async fn fetch_active_definitions(conn: &mut SqliteConnection) -> Result<Vec<JourneyDefinition>, sqlx::Error> {
    let definitions =
        sqlx::query_as("SELECT * FROM journey_definitions WHERE active = 1 ORDER BY name ASC, version DESC")
            .fetch_all(conn)
            .await?;
    Ok(definitions)
}

pub async fn fetch_definition(id: i64, conn: &mut SqliteConnection) -> Result<Option<JourneyDefinition>, sqlx::Error> {
    let definition =
        sqlx::query_as("SELECT * FROM journey_definitions WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(definition)
}
