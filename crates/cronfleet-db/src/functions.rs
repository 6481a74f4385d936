//! Point lookups against a shard's `functions` table.

use chrono::{DateTime, Utc};
use cronfleet_core::FunctionSnapshot;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `functions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FunctionRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub runtime: String,
    pub entrypoint: String,
    pub schedule: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FunctionRow> for FunctionSnapshot {
    fn from(row: FunctionRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            runtime: row.runtime,
            entrypoint: row.entrypoint,
            schedule: row.schedule,
            enabled: row.enabled,
            updated_at: row.updated_at,
        }
    }
}

/// Fetch a function owned by `project_id` from the shard behind `pool`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the function does not exist on this
/// shard, or [`DbError::Sqlx`] if the query fails.
pub async fn get_function(
    pool: &PgPool,
    project_id: &str,
    function_id: &str,
) -> Result<FunctionRow, DbError> {
    sqlx::query_as::<_, FunctionRow>(
        "SELECT id, project_id, name, runtime, entrypoint, schedule, enabled, \
                created_at, updated_at \
         FROM functions \
         WHERE project_id = $1 AND id = $2",
    )
    .bind(project_id)
    .bind(function_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DbError::NotFound {
        entity: "function",
        id: format!("{project_id}/{function_id}"),
    })
}
