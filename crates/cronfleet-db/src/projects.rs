//! Point lookups against the console `projects` table.

use chrono::{DateTime, Utc};
use cronfleet_core::ProjectSnapshot;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `projects` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub internal_id: i64,
    pub name: String,
    pub database: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for ProjectSnapshot {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            internal_id: row.internal_id,
            name: row.name,
            database: row.database,
            region: row.region,
        }
    }
}

/// Fetch a project by its public id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no project has this id, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_project(pool: &PgPool, project_id: &str) -> Result<ProjectRow, DbError> {
    sqlx::query_as::<_, ProjectRow>(
        "SELECT id, internal_id, name, database, region, created_at, updated_at \
         FROM projects \
         WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DbError::NotFound {
        entity: "project",
        id: project_id.to_string(),
    })
}
