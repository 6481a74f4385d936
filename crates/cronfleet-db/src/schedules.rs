//! Paginated reads of the `schedules` table.

use chrono::{DateTime, Utc};
use cronfleet_core::ScheduleRow;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `schedules` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleDbRow {
    pub id: i64,
    pub resource_id: String,
    pub resource_type: String,
    pub project_id: String,
    pub schedule: String,
    pub active: bool,
    pub region: String,
    pub resource_updated_at: DateTime<Utc>,
}

impl From<ScheduleDbRow> for ScheduleRow {
    fn from(row: ScheduleDbRow) -> Self {
        Self {
            id: row.id,
            resource_id: row.resource_id,
            resource_type: row.resource_type,
            project_id: row.project_id,
            schedule: row.schedule,
            active: row.active,
            region: row.region,
            resource_updated_at: row.resource_updated_at,
        }
    }
}

/// Filters applied to every page of a schedule scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFilter {
    pub region: String,
    pub resource_type: String,
    /// `Some(true)` for the bootstrap scan; `None` for sync, which must see
    /// deactivations.
    pub active: Option<bool>,
    /// Only rows whose logical clock is at or after this instant.
    pub updated_since: Option<DateTime<Utc>>,
}

/// Fetch one page of schedules ordered by `id`, strictly after `after_id`.
///
/// The caller advances the cursor with the last row's `id` and stops when a
/// page comes back shorter than `limit`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_schedules_page(
    pool: &PgPool,
    filter: &ScheduleFilter,
    after_id: Option<i64>,
    limit: i64,
) -> Result<Vec<ScheduleRow>, DbError> {
    let rows = sqlx::query_as::<_, ScheduleDbRow>(
        "SELECT id, resource_id, resource_type, project_id, schedule, \
                active, region, resource_updated_at \
         FROM schedules \
         WHERE region = $1 \
           AND resource_type = $2 \
           AND ($3::BOOLEAN IS NULL OR active = $3) \
           AND ($4::TIMESTAMPTZ IS NULL OR resource_updated_at >= $4) \
           AND ($5::BIGINT IS NULL OR id > $5) \
         ORDER BY id \
         LIMIT $6",
    )
    .bind(&filter.region)
    .bind(&filter.resource_type)
    .bind(filter.active)
    .bind(filter.updated_since)
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ScheduleRow::from).collect())
}
