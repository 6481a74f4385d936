//! Writes to the `execution_queue` table consumed by execution workers.

use cronfleet_core::ExecutionTrigger;
use sqlx::{types::Json, Connection, PgConnection};

use crate::DbError;

/// Append a trigger to `queue` and notify listeners on the queue's channel.
///
/// Takes a dedicated connection rather than a pool so the caller controls
/// which borrowed connection carries the write. The insert and the notify
/// commit together; listeners are only woken once the row is visible.
/// Returns the queue row id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert or notify fails. Nothing is
/// queued in that case.
pub async fn enqueue_execution(
    conn: &mut PgConnection,
    queue: &str,
    trigger: &ExecutionTrigger,
) -> Result<i64, DbError> {
    let mut tx = conn.begin().await?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO execution_queue (queue, resource_id, payload, enqueued_at) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id",
    )
    .bind(queue)
    .bind(&trigger.resource_id)
    .bind(Json(trigger))
    .bind(trigger.enqueued_at)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(queue)
        .bind(&trigger.resource_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(id)
}
