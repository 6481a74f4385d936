//! Live integration tests for cronfleet-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/cronfleet-db/`), so `"../../migrations"` resolves to the
//! workspace migration directory.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use cronfleet_core::{
    ExecutionTrigger, FunctionSnapshot, ProjectSnapshot, ScheduleRecord, ScheduleRow,
    RESOURCE_TYPE_FUNCTION,
};
use cronfleet_db::{
    enqueue_execution, get_function, get_project, list_schedules_page, DbError, ScheduleFilter,
};
use sqlx::postgres::PgListener;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn insert_schedule(pool: &sqlx::PgPool, resource_id: &str, region: &str, active: bool) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO schedules (resource_id, project_id, schedule, active, region) \
         VALUES ($1, 'proj-1', '*/5 * * * *', $2, $3) RETURNING id",
    )
    .bind(resource_id)
    .bind(active)
    .bind(region)
    .fetch_one(pool)
    .await
    .unwrap_or_else(|e| panic!("insert_schedule failed for '{resource_id}': {e}"))
}

fn filter(active: Option<bool>) -> ScheduleFilter {
    ScheduleFilter {
        region: "fra".to_string(),
        resource_type: RESOURCE_TYPE_FUNCTION.to_string(),
        active,
        updated_since: None,
    }
}

fn sample_trigger(resource_id: &str) -> ExecutionTrigger {
    let at = Utc.with_ymd_and_hms(2026, 10, 15, 9, 5, 0).unwrap();
    let row = ScheduleRow {
        id: 1,
        resource_id: resource_id.to_string(),
        resource_type: RESOURCE_TYPE_FUNCTION.to_string(),
        project_id: "proj-1".to_string(),
        schedule: "*/5 * * * *".to_string(),
        active: true,
        region: "fra".to_string(),
        resource_updated_at: at,
    };
    let project = ProjectSnapshot {
        id: "proj-1".to_string(),
        internal_id: 1,
        name: "Acme".to_string(),
        database: "console".to_string(),
        region: "fra".to_string(),
    };
    let function = FunctionSnapshot {
        id: resource_id.to_string(),
        project_id: "proj-1".to_string(),
        name: resource_id.to_string(),
        runtime: "node-20".to_string(),
        entrypoint: "index.js".to_string(),
        schedule: "*/5 * * * *".to_string(),
        enabled: true,
        updated_at: at,
    };
    ExecutionTrigger::scheduled(&ScheduleRecord::from_parts(&row, project, function), at, at)
}

async fn queued_count(pool: &sqlx::PgPool) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM execution_queue")
        .fetch_one(pool)
        .await
        .expect("count execution_queue")
}

// ---------------------------------------------------------------------------
// Section 1: Schedule pages
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn schedule_pages_walk_by_cursor(pool: sqlx::PgPool) {
    let first = insert_schedule(&pool, "fn-1", "fra", true).await;
    let second = insert_schedule(&pool, "fn-2", "fra", true).await;
    insert_schedule(&pool, "fn-3", "fra", true).await;

    let page = list_schedules_page(&pool, &filter(Some(true)), None, 2)
        .await
        .expect("first page");
    assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first, second]);

    let rest = list_schedules_page(&pool, &filter(Some(true)), Some(second), 2)
        .await
        .expect("second page");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].resource_id, "fn-3");
}

#[sqlx::test(migrations = "../../migrations")]
async fn schedule_pages_filter_region_and_active(pool: sqlx::PgPool) {
    insert_schedule(&pool, "fn-on", "fra", true).await;
    insert_schedule(&pool, "fn-off", "fra", false).await;
    insert_schedule(&pool, "fn-elsewhere", "nyc", true).await;

    let active = list_schedules_page(&pool, &filter(Some(true)), None, 10)
        .await
        .expect("active page");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].resource_id, "fn-on");

    let all = list_schedules_page(&pool, &filter(None), None, 10)
        .await
        .expect("unfiltered page");
    assert_eq!(all.len(), 2, "sync scans must see deactivated rows");
}

// ---------------------------------------------------------------------------
// Section 2: Snapshot lookups
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn missing_project_and_function_are_not_found(pool: sqlx::PgPool) {
    let err = get_project(&pool, "proj-missing")
        .await
        .expect_err("unknown project should fail");
    assert!(matches!(err, DbError::NotFound { entity: "project", .. }));

    let err = get_function(&pool, "proj-1", "fn-missing")
        .await
        .expect_err("unknown function should fail");
    assert!(matches!(err, DbError::NotFound { entity: "function", .. }));
}

// ---------------------------------------------------------------------------
// Section 3: Execution queue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn enqueue_inserts_row_and_notifies_queue_channel(pool: sqlx::PgPool) {
    let mut listener = PgListener::connect_with(&pool).await.expect("listener");
    listener.listen("v1-functions").await.expect("listen");

    let trigger = sample_trigger("fn-1");
    let mut conn = pool.acquire().await.expect("acquire");
    let id = enqueue_execution(&mut conn, "v1-functions", &trigger)
        .await
        .expect("enqueue");

    let (queue, payload): (String, serde_json::Value) =
        sqlx::query_as("SELECT queue, payload FROM execution_queue WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .expect("queued row");
    assert_eq!(queue, "v1-functions");
    assert_eq!(payload["type"], "schedule");
    assert_eq!(payload["resource_id"], "fn-1");

    let notification = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .expect("notification within timeout")
        .expect("notification");
    assert_eq!(notification.channel(), "v1-functions");
    assert_eq!(notification.payload(), "fn-1");
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_notify_leaves_nothing_queued(pool: sqlx::PgPool) {
    let mut conn = pool.acquire().await.expect("acquire");

    // Postgres rejects an empty channel name, so the notify fails after
    // the insert has already run.
    let err = enqueue_execution(&mut conn, "", &sample_trigger("fn-1"))
        .await
        .expect_err("empty channel should fail");
    assert!(matches!(err, DbError::Sqlx(_)));
    assert_eq!(queued_count(&pool).await, 0);

    // The connection is still usable afterwards.
    enqueue_execution(&mut conn, "v1-functions", &sample_trigger("fn-2"))
        .await
        .expect("enqueue after rollback");
    assert_eq!(queued_count(&pool).await, 1);
}
