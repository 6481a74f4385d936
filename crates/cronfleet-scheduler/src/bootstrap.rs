//! One-shot population of the mirror at process start.

use std::time::{Duration, Instant};

use cronfleet_core::RESOURCE_TYPE_FUNCTION;
use cronfleet_db::ScheduleFilter;
use serde::Serialize;

use crate::error::StoreError;
use crate::mirror::Mirror;
use crate::store::{resolve_record, SchedulePager, ScheduleSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub pages: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

pub(crate) fn serialize_millis<S: serde::Serializer>(
    elapsed: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Scan every active function schedule in `region` into `mirror`.
///
/// Rows whose project or function cannot be resolved are logged and left
/// out. Store connections are borrowed per query from the sqlx pools and
/// are back in their pool once each query returns.
///
/// # Errors
///
/// Returns [`StoreError`] if a page query fails; the mirror then holds
/// whatever was loaded before the failure.
pub async fn load_all(
    source: &dyn ScheduleSource,
    mirror: &Mirror,
    region: &str,
    page_size: usize,
) -> Result<LoadReport, StoreError> {
    let started = Instant::now();
    let filter = ScheduleFilter {
        region: region.to_string(),
        resource_type: RESOURCE_TYPE_FUNCTION.to_string(),
        active: Some(true),
        updated_since: None,
    };
    let mut pager = SchedulePager::new(filter, page_size);
    let mut loaded = 0;
    let mut skipped = 0;

    tracing::info!(region, page_size, "scheduler: loading schedules");

    while let Some(rows) = pager.next_page(source).await? {
        for row in &rows {
            match resolve_record(source, row).await {
                Ok(record) => {
                    mirror.upsert(record).await;
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        resource_id = %row.resource_id,
                        project_id = %row.project_id,
                        error = %e,
                        "scheduler: skipping unresolvable schedule"
                    );
                    skipped += 1;
                }
            }
        }
    }

    let report = LoadReport {
        loaded,
        skipped,
        pages: pager.pages_fetched(),
        elapsed: started.elapsed(),
    };
    tracing::info!(
        loaded = report.loaded,
        skipped = report.skipped,
        pages = report.pages,
        elapsed_ms = report.elapsed.as_millis(),
        "scheduler: schedules loaded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::memory::{fixtures, MemoryStore};

    #[tokio::test]
    async fn skips_rows_that_cannot_be_resolved() {
        let store = MemoryStore::new();
        let clock = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        store.insert_function("fn-a", "* * * * *", clock);
        store.insert_function("fn-b", "* * * * *", clock);
        store.delete_function_snapshot("fn-b");

        let mirror = Mirror::new();
        let report = load_all(&store, &mirror, fixtures::REGION, 10)
            .await
            .unwrap();

        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(mirror.resource_ids().await, vec!["fn-a"]);
    }

    #[tokio::test]
    async fn page_failure_aborts_the_load() {
        let store = MemoryStore::new();
        store.fail_next_pages(1);

        let result = load_all(&store, &Mirror::new(), fixtures::REGION, 10).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn report_serializes_elapsed_as_millis() {
        let report = LoadReport {
            loaded: 3,
            skipped: 0,
            pages: 1,
            elapsed: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed"], 1500);
    }
}
