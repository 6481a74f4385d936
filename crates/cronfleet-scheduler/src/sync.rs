//! Incremental reconciliation of the mirror against the store.
//!
//! Each tick reads only rows whose logical clock moved since the last
//! successful tick, so the window is `[last_sync, now]` rather than the
//! whole table.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cronfleet_core::{ScheduleRow, RESOURCE_TYPE_FUNCTION};
use cronfleet_db::ScheduleFilter;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::bootstrap::serialize_millis;
use crate::error::{SchedulerError, StoreError};
use crate::mirror::Mirror;
use crate::store::{resolve_record, SchedulePager, ScheduleSource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub seen: usize,
    pub upserted: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub pages: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Last successful tick, readable while another tick runs.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub last_sync: DateTime<Utc>,
    pub last_report: Option<SyncReport>,
}

pub struct SyncEngine {
    source: Arc<dyn ScheduleSource>,
    mirror: Arc<Mirror>,
    region: String,
    page_size: usize,
    /// Held for the whole tick; guards against overlapping ticks.
    tick_lock: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl SyncEngine {
    /// `last_sync` should be the instant the bootstrap scan started, so
    /// rows changed while it ran are picked up by the first tick.
    #[must_use]
    pub fn new(
        source: Arc<dyn ScheduleSource>,
        mirror: Arc<Mirror>,
        region: impl Into<String>,
        page_size: usize,
        last_sync: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            mirror,
            region: region.into(),
            page_size,
            tick_lock: Mutex::new(()),
            status: RwLock::new(SyncStatus {
                last_sync,
                last_report: None,
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn last_sync(&self) -> DateTime<Utc> {
        self.status().last_sync
    }

    /// Run one sync tick.
    ///
    /// `last_sync` only advances when every page was read; on failure the
    /// next tick re-reads the same window.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TickInProgress`] if a previous tick is
    /// still running, or [`SchedulerError::Store`] if a page query fails.
    pub async fn tick(&self) -> Result<SyncReport, SchedulerError> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            return Err(SchedulerError::TickInProgress("sync"));
        };

        // Captured before the first query so rows written during this tick
        // fall inside the next tick's window.
        let tick_start = Utc::now();
        let since = self.last_sync();
        let report = self.sync_since(since).await?;

        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        status.last_sync = tick_start;
        status.last_report = Some(report.clone());
        Ok(report)
    }

    async fn sync_since(&self, since: DateTime<Utc>) -> Result<SyncReport, StoreError> {
        let started = Instant::now();
        let filter = ScheduleFilter {
            region: self.region.clone(),
            resource_type: RESOURCE_TYPE_FUNCTION.to_string(),
            active: None,
            updated_since: Some(since),
        };
        let mut pager = SchedulePager::new(filter, self.page_size);
        let mut report = SyncReport::default();

        while let Some(rows) = pager.next_page(self.source.as_ref()).await? {
            for row in &rows {
                report.seen += 1;
                self.apply_row(row, &mut report).await;
            }
        }

        report.pages = pager.pages_fetched();
        report.elapsed = started.elapsed();
        if report.upserted + report.removed + report.failed > 0 {
            tracing::info!(
                seen = report.seen,
                upserted = report.upserted,
                removed = report.removed,
                failed = report.failed,
                elapsed_ms = report.elapsed.as_millis(),
                "scheduler: sync applied changes"
            );
        } else {
            tracing::debug!(seen = report.seen, "scheduler: sync found no changes");
        }
        Ok(report)
    }

    async fn apply_row(&self, row: &ScheduleRow, report: &mut SyncReport) {
        if !row.active {
            if self
                .mirror
                .deactivate(&row.resource_id, row.resource_updated_at)
                .await
            {
                tracing::info!(resource_id = %row.resource_id, "scheduler: schedule deactivated");
                report.removed += 1;
            } else {
                report.unchanged += 1;
            }
            return;
        }

        if !self
            .mirror
            .needs_refresh(&row.resource_id, row.resource_updated_at)
            .await
        {
            report.unchanged += 1;
            return;
        }

        match resolve_record(self.source.as_ref(), row).await {
            Ok(record) => {
                if self.mirror.upsert(record).await.changed() {
                    report.upserted += 1;
                } else {
                    report.unchanged += 1;
                }
            }
            Err(e) if e.is_unschedulable() => {
                report.failed += 1;
                if self.mirror.remove(&row.resource_id).await {
                    report.removed += 1;
                }
                tracing::warn!(
                    resource_id = %row.resource_id,
                    project_id = %row.project_id,
                    error = %e,
                    "scheduler: schedule is unschedulable; removed from mirror"
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    resource_id = %row.resource_id,
                    project_id = %row.project_id,
                    error = %e,
                    "scheduler: failed to refresh schedule; keeping previous state"
                );
            }
        }
    }
}
