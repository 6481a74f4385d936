//! Drives the sync and planner ticks on a [`JobScheduler`].
//!
//! Ticks are registered as repeated jobs. Tick errors are logged at the
//! job boundary and never stop the scheduler; the next tick runs as usual.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::dispatcher::{BucketOutcome, Dispatcher};
use crate::error::SchedulerError;
use crate::mirror::Mirror;
use crate::planner::{DispatchPlanner, PlanSummary};
use crate::pool::{PoolGroup, PoolStats};
use crate::sync::{SyncEngine, SyncReport};

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    #[serde(flatten)]
    pub stats: PoolStats,
}

/// Point-in-time view of the scheduler for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub mirrored: usize,
    pub last_sync: DateTime<Utc>,
    pub last_sync_report: Option<SyncReport>,
    pub last_plan: Option<PlanSummary>,
    pub in_flight_buckets: usize,
    pub pools: Vec<PoolStatus>,
}

pub struct SchedulerEngine {
    region: String,
    mirror: Arc<Mirror>,
    sync: SyncEngine,
    planner: DispatchPlanner,
    dispatcher: Dispatcher,
    pools: PoolGroup,
    sync_interval: Duration,
    tasks: Mutex<JoinSet<BucketOutcome>>,
    started_at: DateTime<Utc>,
}

impl SchedulerEngine {
    #[must_use]
    pub fn new(
        region: impl Into<String>,
        mirror: Arc<Mirror>,
        sync: SyncEngine,
        planner: DispatchPlanner,
        dispatcher: Dispatcher,
        pools: PoolGroup,
        sync_interval: Duration,
    ) -> Self {
        Self {
            region: region.into(),
            mirror,
            sync,
            planner,
            dispatcher,
            pools,
            sync_interval,
            tasks: Mutex::new(JoinSet::new()),
            started_at: Utc::now(),
        }
    }

    /// Run one sync tick, logging rather than returning its error.
    pub async fn run_sync_tick(&self) -> Option<SyncReport> {
        match self.sync.tick().await {
            Ok(report) => Some(report),
            Err(SchedulerError::TickInProgress(tick)) => {
                tracing::warn!(tick, "scheduler: previous tick still running; skipped");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "scheduler: sync tick failed");
                None
            }
        }
    }

    /// Plan the coming window and spawn its dispatch buckets.
    ///
    /// Returns the number of buckets spawned.
    pub async fn run_plan_tick(&self) -> usize {
        let plan = self.planner.plan().await;
        let mut tasks = self.tasks();
        reap_finished(&mut tasks);
        self.dispatcher.spawn_plan(plan, &mut tasks)
    }

    /// Plan once immediately, then register both ticks and start the timer.
    ///
    /// The returned [`JobScheduler`] must be kept alive; dropping it stops
    /// the ticks.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Timer`] if a job cannot be registered or
    /// the scheduler fails to start.
    pub async fn start(self: &Arc<Self>) -> Result<JobScheduler, SchedulerError> {
        let scheduler = JobScheduler::new().await?;

        let engine = Arc::clone(self);
        let sync_job = Job::new_repeated_async(self.sync_interval, move |_uuid, _lock| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                engine.run_sync_tick().await;
            })
        })?;
        scheduler.add(sync_job).await?;

        let engine = Arc::clone(self);
        let plan_job = Job::new_repeated_async(self.planner.period(), move |_uuid, _lock| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                engine.run_plan_tick().await;
            })
        })?;
        scheduler.add(plan_job).await?;

        self.run_plan_tick().await;
        scheduler.start().await?;
        tracing::info!(
            region = %self.region,
            sync_interval_secs = self.sync_interval.as_secs(),
            plan_interval_secs = self.planner.period().as_secs(),
            "scheduler: ticks registered"
        );
        Ok(scheduler)
    }

    /// Abort every sleeping dispatch task. Called on shutdown.
    pub fn abort_dispatches(&self) -> usize {
        let mut tasks = self.tasks();
        let pending = tasks.len();
        tasks.abort_all();
        if pending > 0 {
            tracing::info!(pending, "scheduler: aborted pending dispatch buckets");
        }
        pending
    }

    pub async fn status(&self) -> SchedulerStatus {
        let sync = self.sync.status();
        let in_flight_buckets = {
            let mut tasks = self.tasks();
            reap_finished(&mut tasks);
            tasks.len()
        };
        SchedulerStatus {
            region: self.region.clone(),
            started_at: self.started_at,
            mirrored: self.mirror.len().await,
            last_sync: sync.last_sync,
            last_sync_report: sync.last_report,
            last_plan: self.planner.last_plan(),
            in_flight_buckets,
            pools: self
                .pools
                .stats()
                .into_iter()
                .map(|(name, stats)| PoolStatus { name, stats })
                .collect(),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<BucketOutcome>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reap_finished(tasks: &mut JoinSet<BucketOutcome>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            if e.is_panic() {
                tracing::error!(error = %e, "scheduler: dispatch task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::memory::{fixtures, MemoryQueue, MemoryStore};
    use crate::store::ScheduleSource;

    fn engine(mirror: &Arc<Mirror>, queue: &MemoryQueue) -> SchedulerEngine {
        let store: Arc<dyn ScheduleSource> = Arc::new(MemoryStore::new());
        let pool = queue.pool(2);
        let mut pools = PoolGroup::new();
        pools.register(pool.clone());
        let since = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        SchedulerEngine::new(
            fixtures::REGION,
            Arc::clone(mirror),
            SyncEngine::new(store, Arc::clone(mirror), fixtures::REGION, 100, since),
            DispatchPlanner::new(Arc::clone(mirror), Duration::from_secs(60)),
            Dispatcher::new(Arc::clone(mirror), pool, pools.clone()),
            pools,
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn status_reports_mirror_and_pools() {
        let mirror = Arc::new(Mirror::new());
        let clock = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        mirror.upsert(fixtures::record("fn-a", "0 0 1 1 *", clock)).await;
        let engine = engine(&mirror, &MemoryQueue::new());

        let status = engine.status().await;
        assert_eq!(status.mirrored, 1);
        assert_eq!(status.pools[0].name, "queue");
        assert!(status.last_plan.is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["pools"][0]["capacity"], 2);
    }

    #[tokio::test]
    async fn plan_tick_spawns_and_shutdown_aborts() {
        let mirror = Arc::new(Mirror::new());
        let clock = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        // Every second, so something is always due.
        mirror.upsert(fixtures::record("fn-a", "* * * * * *", clock)).await;
        let engine = engine(&mirror, &MemoryQueue::new());

        assert!(engine.run_plan_tick().await > 0);
        assert!(engine.status().await.last_plan.is_some());
        assert!(engine.abort_dispatches() > 0);
    }
}
