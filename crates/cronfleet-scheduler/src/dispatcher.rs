//! Timed fan-out of due jobs to the execution queue.
//!
//! One task per delay bucket sleeps until the bucket's fire instant, then
//! re-reads each job from the mirror and enqueues a trigger. Nothing is
//! retried: a job that is skipped or fails waits for its next occurrence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cronfleet_core::ExecutionTrigger;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::mirror::Mirror;
use crate::planner::{DispatchPlan, DueJob};
use crate::pool::{Lease, PoolGroup, UnitOfWork};
use crate::queue::{QueueConnection, QueuePool};

/// Final state of one due job after its bucket woke up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Fired,
    /// Removed from the mirror while sleeping.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketOutcome {
    pub delay_secs: u64,
    pub outcomes: Vec<(String, DispatchOutcome)>,
}

impl BucketOutcome {
    #[must_use]
    pub fn count(&self, wanted: &DispatchOutcome) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| match (outcome, wanted) {
                (DispatchOutcome::Failed(_), DispatchOutcome::Failed(_)) => true,
                (a, b) => a == b,
            })
            .count()
    }

    #[must_use]
    pub fn fired(&self) -> usize {
        self.count(&DispatchOutcome::Fired)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    mirror: Arc<Mirror>,
    queue: Arc<QueuePool>,
    pools: PoolGroup,
}

impl Dispatcher {
    #[must_use]
    pub fn new(mirror: Arc<Mirror>, queue: Arc<QueuePool>, pools: PoolGroup) -> Self {
        Self {
            mirror,
            queue,
            pools,
        }
    }

    /// Spawn one task per bucket of `plan` into `tasks`.
    ///
    /// Sleeps are measured from the plan's own clock reading, so time spent
    /// planning does not push fires later. Returns the number of tasks.
    pub fn spawn_plan(&self, plan: DispatchPlan, tasks: &mut JoinSet<BucketOutcome>) -> usize {
        let spawned = plan.buckets.len();
        for (delay, jobs) in plan.buckets {
            let deadline = plan.planned_instant + Duration::from_secs(delay);
            let dispatcher = self.clone();
            tasks.spawn(async move { dispatcher.dispatch_bucket(delay, deadline, jobs).await });
        }
        spawned
    }

    /// Sleep until `deadline`, then enqueue every job still mirrored.
    ///
    /// A connection is borrowed lazily for the first job that needs one.
    /// If it cannot be borrowed, that job fails and the next job tries
    /// again, so one failure never takes the rest of the bucket down. A
    /// connection whose enqueue failed is discarded, never reused.
    pub async fn dispatch_bucket(
        &self,
        delay_secs: u64,
        deadline: Instant,
        jobs: Vec<DueJob>,
    ) -> BucketOutcome {
        tokio::time::sleep_until(deadline).await;

        let unit = UnitOfWork::new();
        let mut lease: Option<Lease<Box<dyn QueueConnection>>> = None;
        let mut outcomes = Vec::with_capacity(jobs.len());

        for job in jobs {
            let outcome = self.dispatch_job(unit, &mut lease, &job).await;
            outcomes.push((job.resource_id, outcome));
        }

        drop(lease);
        self.pools.reclaim_all(unit);

        let bucket = BucketOutcome {
            delay_secs,
            outcomes,
        };
        tracing::info!(
            delay_secs,
            fired = bucket.fired(),
            skipped = bucket.count(&DispatchOutcome::Skipped),
            failed = bucket.count(&DispatchOutcome::Failed(String::new())),
            "scheduler: bucket dispatched"
        );
        bucket
    }

    async fn dispatch_job(
        &self,
        unit: UnitOfWork,
        lease: &mut Option<Lease<Box<dyn QueueConnection>>>,
        job: &DueJob,
    ) -> DispatchOutcome {
        let Some(record) = self.mirror.get(&job.resource_id).await else {
            tracing::debug!(
                resource_id = %job.resource_id,
                "scheduler: job left the mirror before firing; skipped"
            );
            return DispatchOutcome::Skipped;
        };

        let conn = match &mut *lease {
            Some(conn) => conn,
            slot @ None => match self.queue.acquire(unit).await {
                Ok(conn) => slot.insert(conn),
                Err(e) => {
                    tracing::error!(
                        resource_id = %job.resource_id,
                        error = %e,
                        "scheduler: no queue connection for job"
                    );
                    return DispatchOutcome::Failed(e.to_string());
                }
            },
        };

        let trigger = ExecutionTrigger::scheduled(&record, job.next_fire, Utc::now());
        let sent = conn.enqueue(&trigger).await;
        match sent {
            Ok(()) => {
                tracing::info!(
                    resource_id = %job.resource_id,
                    project_id = %record.project_id,
                    scheduled_at = %job.next_fire,
                    "scheduler: job fired"
                );
                DispatchOutcome::Fired
            }
            Err(e) => {
                tracing::error!(
                    resource_id = %job.resource_id,
                    project_id = %record.project_id,
                    error = %e,
                    "scheduler: enqueue failed; discarding queue connection"
                );
                // The connection may be dead; the next job borrows a new one.
                if let Some(broken) = lease.take() {
                    broken.discard();
                }
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}
