//! In-memory store and queue backends for tests.
//!
//! Compiled only for this crate's tests or with the `test-util` feature.
//! Both support failure injection so isolation behavior can be exercised
//! without a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronfleet_core::{ExecutionTrigger, FunctionSnapshot, ProjectSnapshot, ScheduleRow};
use cronfleet_db::ScheduleFilter;
use tokio::time::Instant;

use crate::error::{PoolError, QueueError, StoreError};
use crate::pool::{ResourceFactory, ResourcePool};
use crate::queue::{QueueConnection, QueuePool, QUEUE_POOL};
use crate::store::ScheduleSource;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Canned rows and snapshots for a single-project fleet.
pub mod fixtures {
    use chrono::{DateTime, Utc};
    use cronfleet_core::{
        FunctionSnapshot, ProjectSnapshot, ScheduleRecord, ScheduleRow, RESOURCE_TYPE_FUNCTION,
    };

    pub const PROJECT_ID: &str = "proj-acme";
    pub const REGION: &str = "default";

    #[must_use]
    pub fn project() -> ProjectSnapshot {
        ProjectSnapshot {
            id: PROJECT_ID.to_string(),
            internal_id: 1,
            name: "Acme".to_string(),
            database: "console".to_string(),
            region: REGION.to_string(),
        }
    }

    #[must_use]
    pub fn function(resource_id: &str, cron: &str, updated_at: DateTime<Utc>) -> FunctionSnapshot {
        FunctionSnapshot {
            id: resource_id.to_string(),
            project_id: PROJECT_ID.to_string(),
            name: resource_id.to_string(),
            runtime: "node-20".to_string(),
            entrypoint: "index.js".to_string(),
            schedule: cron.to_string(),
            enabled: true,
            updated_at,
        }
    }

    #[must_use]
    pub fn row(id: i64, resource_id: &str, cron: &str, updated_at: DateTime<Utc>) -> ScheduleRow {
        ScheduleRow {
            id,
            resource_id: resource_id.to_string(),
            resource_type: RESOURCE_TYPE_FUNCTION.to_string(),
            project_id: PROJECT_ID.to_string(),
            schedule: cron.to_string(),
            active: true,
            region: REGION.to_string(),
            resource_updated_at: updated_at,
        }
    }

    #[must_use]
    pub fn record(resource_id: &str, cron: &str, updated_at: DateTime<Utc>) -> ScheduleRecord {
        ScheduleRecord::from_parts(
            &row(0, resource_id, cron, updated_at),
            project(),
            function(resource_id, cron, updated_at),
        )
    }
}

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<i64, ScheduleRow>,
    next_id: i64,
    projects: HashMap<String, ProjectSnapshot>,
    functions: HashMap<(String, String), FunctionSnapshot>,
    /// Resource ids whose function lookup fails transiently.
    flaky: HashSet<String>,
}

/// A [`ScheduleSource`] over in-memory tables.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    failing_pages: AtomicUsize,
    page_calls: AtomicUsize,
}

impl MemoryStore {
    /// A store holding the fixture project and no schedules.
    #[must_use]
    pub fn new() -> Self {
        let store = Self::default();
        store.insert_project(fixtures::project());
        store
    }

    pub fn insert_project(&self, project: ProjectSnapshot) {
        lock(&self.state).projects.insert(project.id.clone(), project);
    }

    /// Insert or replace a schedule row keyed by `resource_id`.
    ///
    /// An existing row keeps its `id`; a new row gets the next one. The
    /// given row's `id` is ignored.
    pub fn upsert_row(&self, mut row: ScheduleRow) -> ScheduleRow {
        let mut state = lock(&self.state);
        let existing = state
            .rows
            .values()
            .find(|r| r.resource_id == row.resource_id && r.resource_type == row.resource_type)
            .map(|r| r.id);
        row.id = match existing {
            Some(id) => id,
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        state.rows.insert(row.id, row.clone());
        row
    }

    /// Register an active function of the fixture project with its snapshot.
    pub fn insert_function(
        &self,
        resource_id: &str,
        cron: &str,
        updated_at: DateTime<Utc>,
    ) -> ScheduleRow {
        let row = self.upsert_row(fixtures::row(0, resource_id, cron, updated_at));
        lock(&self.state).functions.insert(
            (row.project_id.clone(), resource_id.to_string()),
            fixtures::function(resource_id, cron, updated_at),
        );
        row
    }

    /// Flip a row's `active` flag and advance its logical clock.
    pub fn set_active(&self, resource_id: &str, active: bool, updated_at: DateTime<Utc>) {
        let mut state = lock(&self.state);
        if let Some(row) = state.rows.values_mut().find(|r| r.resource_id == resource_id) {
            row.active = active;
            row.resource_updated_at = updated_at;
        }
    }

    /// Change a function's schedule and advance its logical clock.
    pub fn set_schedule(&self, resource_id: &str, cron: &str, updated_at: DateTime<Utc>) {
        let mut state = lock(&self.state);
        let mut project_id = None;
        if let Some(row) = state.rows.values_mut().find(|r| r.resource_id == resource_id) {
            row.schedule = cron.to_string();
            row.resource_updated_at = updated_at;
            project_id = Some(row.project_id.clone());
        }
        if let Some(project_id) = project_id {
            if let Some(function) = state
                .functions
                .get_mut(&(project_id, resource_id.to_string()))
            {
                function.schedule = cron.to_string();
                function.updated_at = updated_at;
            }
        }
    }

    /// Drop a function's snapshot so resolving it reports not-found.
    pub fn delete_function_snapshot(&self, resource_id: &str) {
        lock(&self.state)
            .functions
            .retain(|(_, id), _| id != resource_id);
    }

    /// Make function lookups for `resource_id` fail with a transient error.
    pub fn fail_lookups_for(&self, resource_id: &str) {
        lock(&self.state).flaky.insert(resource_id.to_string());
    }

    pub fn heal_lookups_for(&self, resource_id: &str) {
        lock(&self.state).flaky.remove(resource_id);
    }

    /// Fail the next `count` page queries.
    pub fn fail_next_pages(&self, count: usize) {
        self.failing_pages.store(count, Ordering::SeqCst);
    }

    /// Number of page queries served or failed so far.
    #[must_use]
    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleSource for MemoryStore {
    async fn fetch_page(
        &self,
        filter: &ScheduleFilter,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ScheduleRow>, StoreError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_pages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Unavailable("injected page failure".to_string()));
        }

        let state = lock(&self.state);
        Ok(state
            .rows
            .values()
            .filter(|r| after_id.map_or(true, |after| r.id > after))
            .filter(|r| r.region == filter.region && r.resource_type == filter.resource_type)
            .filter(|r| filter.active.map_or(true, |active| r.active == active))
            .filter(|r| {
                filter
                    .updated_since
                    .map_or(true, |since| r.resource_updated_at >= since)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectSnapshot, StoreError> {
        lock(&self.state)
            .projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            })
    }

    async fn get_function(
        &self,
        project: &ProjectSnapshot,
        function_id: &str,
    ) -> Result<FunctionSnapshot, StoreError> {
        let state = lock(&self.state);
        if state.flaky.contains(function_id) {
            return Err(StoreError::Unavailable(format!(
                "injected lookup failure for {function_id}"
            )));
        }
        state
            .functions
            .get(&(project.id.clone(), function_id.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "function",
                id: format!("{}/{function_id}", project.id),
            })
    }
}

/// A trigger accepted by a [`MemoryQueue`], stamped with the tokio clock.
#[derive(Debug, Clone)]
pub struct EnqueuedTrigger {
    pub trigger: ExecutionTrigger,
    pub at: Instant,
}

#[derive(Default)]
struct QueueState {
    enqueued: Mutex<Vec<EnqueuedTrigger>>,
    rejected: Mutex<HashSet<String>>,
    refused_connects: AtomicUsize,
    connections_opened: AtomicUsize,
    /// Bumped by [`MemoryQueue::restart`]; connections from an older
    /// generation fail every enqueue.
    generation: AtomicUsize,
}

/// A queue that records every trigger it accepts.
///
/// Clones share the same recorded state.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<QueueState>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue pool of `capacity` connections backed by this queue.
    #[must_use]
    pub fn pool(&self, capacity: usize) -> Arc<QueuePool> {
        ResourcePool::new(QUEUE_POOL, capacity, Arc::new(self.clone()))
    }

    #[must_use]
    pub fn enqueued(&self) -> Vec<EnqueuedTrigger> {
        lock(&self.state.enqueued).clone()
    }

    #[must_use]
    pub fn enqueued_ids(&self) -> Vec<String> {
        lock(&self.state.enqueued)
            .iter()
            .map(|e| e.trigger.resource_id.clone())
            .collect()
    }

    /// Reject every enqueue for `resource_id`.
    pub fn reject(&self, resource_id: &str) {
        lock(&self.state.rejected).insert(resource_id.to_string());
    }

    /// Make the next `count` connection attempts fail.
    pub fn refuse_next_connections(&self, count: usize) {
        self.state.refused_connects.store(count, Ordering::SeqCst);
    }

    /// Simulate a database restart: every open connection breaks for good,
    /// new connections work.
    pub fn restart(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.state.connections_opened.load(Ordering::SeqCst)
    }
}

struct MemoryQueueConnection {
    state: Arc<QueueState>,
    generation: usize,
}

#[async_trait]
impl QueueConnection for MemoryQueueConnection {
    async fn enqueue(&mut self, trigger: &ExecutionTrigger) -> Result<(), QueueError> {
        if self.generation != self.state.generation.load(Ordering::SeqCst) {
            return Err(QueueError::Rejected {
                resource_id: trigger.resource_id.clone(),
                reason: "connection closed by server".to_string(),
            });
        }
        if lock(&self.state.rejected).contains(&trigger.resource_id) {
            return Err(QueueError::Rejected {
                resource_id: trigger.resource_id.clone(),
                reason: "injected enqueue failure".to_string(),
            });
        }
        lock(&self.state.enqueued).push(EnqueuedTrigger {
            trigger: trigger.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl ResourceFactory<Box<dyn QueueConnection>> for MemoryQueue {
    async fn create(&self) -> Result<Box<dyn QueueConnection>, PoolError> {
        let refused = self
            .state
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(PoolError::Connect {
                pool: QUEUE_POOL.to_string(),
                reason: "injected connection failure".to_string(),
            });
        }
        self.state.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryQueueConnection {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
        }))
    }
}
