//! The cronfleet scheduling core.
//!
//! A [`Mirror`] of every active function schedule in the local region is
//! loaded once by [`load_all`], kept current by the [`SyncEngine`], scanned
//! by the [`DispatchPlanner`] and fanned out to the execution queue by the
//! [`Dispatcher`]. [`SchedulerEngine`] drives the two periodic ticks.

pub mod bootstrap;
pub mod dispatcher;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod mirror;
pub mod planner;
pub mod pool;
pub mod queue;
pub mod store;
pub mod sync;

pub use bootstrap::{load_all, LoadReport};
pub use dispatcher::{BucketOutcome, DispatchOutcome, Dispatcher};
pub use engine::{PoolStatus, SchedulerEngine, SchedulerStatus};
pub use error::{PoolError, QueueError, SchedulerError, StoreError};
pub use mirror::{Mirror, UpsertOutcome};
pub use planner::{DispatchPlan, DispatchPlanner, DueJob, PlanSummary};
pub use pool::{Lease, PoolGroup, PoolStats, Reclaim, ResourceFactory, ResourcePool, UnitOfWork};
pub use queue::{PgQueueConnector, QueueConnection, QueuePool, QUEUE_POOL};
pub use store::{resolve_record, PgScheduleStore, SchedulePager, ScheduleSource, CONSOLE_SHARD};
pub use sync::{SyncEngine, SyncReport, SyncStatus};
