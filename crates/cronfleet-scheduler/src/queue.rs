//! Producer side of the downstream execution queue.

use async_trait::async_trait;
use cronfleet_core::ExecutionTrigger;
use sqlx::{Connection, PgConnection};

use crate::error::{PoolError, QueueError};
use crate::pool::{ResourceFactory, ResourcePool};

/// Pool name used for queue connections in logs and status output.
pub const QUEUE_POOL: &str = "queue";

/// A dedicated connection able to enqueue execution triggers.
#[async_trait]
pub trait QueueConnection: Send {
    async fn enqueue(&mut self, trigger: &ExecutionTrigger) -> Result<(), QueueError>;
}

pub type QueuePool = ResourcePool<Box<dyn QueueConnection>>;

/// Writes triggers to the `execution_queue` table and notifies listeners.
pub struct PgQueueConnection {
    conn: PgConnection,
    queue: String,
}

#[async_trait]
impl QueueConnection for PgQueueConnection {
    async fn enqueue(&mut self, trigger: &ExecutionTrigger) -> Result<(), QueueError> {
        let id = cronfleet_db::enqueue_execution(&mut self.conn, &self.queue, trigger).await?;
        tracing::debug!(
            queue = %self.queue,
            queue_id = id,
            resource_id = %trigger.resource_id,
            "scheduler: trigger enqueued"
        );
        Ok(())
    }
}

/// Opens [`PgQueueConnection`]s against the queue database.
pub struct PgQueueConnector {
    database_url: String,
    queue: String,
}

impl PgQueueConnector {
    #[must_use]
    pub fn new(database_url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            queue: queue.into(),
        }
    }
}

impl std::fmt::Debug for PgQueueConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgQueueConnector")
            .field("database_url", &"[redacted]")
            .field("queue", &self.queue)
            .finish()
    }
}

#[async_trait]
impl ResourceFactory<Box<dyn QueueConnection>> for PgQueueConnector {
    async fn create(&self) -> Result<Box<dyn QueueConnection>, PoolError> {
        let conn = PgConnection::connect(&self.database_url)
            .await
            .map_err(|e| PoolError::Connect {
                pool: QUEUE_POOL.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(PgQueueConnection {
            conn,
            queue: self.queue.clone(),
        }))
    }
}
