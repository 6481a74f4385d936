use cronfleet_db::DbError;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool \"{pool}\" exhausted ({capacity} connections in use)")]
    Exhausted { pool: String, capacity: usize },

    #[error("pool \"{pool}\" failed to open a connection: {reason}")]
    Connect { pool: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("project {project_id} lives on unknown shard \"{shard}\"")]
    UnknownShard { project_id: String, shard: String },

    #[error("store backend error: {0}")]
    Backend(#[source] DbError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the record can never be scheduled in its current state, as
    /// opposed to a transient failure worth keeping stale data for.
    #[must_use]
    pub fn is_unschedulable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnknownShard { .. })
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Backend(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("queue rejected trigger for {resource_id}: {reason}")]
    Rejected { resource_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("previous {0} tick is still running")]
    TickInProgress(&'static str),

    #[error(transparent)]
    Timer(#[from] JobSchedulerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_not_found_maps_to_unschedulable() {
        let err = StoreError::from(DbError::NotFound {
            entity: "function",
            id: "p/f".to_string(),
        });
        assert!(err.is_unschedulable());
        assert_eq!(err.to_string(), "function not found: p/f");
    }

    #[test]
    fn unavailable_is_transient() {
        let err = StoreError::Unavailable("connection reset".to_string());
        assert!(!err.is_unschedulable());
    }

    #[test]
    fn exhausted_message_names_pool() {
        let err = PoolError::Exhausted {
            pool: "queue".to_string(),
            capacity: 4,
        };
        assert_eq!(err.to_string(), "pool \"queue\" exhausted (4 connections in use)");
    }
}
