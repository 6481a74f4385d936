//! Wires the scheduling core to Postgres at server startup.

use std::sync::Arc;

use chrono::Utc;
use cronfleet_core::AppConfig;
use cronfleet_scheduler::{
    load_all, Dispatcher, DispatchPlanner, Mirror, PgQueueConnector, PgScheduleStore, PoolGroup,
    QueuePool, ResourcePool, ScheduleSource, SchedulerEngine, SyncEngine, QUEUE_POOL,
};
use sqlx::PgPool;

/// Connect shards and the queue pool, load the mirror, and assemble the
/// engine. The engine is not started.
///
/// # Errors
///
/// Fails if a shard cannot be reached or the initial load fails.
pub async fn build_engine(
    config: &AppConfig,
    console: PgPool,
) -> anyhow::Result<Arc<SchedulerEngine>> {
    let store = PgScheduleStore::connect(config, console).await?;
    tracing::info!(shards = ?store.shard_names(), "scheduler: shard pools connected");
    let source: Arc<dyn ScheduleSource> = Arc::new(store);

    let queue: Arc<QueuePool> = ResourcePool::new(
        QUEUE_POOL,
        config.queue_pool_size,
        Arc::new(PgQueueConnector::new(
            config.queue_url.clone(),
            config.queue_name.clone(),
        )),
    );
    let mut pools = PoolGroup::new();
    pools.register(queue.clone());

    let mirror = Arc::new(Mirror::new());
    let load_started = Utc::now();
    load_all(
        source.as_ref(),
        &mirror,
        &config.region,
        config.load_page_size,
    )
    .await?;

    let sync = SyncEngine::new(
        Arc::clone(&source),
        Arc::clone(&mirror),
        config.region.clone(),
        config.sync_page_size,
        load_started,
    );
    let planner = DispatchPlanner::new(Arc::clone(&mirror), config.plan_interval());
    let dispatcher = Dispatcher::new(Arc::clone(&mirror), queue, pools.clone());

    Ok(Arc::new(SchedulerEngine::new(
        config.region.clone(),
        mirror,
        sync,
        planner,
        dispatcher,
        pools,
        config.sync_interval(),
    )))
}
