//! Read access to the persisted schedule store.
//!
//! [`ScheduleSource`] is the seam between the scheduler and Postgres. The
//! production implementation is [`PgScheduleStore`]: schedules and projects
//! live in the console database, functions live on the shard named by the
//! owning project.

use std::collections::HashMap;

use async_trait::async_trait;
use cronfleet_core::{AppConfig, FunctionSnapshot, ProjectSnapshot, ScheduleRecord, ScheduleRow};
use cronfleet_db::{DbError, PoolConfig, ScheduleFilter};
use sqlx::PgPool;

use crate::error::StoreError;

/// Name under which the console database is always reachable as a shard.
pub const CONSOLE_SHARD: &str = "console";

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// One page of rows ordered by `id`, strictly after `after_id`.
    async fn fetch_page(
        &self,
        filter: &ScheduleFilter,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ScheduleRow>, StoreError>;

    async fn get_project(&self, project_id: &str) -> Result<ProjectSnapshot, StoreError>;

    /// Look up a function on the shard that holds `project`'s data.
    async fn get_function(
        &self,
        project: &ProjectSnapshot,
        function_id: &str,
    ) -> Result<FunctionSnapshot, StoreError>;
}

/// Resolve both snapshots for `row` and combine them into a mirror record.
///
/// # Errors
///
/// Propagates the first lookup failure. [`StoreError::is_unschedulable`]
/// tells the caller whether the failure is permanent for this row.
pub async fn resolve_record(
    source: &dyn ScheduleSource,
    row: &ScheduleRow,
) -> Result<ScheduleRecord, StoreError> {
    let project = source.get_project(&row.project_id).await?;
    let function = source.get_function(&project, &row.resource_id).await?;
    Ok(ScheduleRecord::from_parts(row, project, function))
}

/// Cursor-after walk over a filtered schedule scan.
///
/// Each page's last `id` becomes the cursor for the next. The walk ends
/// after the first page shorter than the page size.
#[derive(Debug)]
pub struct SchedulePager {
    filter: ScheduleFilter,
    page_size: usize,
    cursor: Option<i64>,
    done: bool,
    pages: usize,
}

impl SchedulePager {
    #[must_use]
    pub fn new(filter: ScheduleFilter, page_size: usize) -> Self {
        Self {
            filter,
            page_size: page_size.max(1),
            cursor: None,
            done: false,
            pages: 0,
        }
    }

    #[must_use]
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Fetch the next page, or `None` once the scan is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the pager stays at the same cursor so
    /// the call can be repeated.
    pub async fn next_page(
        &mut self,
        source: &dyn ScheduleSource,
    ) -> Result<Option<Vec<ScheduleRow>>, StoreError> {
        if self.done {
            return Ok(None);
        }

        let rows = source
            .fetch_page(&self.filter, self.cursor, self.page_size)
            .await?;
        self.pages += 1;

        if rows.len() < self.page_size {
            self.done = true;
        }
        match rows.last() {
            Some(last) => self.cursor = Some(last.id),
            None => return Ok(None),
        }
        Ok(Some(rows))
    }
}

/// Postgres-backed [`ScheduleSource`].
#[derive(Debug, Clone)]
pub struct PgScheduleStore {
    console: PgPool,
    shards: HashMap<String, PgPool>,
}

impl PgScheduleStore {
    /// `shards` maps shard names (the `projects.database` column) to pools.
    /// The console pool is registered as [`CONSOLE_SHARD`] unless the map
    /// already carries that name.
    #[must_use]
    pub fn new(console: PgPool, mut shards: HashMap<String, PgPool>) -> Self {
        shards
            .entry(CONSOLE_SHARD.to_string())
            .or_insert_with(|| console.clone());
        Self { console, shards }
    }

    /// Open a pool for every configured shard.
    ///
    /// Shards whose URL is the console URL share the `console` pool.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if any shard cannot be reached.
    pub async fn connect(config: &AppConfig, console: PgPool) -> Result<Self, DbError> {
        let pool_config = PoolConfig::from_app_config(config);
        let mut shards = HashMap::with_capacity(config.shards.len());
        for shard in &config.shards {
            let pool = if shard.database_url == config.database_url {
                console.clone()
            } else {
                cronfleet_db::connect_pool(&shard.database_url, pool_config).await?
            };
            tracing::debug!(shard = %shard.name, "scheduler: shard pool ready");
            shards.insert(shard.name.clone(), pool);
        }
        Ok(Self::new(console, shards))
    }

    #[must_use]
    pub fn console(&self) -> &PgPool {
        &self.console
    }

    #[must_use]
    pub fn shard_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.shards.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ScheduleSource for PgScheduleStore {
    async fn fetch_page(
        &self,
        filter: &ScheduleFilter,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ScheduleRow>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(cronfleet_db::list_schedules_page(&self.console, filter, after_id, limit).await?)
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectSnapshot, StoreError> {
        Ok(cronfleet_db::get_project(&self.console, project_id)
            .await?
            .into())
    }

    async fn get_function(
        &self,
        project: &ProjectSnapshot,
        function_id: &str,
    ) -> Result<FunctionSnapshot, StoreError> {
        let pool = self
            .shards
            .get(&project.database)
            .ok_or_else(|| StoreError::UnknownShard {
                project_id: project.id.clone(),
                shard: project.database.clone(),
            })?;
        Ok(cronfleet_db::get_function(pool, &project.id, function_id)
            .await?
            .into())
    }
}
