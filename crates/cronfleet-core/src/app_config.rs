use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// A named data shard holding per-project `functions` tables.
#[derive(Clone, PartialEq, Eq)]
pub struct ShardConfig {
    pub name: String,
    pub database_url: String,
}

impl std::fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConfig")
            .field("name", &self.name)
            .field("database_url", &"[redacted]")
            .finish()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub region: String,
    pub shards: Vec<ShardConfig>,
    pub queue_url: String,
    pub queue_name: String,
    pub queue_pool_size: usize,
    pub sync_interval_secs: u64,
    pub plan_interval_secs: u64,
    pub load_page_size: usize,
    pub sync_page_size: usize,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
}

impl AppConfig {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    #[must_use]
    pub fn plan_interval(&self) -> Duration {
        Duration::from_secs(self.plan_interval_secs)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("region", &self.region)
            .field("database_url", &"[redacted]")
            .field("shards", &self.shards)
            .field("queue_url", &"[redacted]")
            .field("queue_name", &self.queue_name)
            .field("queue_pool_size", &self.queue_pool_size)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("plan_interval_secs", &self.plan_interval_secs)
            .field("load_page_size", &self.load_page_size)
            .field("sync_page_size", &self.sync_page_size)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .finish()
    }
}
