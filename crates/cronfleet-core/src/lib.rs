pub mod app_config;
pub mod config;
pub mod cron_expr;
pub mod schedule;

pub use app_config::{AppConfig, Environment, ShardConfig};
pub use config::{load_app_config, load_app_config_from_env};
pub use cron_expr::{CronError, CronSchedule};
pub use schedule::{
    ExecutionTrigger, FunctionSnapshot, ProjectSnapshot, ScheduleRecord, ScheduleRow,
    RESOURCE_TYPE_FUNCTION, TRIGGER_TYPE_SCHEDULE,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
