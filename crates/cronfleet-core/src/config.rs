use crate::app_config::{AppConfig, Environment, ShardConfig};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_positive_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        match parse_u64(var, default)? {
            0 => Err(invalid(var, "must be greater than zero".to_string())),
            n => Ok(n),
        }
    };

    let parse_positive_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        match or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))?
        {
            0 => Err(invalid(var, "must be greater than zero".to_string())),
            n => Ok(n),
        }
    };

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("CRONFLEET_ENV", "development"))?;

    let bind_addr = or_default("CRONFLEET_BIND_ADDR", "0.0.0.0:3080")
        .parse::<SocketAddr>()
        .map_err(|e| invalid("CRONFLEET_BIND_ADDR", e.to_string()))?;
    let log_level = or_default("CRONFLEET_LOG_LEVEL", "info");

    let region = or_default("CRONFLEET_REGION", "default");
    if region.trim().is_empty() {
        return Err(invalid("CRONFLEET_REGION", "must not be empty".to_string()));
    }

    let shards = parse_shards(&or_default("CRONFLEET_SHARDS", ""), &database_url)?;

    let queue_url = lookup("CRONFLEET_QUEUE_URL").unwrap_or_else(|_| database_url.clone());
    let queue_name = or_default("CRONFLEET_QUEUE_NAME", "v1-functions");
    let queue_pool_size = parse_positive_usize("CRONFLEET_QUEUE_POOL_SIZE", "16")?;

    let sync_interval_secs = parse_positive_u64("CRONFLEET_SYNC_INTERVAL_SECS", "10")?;
    let plan_interval_secs = parse_positive_u64("CRONFLEET_PLAN_INTERVAL_SECS", "60")?;
    let load_page_size = parse_positive_usize("CRONFLEET_LOAD_PAGE_SIZE", "10000")?;
    let sync_page_size = parse_positive_usize("CRONFLEET_SYNC_PAGE_SIZE", "1000")?;

    let db_max_connections = parse_u32("CRONFLEET_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("CRONFLEET_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("CRONFLEET_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        region,
        shards,
        queue_url,
        queue_name,
        queue_pool_size,
        sync_interval_secs,
        plan_interval_secs,
        load_page_size,
        sync_page_size,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "CRONFLEET_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

/// Parse `name=url,name=url` into shard configs.
///
/// The console database is always registered as the `console` shard unless
/// the list overrides it.
fn parse_shards(raw: &str, console_url: &str) -> Result<Vec<ShardConfig>, ConfigError> {
    let mut shards: Vec<ShardConfig> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, url)) = entry.split_once('=') else {
            return Err(ConfigError::InvalidEnvVar {
                var: "CRONFLEET_SHARDS".to_string(),
                reason: format!("expected name=url, got \"{entry}\""),
            });
        };
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::InvalidEnvVar {
                var: "CRONFLEET_SHARDS".to_string(),
                reason: format!("empty shard name or url in \"{entry}\""),
            });
        }
        if shards.iter().any(|s| s.name == name) {
            return Err(ConfigError::InvalidEnvVar {
                var: "CRONFLEET_SHARDS".to_string(),
                reason: format!("duplicate shard \"{name}\""),
            });
        }
        shards.push(ShardConfig {
            name: name.to_string(),
            database_url: url.to_string(),
        });
    }

    if !shards.iter().any(|s| s.name == "console") {
        shards.insert(
            0,
            ShardConfig {
                name: "console".to_string(),
                database_url: console_url.to_string(),
            },
        );
    }

    Ok(shards)
}
