mod cron;
mod schedules;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cron::CronCommands;
use crate::schedules::ScheduleCommands;

#[derive(Debug, Parser)]
#[command(name = "cronfleet-cli")]
#[command(about = "cronfleet scheduler command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Inspect the schedule store without dispatching anything
    Schedules {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Evaluate cron expressions
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the console database answers
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Db { command }) => run_db(command).await,
        Some(Commands::Schedules { command }) => schedules::run(command).await,
        Some(Commands::Cron { command }) => cron::run(&command),
        None => {
            println!("cronfleet-cli: use --help to list commands");
            Ok(())
        }
    }
}

async fn run_db(command: DbCommands) -> anyhow::Result<()> {
    let config = cronfleet_core::load_app_config()?;
    let pool_config = cronfleet_db::PoolConfig::from_app_config(&config);
    let pool = cronfleet_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        DbCommands::Ping => {
            cronfleet_db::health_check(&pool).await?;
            println!("database ok");
        }
        DbCommands::Migrate => {
            let applied = cronfleet_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
    }
    Ok(())
}
