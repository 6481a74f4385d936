//! `cron` subcommands: offline evaluation of cron expressions.

use chrono::{DateTime, SecondsFormat, Utc};
use clap::Subcommand;
use cronfleet_core::CronSchedule;

#[derive(Debug, Subcommand)]
pub enum CronCommands {
    /// Print the next fire instants of an expression
    Next {
        /// Five-field (or six-field, seconds first) cron expression
        expression: String,
        /// How many instants to print
        #[arg(long, default_value = "5")]
        count: usize,
        /// Evaluate after this RFC 3339 instant instead of now
        #[arg(long)]
        after: Option<DateTime<Utc>>,
    },
}

pub fn run(command: &CronCommands) -> anyhow::Result<()> {
    match command {
        CronCommands::Next {
            expression,
            count,
            after,
        } => {
            let after = after.unwrap_or_else(Utc::now);
            for line in upcoming_lines(expression, after, *count)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}

/// Render the next `count` fire instants after `after`, one per line.
pub fn upcoming_lines(
    expression: &str,
    after: DateTime<Utc>,
    count: usize,
) -> anyhow::Result<Vec<String>> {
    let schedule = CronSchedule::parse(expression)?;
    Ok(schedule
        .upcoming(after, count)
        .into_iter()
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .collect())
}
