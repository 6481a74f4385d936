//! `schedules` subcommands: read-only views of what the scheduler would do.

use std::sync::Arc;

use chrono::SecondsFormat;
use clap::Subcommand;
use cronfleet_scheduler::{load_all, DispatchPlan, DispatchPlanner, Mirror, PgScheduleStore};

#[derive(Debug, Subcommand)]
pub enum ScheduleCommands {
    /// Load every active schedule of the region and report counts
    Load {
        /// Region to load (defaults to CRONFLEET_REGION)
        #[arg(long)]
        region: Option<String>,
    },
    /// Compute the coming dispatch window without enqueuing anything
    Plan {
        /// Region to plan (defaults to CRONFLEET_REGION)
        #[arg(long)]
        region: Option<String>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: ScheduleCommands) -> anyhow::Result<()> {
    let config = cronfleet_core::load_app_config()?;
    let pool_config = cronfleet_db::PoolConfig::from_app_config(&config);
    let pool = cronfleet_db::connect_pool(&config.database_url, pool_config).await?;
    let store = PgScheduleStore::connect(&config, pool).await?;
    let mirror = Arc::new(Mirror::new());

    match command {
        ScheduleCommands::Load { region } => {
            let region = region.unwrap_or_else(|| config.region.clone());
            let report = load_all(&store, &mirror, &region, config.load_page_size).await?;
            println!(
                "region {region}: loaded {} schedule(s), skipped {}, {} page(s) in {} ms",
                report.loaded,
                report.skipped,
                report.pages,
                report.elapsed.as_millis()
            );
        }
        ScheduleCommands::Plan { region, json } => {
            let region = region.unwrap_or_else(|| config.region.clone());
            load_all(&store, &mirror, &region, config.load_page_size).await?;
            let plan = DispatchPlanner::new(Arc::clone(&mirror), config.plan_interval())
                .plan()
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan_json(&plan))?);
            } else {
                for line in render_plan(&plan) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub fn render_plan(plan: &DispatchPlan) -> Vec<String> {
    let mut lines = vec![format!(
        "window {} .. {}: {} job(s) in {} bucket(s), {} invalid",
        plan.planned_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        plan.window_end.to_rfc3339_opts(SecondsFormat::Secs, true),
        plan.due_count(),
        plan.buckets.len(),
        plan.invalid,
    )];
    for (delay, jobs) in &plan.buckets {
        let ids: Vec<&str> = jobs.iter().map(|j| j.resource_id.as_str()).collect();
        lines.push(format!("  +{delay}s  {}", ids.join(", ")));
    }
    lines
}

fn plan_json(plan: &DispatchPlan) -> serde_json::Value {
    serde_json::json!({
        "summary": plan.summary(),
        "buckets": plan
            .buckets
            .iter()
            .map(|(delay, jobs)| serde_json::json!({ "delay_secs": delay, "jobs": jobs }))
            .collect::<Vec<_>>(),
    })
}
