//! Schedule records, tenant snapshots, and the execution-trigger message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only schedulable resource kind handled by the scheduler today.
pub const RESOURCE_TYPE_FUNCTION: &str = "function";

/// `type` discriminator carried by every dispatched trigger.
pub const TRIGGER_TYPE_SCHEDULE: &str = "schedule";

/// A row of the persisted `schedules` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    /// Sequential key used as the pagination cursor.
    pub id: i64,
    pub resource_id: String,
    pub resource_type: String,
    pub project_id: String,
    pub schedule: String,
    pub active: bool,
    pub region: String,
    pub resource_updated_at: DateTime<Utc>,
}

/// Denormalized descriptor of the tenant that owns a scheduled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: String,
    pub internal_id: i64,
    pub name: String,
    /// Name of the data shard holding this project's functions.
    pub database: String,
    pub region: String,
}

/// Denormalized descriptor of the scheduled function itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSnapshot {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub runtime: String,
    pub entrypoint: String,
    pub schedule: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// One mirrored, schedulable job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleRecord {
    pub resource_id: String,
    pub project_id: String,
    pub cron_expression: String,
    pub active: bool,
    pub region: String,
    pub resource_type: String,
    pub resource_updated_at: DateTime<Utc>,
    pub project: ProjectSnapshot,
    pub function: FunctionSnapshot,
}

impl ScheduleRecord {
    /// Combine a persisted row with its resolved snapshots.
    #[must_use]
    pub fn from_parts(row: &ScheduleRow, project: ProjectSnapshot, function: FunctionSnapshot) -> Self {
        Self {
            resource_id: row.resource_id.clone(),
            project_id: row.project_id.clone(),
            cron_expression: row.schedule.clone(),
            active: row.active,
            region: row.region.clone(),
            resource_type: row.resource_type.clone(),
            resource_updated_at: row.resource_updated_at,
            project,
            function,
        }
    }
}

/// Message handed to the downstream dispatch queue for one fired job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrigger {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub trigger_type: String,
    pub resource_id: String,
    pub project: ProjectSnapshot,
    pub function: FunctionSnapshot,
    pub method: String,
    pub path: String,
    /// The cron fire instant this trigger was planned for.
    pub scheduled_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

impl ExecutionTrigger {
    /// Build a `schedule` trigger from a mirrored record.
    #[must_use]
    pub fn scheduled(
        record: &ScheduleRecord,
        scheduled_at: DateTime<Utc>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_type: TRIGGER_TYPE_SCHEDULE.to_string(),
            resource_id: record.resource_id.clone(),
            project: record.project.clone(),
            function: record.function.clone(),
            method: "POST".to_string(),
            path: "/".to_string(),
            scheduled_at,
            enqueued_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample_record() -> ScheduleRecord {
        let updated = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();
        let row = ScheduleRow {
            id: 7,
            resource_id: "fn-report".to_string(),
            resource_type: RESOURCE_TYPE_FUNCTION.to_string(),
            project_id: "proj-acme".to_string(),
            schedule: "0 * * * *".to_string(),
            active: true,
            region: "default".to_string(),
            resource_updated_at: updated,
        };
        let project = ProjectSnapshot {
            id: "proj-acme".to_string(),
            internal_id: 12,
            name: "Acme".to_string(),
            database: "db_main".to_string(),
            region: "default".to_string(),
        };
        let function = FunctionSnapshot {
            id: "fn-report".to_string(),
            project_id: "proj-acme".to_string(),
            name: "Nightly report".to_string(),
            runtime: "node-20".to_string(),
            entrypoint: "index.js".to_string(),
            schedule: "0 * * * *".to_string(),
            enabled: true,
            updated_at: updated,
        };
        ScheduleRecord::from_parts(&row, project, function)
    }

    #[test]
    fn record_copies_row_fields() {
        let record = sample_record();
        assert_eq!(record.resource_id, "fn-report");
        assert_eq!(record.cron_expression, "0 * * * *");
        assert_eq!(record.project.database, "db_main");
        assert!(record.active);
    }

    #[test]
    fn trigger_serializes_type_discriminator() {
        let record = sample_record();
        let fire = Utc.with_ymd_and_hms(2026, 10, 15, 13, 0, 0).unwrap();
        let trigger = ExecutionTrigger::scheduled(&record, fire, fire);
        let json = serde_json::to_value(&trigger).expect("serialize");
        assert_eq!(json["type"], "schedule");
        assert_eq!(json["resource_id"], "fn-report");
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/");
        assert_eq!(json["project"]["id"], "proj-acme");
        assert_eq!(json["function"]["runtime"], "node-20");
    }
}
