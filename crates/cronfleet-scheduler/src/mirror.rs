//! The in-memory schedule registry.
//!
//! Only the sync tick writes; planner and dispatch tasks read. Every access
//! goes through the internal [`RwLock`], so a dispatch task that wakes up
//! always sees the registry as it is now, never as it was at planning time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use cronfleet_core::ScheduleRecord;
use tokio::sync::RwLock;

/// What an [`Mirror::upsert`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Same logical clock as the cached record.
    Unchanged,
    /// Older logical clock than the cached record; ignored.
    Stale,
}

impl UpsertOutcome {
    #[must_use]
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

#[derive(Debug, Default)]
pub struct Mirror {
    records: RwLock<HashMap<String, ScheduleRecord>>,
}

impl Mirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, resource_id: &str) -> Option<ScheduleRecord> {
        self.records.read().await.get(resource_id).cloned()
    }

    pub async fn contains(&self, resource_id: &str) -> bool {
        self.records.read().await.contains_key(resource_id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn resource_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `(resource_id, cron_expression)` for every mirrored record, taken under
    /// a single read lock.
    pub async fn snapshot_schedules(&self) -> Vec<(String, String)> {
        self.records
            .read()
            .await
            .values()
            .map(|r| (r.resource_id.clone(), r.cron_expression.clone()))
            .collect()
    }

    /// Whether a row carrying `updated_at` should be re-resolved and upserted.
    ///
    /// True when the id is absent or its cached clock is strictly older.
    pub async fn needs_refresh(&self, resource_id: &str, updated_at: DateTime<Utc>) -> bool {
        match self.records.read().await.get(resource_id) {
            Some(cached) => cached.resource_updated_at < updated_at,
            None => true,
        }
    }

    /// Insert or replace a record, never moving its logical clock backwards.
    pub async fn upsert(&self, record: ScheduleRecord) -> UpsertOutcome {
        let mut records = self.records.write().await;
        match records.get(&record.resource_id) {
            Some(cached) if cached.resource_updated_at > record.resource_updated_at => {
                UpsertOutcome::Stale
            }
            Some(cached) if cached.resource_updated_at == record.resource_updated_at => {
                UpsertOutcome::Unchanged
            }
            Some(_) => {
                records.insert(record.resource_id.clone(), record);
                UpsertOutcome::Updated
            }
            None => {
                records.insert(record.resource_id.clone(), record);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Remove a record. Returns whether it was present.
    pub async fn remove(&self, resource_id: &str) -> bool {
        self.records.write().await.remove(resource_id).is_some()
    }

    /// Remove a record because of a deactivation observed at `updated_at`.
    ///
    /// A cached record with a strictly newer clock was re-activated after
    /// this row was written and is kept.
    pub async fn deactivate(&self, resource_id: &str, updated_at: DateTime<Utc>) -> bool {
        let mut records = self.records.write().await;
        match records.get(resource_id) {
            Some(cached) if cached.resource_updated_at > updated_at => false,
            Some(_) => records.remove(resource_id).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::memory::fixtures;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn upsert_respects_logical_clock() {
        let mirror = Mirror::new();
        let first = fixtures::record("fn-a", "* * * * *", at(0));

        assert_eq!(mirror.upsert(first.clone()).await, UpsertOutcome::Inserted);
        assert_eq!(mirror.upsert(first.clone()).await, UpsertOutcome::Unchanged);

        let older = fixtures::record("fn-a", "*/5 * * * *", at(0) - Duration::minutes(1));
        assert_eq!(mirror.upsert(older).await, UpsertOutcome::Stale);
        assert_eq!(mirror.get("fn-a").await.unwrap().cron_expression, "* * * * *");

        let newer = fixtures::record("fn-a", "*/5 * * * *", at(1));
        assert_eq!(mirror.upsert(newer).await, UpsertOutcome::Updated);
        assert_eq!(mirror.get("fn-a").await.unwrap().cron_expression, "*/5 * * * *");
    }

    #[tokio::test]
    async fn needs_refresh_only_for_newer_or_absent() {
        let mirror = Mirror::new();
        assert!(mirror.needs_refresh("fn-a", at(0)).await);

        mirror.upsert(fixtures::record("fn-a", "* * * * *", at(5))).await;
        assert!(!mirror.needs_refresh("fn-a", at(5)).await);
        assert!(!mirror.needs_refresh("fn-a", at(4)).await);
        assert!(mirror.needs_refresh("fn-a", at(6)).await);
    }

    #[tokio::test]
    async fn deactivate_keeps_newer_record() {
        let mirror = Mirror::new();
        mirror.upsert(fixtures::record("fn-a", "* * * * *", at(5))).await;

        assert!(!mirror.deactivate("fn-a", at(4)).await);
        assert!(mirror.contains("fn-a").await);

        assert!(mirror.deactivate("fn-a", at(5)).await);
        assert!(!mirror.contains("fn-a").await);
        assert!(!mirror.deactivate("fn-a", at(6)).await);
    }

    #[tokio::test]
    async fn snapshot_lists_every_record() {
        let mirror = Mirror::new();
        mirror.upsert(fixtures::record("fn-a", "* * * * *", at(0))).await;
        mirror.upsert(fixtures::record("fn-b", "*/5 * * * *", at(0))).await;

        let mut pairs = mirror.snapshot_schedules().await;
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("fn-a".to_string(), "* * * * *".to_string()),
                ("fn-b".to_string(), "*/5 * * * *".to_string()),
            ]
        );
        assert_eq!(mirror.resource_ids().await, vec!["fn-a", "fn-b"]);
    }
}
