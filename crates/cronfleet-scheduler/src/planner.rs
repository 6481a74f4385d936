//! Periodic scan of the mirror for jobs due within the coming window.
//!
//! The window normally ends where the next planner tick is expected to
//! start. When the timer runs late or early, the measured drift is
//! subtracted so consecutive windows neither gap nor overlap.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronfleet_core::CronSchedule;
use serde::Serialize;
use tokio::time::Instant;

use crate::mirror::Mirror;

/// One job due in the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueJob {
    pub resource_id: String,
    pub next_fire: DateTime<Utc>,
}

/// Due jobs grouped by whole-second delay from the planning instant.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub planned_at: DateTime<Utc>,
    /// Tokio clock reading taken together with `planned_at`; dispatch
    /// sleeps are measured from here.
    pub planned_instant: Instant,
    pub window_end: DateTime<Utc>,
    pub buckets: BTreeMap<u64, Vec<DueJob>>,
    pub invalid: usize,
}

impl DispatchPlan {
    #[must_use]
    pub fn due_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            planned_at: self.planned_at,
            window_end: self.window_end,
            due: self.due_count(),
            buckets: self.buckets.len(),
            invalid: self.invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub planned_at: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub due: usize,
    pub buckets: usize,
    pub invalid: usize,
}

/// End of the look-ahead window for a tick at `now`.
///
/// `since_last` is the time elapsed since the previous tick started, `None`
/// on the first tick. The drift `since_last - period` is clamped to
/// `(-period, period)` so the window is never empty nor more than two
/// periods long.
#[must_use]
pub fn window_end(now: DateTime<Utc>, period: Duration, since_last: Option<Duration>) -> DateTime<Utc> {
    let period = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::MAX);
    let drift = match since_last {
        Some(elapsed) => {
            let elapsed = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::MAX);
            let bound = period - chrono::Duration::milliseconds(1);
            (elapsed - period).clamp(-bound, bound)
        }
        None => chrono::Duration::zero(),
    };
    now + period - drift
}

/// Whole-second delay from `now` until `next_fire`, never negative.
///
/// Sleeping this long from `now` never wakes before `next_fire` and wakes
/// less than a second after it.
#[must_use]
pub fn delay_secs(now: DateTime<Utc>, next_fire: DateTime<Utc>) -> u64 {
    u64::try_from(next_fire.timestamp() - now.timestamp()).unwrap_or(0)
}

/// Group every schedule firing in `(now, window_end)` by delay.
///
/// Returns the buckets and the number of malformed expressions.
#[must_use]
pub fn plan_due(
    schedules: &[(String, String)],
    now: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> (BTreeMap<u64, Vec<DueJob>>, usize) {
    let mut buckets: BTreeMap<u64, Vec<DueJob>> = BTreeMap::new();
    let mut invalid = 0;

    for (resource_id, expression) in schedules {
        let schedule = match CronSchedule::parse(expression) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    resource_id = %resource_id,
                    error = %e,
                    "scheduler: malformed cron expression; job is never due"
                );
                invalid += 1;
                continue;
            }
        };

        let Some(next_fire) = schedule.next_after(now) else {
            continue;
        };
        if next_fire >= window_end {
            continue;
        }

        buckets
            .entry(delay_secs(now, next_fire))
            .or_default()
            .push(DueJob {
                resource_id: resource_id.clone(),
                next_fire,
            });
    }

    (buckets, invalid)
}

pub struct DispatchPlanner {
    mirror: Arc<Mirror>,
    period: Duration,
    last_tick: Mutex<Option<Instant>>,
    last_plan: Mutex<Option<PlanSummary>>,
}

impl DispatchPlanner {
    #[must_use]
    pub fn new(mirror: Arc<Mirror>, period: Duration) -> Self {
        Self {
            mirror,
            period,
            last_tick: Mutex::new(None),
            last_plan: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn last_plan(&self) -> Option<PlanSummary> {
        self.last_plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Plan the window starting now.
    pub async fn plan(&self) -> DispatchPlan {
        self.plan_at(Utc::now(), Instant::now()).await
    }

    /// Plan with an explicit wall-clock `now` and tokio clock reading.
    pub async fn plan_at(&self, now: DateTime<Utc>, instant: Instant) -> DispatchPlan {
        let since_last = self
            .last_tick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(instant)
            .map(|prev| instant.saturating_duration_since(prev));

        let window_end = window_end(now, self.period, since_last);
        let schedules = self.mirror.snapshot_schedules().await;
        let (buckets, invalid) = plan_due(&schedules, now, window_end);

        let plan = DispatchPlan {
            planned_at: now,
            planned_instant: instant,
            window_end,
            buckets,
            invalid,
        };
        let summary = plan.summary();
        tracing::info!(
            scanned = schedules.len(),
            due = summary.due,
            buckets = summary.buckets,
            invalid = summary.invalid,
            window_end = %window_end,
            "scheduler: dispatch planned"
        );
        *self.last_plan.lock().unwrap_or_else(PoisonError::into_inner) = Some(summary);
        plan
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, h, m, s).unwrap()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(id, cron)| ((*id).to_string(), (*cron).to_string()))
            .collect()
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn first_window_is_one_period() {
        assert_eq!(window_end(ts(9, 0, 0), MINUTE, None), ts(9, 1, 0));
    }

    #[test]
    fn late_tick_shortens_window() {
        // Previous tick ran 62s ago: the next one is expected 58s from now.
        let end = window_end(ts(9, 0, 0), MINUTE, Some(Duration::from_secs(62)));
        assert_eq!(end, ts(9, 0, 58));
    }

    #[test]
    fn early_tick_lengthens_window() {
        let end = window_end(ts(9, 0, 0), MINUTE, Some(Duration::from_secs(57)));
        assert_eq!(end, ts(9, 1, 3));
    }

    #[test]
    fn drift_is_clamped_below_one_period() {
        let end = window_end(ts(9, 0, 0), MINUTE, Some(Duration::from_secs(600)));
        assert!(end > ts(9, 0, 0));
        assert!(end < ts(9, 0, 1));
    }

    #[test]
    fn delay_rounds_so_fire_is_never_early() {
        let now = ts(9, 0, 0) + chrono::Duration::milliseconds(700);
        assert_eq!(delay_secs(now, ts(9, 0, 5)), 5);
        assert_eq!(delay_secs(ts(9, 0, 10), ts(9, 0, 5)), 0);
    }

    #[test]
    fn jobs_in_the_same_second_share_a_bucket() {
        let schedules = pairs(&[
            ("fn-a", "*/5 * * * *"),
            ("fn-b", "0,5,10 * * * *"),
            ("fn-c", "30 9 * * *"),
        ]);
        let now = ts(9, 3, 20);
        let (buckets, invalid) = plan_due(&schedules, now, ts(9, 4, 20) + chrono::Duration::minutes(1));

        assert_eq!(invalid, 0);
        assert_eq!(buckets.len(), 1);
        let ids: Vec<&str> = buckets[&100].iter().map(|j| j.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["fn-a", "fn-b"]);
    }

    #[test]
    fn fire_at_window_end_is_not_due() {
        let schedules = pairs(&[("fn-a", "* * * * *")]);
        let (buckets, _) = plan_due(&schedules, ts(9, 0, 0), ts(9, 1, 0));
        assert!(buckets.is_empty());
    }

    #[test]
    fn malformed_expression_is_counted_and_skipped() {
        let schedules = pairs(&[("fn-bad", "every tuesday"), ("fn-ok", "* * * * *")]);
        let (buckets, invalid) = plan_due(&schedules, ts(9, 0, 30), ts(9, 1, 30));
        assert_eq!(invalid, 1);
        assert_eq!(buckets[&30][0].resource_id, "fn-ok");
    }

    #[tokio::test]
    async fn planner_measures_drift_between_ticks() {
        let mirror = Arc::new(Mirror::new());
        let planner = DispatchPlanner::new(mirror, MINUTE);
        let start = Instant::now();

        let first = planner.plan_at(ts(9, 0, 0), start).await;
        assert_eq!(first.window_end, ts(9, 1, 0));

        let second = planner
            .plan_at(ts(9, 1, 2), start + Duration::from_secs(62))
            .await;
        assert_eq!(second.window_end, ts(9, 2, 0));
        assert_eq!(planner.last_plan().unwrap().due, 0);
    }
}
