//! Per-table activity tracking, debounce policy and heuristic job state.
//!
//! Both maps live behind a single mutex so that an activity update from the
//! consumer and an expiry from the sweeper can never interleave halfway
//! through a read-modify-write.

use crate::{LullError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Heuristic lifecycle of a table's downstream job.
///
/// The orchestrator never observes the job itself. `Active` only means a
/// dispatch succeeded recently; the sweeper returns the table to `Idle` once
/// its activity expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Idle,
    /// A dispatch attempt is in flight
    Dispatching,
    Active,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Dispatching => "dispatching",
            JobState::Active => "active",
        }
    }
}

/// Debounce window and expiry age
#[derive(Debug, Clone, Copy)]
pub struct DebouncePolicy {
    window: TimeDelta,
    expiry: TimeDelta,
}

impl DebouncePolicy {
    pub fn new(window: Duration, expiry: Duration) -> Result<Self> {
        let window = TimeDelta::from_std(window)
            .map_err(|e| LullError::Config(format!("debounce window out of range: {}", e)))?;
        let expiry = TimeDelta::from_std(expiry)
            .map_err(|e| LullError::Config(format!("expiry out of range: {}", e)))?;

        if window <= TimeDelta::zero() {
            return Err(LullError::Config("debounce window must be positive".into()));
        }
        if expiry < window {
            return Err(LullError::Config(
                "expiry must not be shorter than the debounce window".into(),
            ));
        }

        Ok(Self { window, expiry })
    }

    /// Expiry of twice the window
    pub fn with_window(window: Duration) -> Result<Self> {
        Self::new(window, window.saturating_mul(2))
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn expiry(&self) -> TimeDelta {
        self.expiry
    }

    /// `true` when no event was seen before, or the last one is at least a window old
    pub fn is_quiet(&self, prev: Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
        match prev {
            None => true,
            Some(prev) => at - prev >= self.window,
        }
    }

    pub fn is_expired(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last > self.expiry
    }
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            window: TimeDelta::seconds(30),
            expiry: TimeDelta::seconds(60),
        }
    }
}

/// Outcome of recording one qualifying event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Quiet period elapsed and no job is in flight or active
    Eligible,
    /// Previous event is younger than the window
    Debounced { since_last: TimeDelta },
    /// Quiet, but the job state forbids another dispatch
    Busy(JobState),
}

/// Tables touched by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Activity records removed
    pub expired: Vec<String>,
    /// Tables moved from `Active` back to `Idle`
    pub released: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.released.is_empty()
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    activity: HashMap<String, DateTime<Utc>>,
    jobs: HashMap<String, JobState>,
}

impl LedgerState {
    fn job_state(&self, table: &str) -> JobState {
        self.jobs.get(table).copied().unwrap_or_default()
    }
}

/// Shared activity and job-state ledger
#[derive(Debug)]
pub struct ActivityLedger {
    policy: DebouncePolicy,
    state: Mutex<LedgerState>,
}

impl ActivityLedger {
    pub fn new(policy: DebouncePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn policy(&self) -> &DebouncePolicy {
        &self.policy
    }

    /// Record a qualifying event for `table` at `at` and decide eligibility.
    ///
    /// Eligibility is judged against the timestamp recorded *before* this
    /// event; the new timestamp is stored whatever the decision.
    pub async fn observe(&self, table: &str, at: DateTime<Utc>) -> Decision {
        let mut state = self.state.lock().await;

        let prev = state.activity.insert(table.to_string(), at);
        let job = state.job_state(table);

        if !self.policy.is_quiet(prev, at) {
            let since_last = prev.map(|prev| at - prev).unwrap_or_else(TimeDelta::zero);
            return Decision::Debounced { since_last };
        }
        if job != JobState::Idle {
            return Decision::Busy(job);
        }
        Decision::Eligible
    }

    /// Move `table` from `Idle` to `Dispatching`, or report the state that prevents it
    pub async fn begin_dispatch(&self, table: &str) -> std::result::Result<(), JobState> {
        let mut state = self.state.lock().await;

        match state.job_state(table) {
            JobState::Idle => {
                state.jobs.insert(table.to_string(), JobState::Dispatching);
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Settle an in-flight dispatch: `Active` when the job started, `Idle` otherwise
    pub async fn finish_dispatch(&self, table: &str, started: bool) {
        let mut state = self.state.lock().await;

        if state.job_state(table) != JobState::Dispatching {
            debug!(table = table, "finish_dispatch without an in-flight dispatch");
        }

        if started {
            state.jobs.insert(table.to_string(), JobState::Active);
        } else {
            state.jobs.remove(table);
        }
    }

    /// Expire stale activity and release active jobs that no longer have any.
    ///
    /// Tables whose dispatch is still in flight keep their `Dispatching` state.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut state = self.state.lock().await;
        let mut report = SweepReport::default();

        let mut expired: Vec<String> = state
            .activity
            .iter()
            .filter(|(_, last)| self.policy.is_expired(**last, now))
            .map(|(table, _)| table.clone())
            .collect();
        expired.sort();

        for table in &expired {
            state.activity.remove(table);
        }
        report.expired = expired;

        let mut released: Vec<String> = state
            .jobs
            .iter()
            .filter(|(table, job)| **job == JobState::Active && !state.activity.contains_key(*table))
            .map(|(table, _)| table.clone())
            .collect();
        released.sort();

        for table in &released {
            state.jobs.remove(table);
        }
        report.released = released;

        report
    }

    pub async fn last_activity(&self, table: &str) -> Option<DateTime<Utc>> {
        self.state.lock().await.activity.get(table).copied()
    }

    pub async fn job_state(&self, table: &str) -> JobState {
        self.state.lock().await.job_state(table)
    }

    /// Tables that currently have an activity record, sorted
    pub async fn tracked_tables(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut tables: Vec<String> = state.activity.keys().cloned().collect();
        tables.sort();
        tables
    }
}

impl Default for ActivityLedger {
    fn default() -> Self {
        Self::new(DebouncePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    #[test]
    fn test_policy_defaults_and_validation() {
        let policy = DebouncePolicy::default();
        assert_eq!(policy.window(), secs(30));
        assert_eq!(policy.expiry(), secs(60));

        let policy = DebouncePolicy::with_window(Duration::from_secs(5)).unwrap();
        assert_eq!(policy.expiry(), secs(10));

        assert!(DebouncePolicy::new(Duration::ZERO, Duration::from_secs(1)).is_err());
        assert!(DebouncePolicy::new(Duration::from_secs(10), Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_quiet_period_boundaries() {
        let policy = DebouncePolicy::default();
        assert!(policy.is_quiet(None, t0()));
        assert!(!policy.is_quiet(Some(t0()), t0() + secs(29)));
        assert!(policy.is_quiet(Some(t0()), t0() + secs(30)));
        // clock stepped backwards
        assert!(!policy.is_quiet(Some(t0()), t0() - secs(5)));

        assert!(!policy.is_expired(t0(), t0() + secs(60)));
        assert!(policy.is_expired(t0(), t0() + secs(61)));
    }

    #[tokio::test]
    async fn test_first_event_is_eligible_and_burst_is_debounced() {
        let ledger = ActivityLedger::default();

        assert_eq!(ledger.observe("students", t0()).await, Decision::Eligible);
        assert_eq!(
            ledger.observe("students", t0() + secs(4)).await,
            Decision::Debounced { since_last: secs(4) }
        );
        assert_eq!(
            ledger.observe("students", t0() + secs(10)).await,
            Decision::Debounced { since_last: secs(6) }
        );
    }

    #[tokio::test]
    async fn test_activity_tracks_latest_event_even_when_debounced() {
        let ledger = ActivityLedger::default();

        ledger.observe("payment", t0()).await;
        ledger.observe("payment", t0() + secs(3)).await;
        ledger.observe("payment", t0() + secs(7)).await;

        assert_eq!(ledger.last_activity("payment").await, Some(t0() + secs(7)));
        assert_eq!(ledger.tracked_tables().await, vec!["payment".to_string()]);
    }

    #[tokio::test]
    async fn test_window_is_measured_from_previous_event() {
        let ledger = ActivityLedger::default();

        assert_eq!(ledger.observe("course", t0()).await, Decision::Eligible);
        // each event resets the quiet period
        assert!(matches!(
            ledger.observe("course", t0() + secs(20)).await,
            Decision::Debounced { .. }
        ));
        assert!(matches!(
            ledger.observe("course", t0() + secs(40)).await,
            Decision::Debounced { .. }
        ));
        assert_eq!(ledger.observe("course", t0() + secs(75)).await, Decision::Eligible);
    }

    #[tokio::test]
    async fn test_active_or_dispatching_jobs_block_eligibility() {
        let ledger = ActivityLedger::default();

        ledger.observe("students", t0()).await;
        ledger.begin_dispatch("students").await.unwrap();
        assert_eq!(
            ledger.observe("students", t0() + secs(45)).await,
            Decision::Busy(JobState::Dispatching)
        );

        ledger.finish_dispatch("students", true).await;
        assert_eq!(
            ledger.observe("students", t0() + secs(90)).await,
            Decision::Busy(JobState::Active)
        );
    }

    #[tokio::test]
    async fn test_begin_dispatch_is_exclusive() {
        let ledger = ActivityLedger::default();

        assert_eq!(ledger.begin_dispatch("payment").await, Ok(()));
        assert_eq!(ledger.begin_dispatch("payment").await, Err(JobState::Dispatching));

        ledger.finish_dispatch("payment", false).await;
        assert_eq!(ledger.job_state("payment").await, JobState::Idle);
        assert_eq!(ledger.begin_dispatch("payment").await, Ok(()));
    }

    #[tokio::test]
    async fn test_sweep_expires_only_stale_tables() {
        let ledger = ActivityLedger::default();

        ledger.observe("students", t0()).await;
        ledger.begin_dispatch("students").await.unwrap();
        ledger.finish_dispatch("students", true).await;
        ledger.observe("payment", t0() + secs(50)).await;

        let report = ledger.sweep(t0() + secs(70)).await;
        assert_eq!(report.expired, vec!["students".to_string()]);
        assert_eq!(report.released, vec!["students".to_string()]);

        assert_eq!(ledger.last_activity("students").await, None);
        assert_eq!(ledger.job_state("students").await, JobState::Idle);
        assert_eq!(ledger.last_activity("payment").await, Some(t0() + secs(50)));

        // a released table is eligible again on its next event
        assert_eq!(ledger.observe("students", t0() + secs(71)).await, Decision::Eligible);
    }

    #[tokio::test]
    async fn test_sweep_keeps_in_flight_dispatch() {
        let ledger = ActivityLedger::default();

        ledger.observe("faculty", t0()).await;
        ledger.begin_dispatch("faculty").await.unwrap();

        let report = ledger.sweep(t0() + secs(120)).await;
        assert_eq!(report.expired, vec!["faculty".to_string()]);
        assert!(report.released.is_empty());
        assert_eq!(ledger.job_state("faculty").await, JobState::Dispatching);

        // the dispatch settles after its activity is gone; the next sweep releases it
        ledger.finish_dispatch("faculty", true).await;
        let report = ledger.sweep(t0() + secs(150)).await;
        assert!(report.expired.is_empty());
        assert_eq!(report.released, vec!["faculty".to_string()]);
        assert_eq!(ledger.job_state("faculty").await, JobState::Idle);
    }

    #[tokio::test]
    async fn test_sweep_on_empty_ledger() {
        let ledger = ActivityLedger::default();
        assert!(ledger.sweep(t0()).await.is_empty());
    }
}
