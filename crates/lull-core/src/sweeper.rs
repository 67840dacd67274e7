//! Timer-driven expiry of stale activity and active-job flags

use crate::{ActivityLedger, SweepReport};
use chrono::{DateTime, Utc};
use lull_shared::EventMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Background cleanup of the shared [`ActivityLedger`].
///
/// This is the only path that returns a table from `Active` to `Idle`.
pub struct Sweeper {
    ledger: Arc<ActivityLedger>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(ledger: Arc<ActivityLedger>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single sweep as of `now`
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let report = self.ledger.sweep(now).await;

        for table in &report.expired {
            debug!(table = %table, "Cleaned up activity for table");
        }
        for table in &report.released {
            debug!(table = %table, "Released active job flag");
        }
        if !report.expired.is_empty() {
            EventMetrics::sweep_expired(report.expired.len());
        }

        report
    }

    /// Sweep every interval until `shutdown` flips to `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Starting activity sweeper");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
            }
        }

        info!("Activity sweeper stopped");
    }
}
