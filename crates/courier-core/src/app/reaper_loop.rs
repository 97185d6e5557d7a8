//! ReaperLoop - 回収スイーパー
//!
//! # フロー（1 サイクル）
//! 1. lease が lease_timeout より古い in_progress / failed を pending に戻す
//! 2. next_retry_at を過ぎた failed を pending に戻す
//!
//! failed → pending の遷移はここだけが行います。
//! attempts / next_retry_at / last_error には触れません。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::CourierConfig;
use crate::domain::{EntryId, SweepReport};
use crate::error::{CourierError, StoreError};
use crate::ports::{Clock, OutboxStore};

pub struct ReaperLoop {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    lease_timeout: Duration,
    interval: Duration,
    batch_size: usize,
    dry_run: bool,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn OutboxStore>, clock: Arc<dyn Clock>, config: &CourierConfig) -> Self {
        Self {
            store,
            clock,
            lease_timeout: config.lease_timeout(),
            interval: config.sweep_interval(),
            batch_size: config.batch_size,
            dry_run: config.dry_run,
        }
    }

    /// Leases taken before this instant are considered abandoned.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.lease_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// One sweep. Transient store errors yield an empty half-report.
    pub async fn sweep_once(&self) -> Result<SweepReport, CourierError> {
        let now = self.clock.now();

        let stuck = absorb_transient(
            "recover_stuck",
            self.store
                .recover_stuck(self.cutoff(now), self.batch_size, self.dry_run)
                .await,
        )?;
        let due = absorb_transient(
            "requeue_due",
            self.store
                .requeue_due(now, self.batch_size, self.dry_run)
                .await,
        )?;

        let report = SweepReport {
            stuck,
            due,
            dry_run: self.dry_run,
        };
        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &SweepReport) {
        if report.is_empty() {
            debug!("Sweep found nothing");
            return;
        }

        if report.dry_run {
            info!(
                stuck = ?report.stuck,
                due = ?report.due,
                "Dry run: entries would be reset to pending"
            );
            return;
        }

        if !report.stuck.is_empty() {
            info!(count = report.stuck.len(), ids = ?report.stuck, "Recovered stuck entries");
        }
        if !report.due.is_empty() {
            info!(count = report.due.len(), ids = ?report.due, "Requeued due retries");
        }
    }

    /// Sweep every `interval` until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            lease_timeout_secs = self.lease_timeout.as_secs(),
            batch_size = self.batch_size,
            dry_run = self.dry_run,
            "Sweeper started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Sweep failed");
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Sweeper stopped");
    }
}

fn absorb_transient(
    step: &str,
    result: Result<Vec<EntryId>, StoreError>,
) -> Result<Vec<EntryId>, CourierError> {
    match result {
        Ok(ids) => Ok(ids),
        Err(e) if e.is_transient() => {
            warn!(step, error = %e, "Sweep step skipped");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Gid, WorkerId};
    use crate::impls::SqliteOutboxStore;
    use crate::ports::FixedClock;
    use crate::queue::{EntryStatus, NewEvent};
    use crate::testing::{FlakyStore, t0};

    async fn setup(dry_run: bool) -> (SqliteOutboxStore, FixedClock, ReaperLoop) {
        let store = SqliteOutboxStore::open_in_memory().unwrap();
        let clock = FixedClock::new(t0());
        let config = CourierConfig {
            dry_run,
            ..CourierConfig::default()
        };
        let reaper = ReaperLoop::new(Arc::new(store.clone()), Arc::new(clock.clone()), &config);
        store
            .publish(NewEvent::new(Gid::new("g1"), "p", 5), t0())
            .await
            .unwrap();
        (store, clock, reaper)
    }

    #[tokio::test]
    async fn abandoned_lease_returns_to_pending() {
        let (store, clock, reaper) = setup(false).await;
        store
            .claim_next(&WorkerId::new("crashed"), t0())
            .await
            .unwrap()
            .unwrap();

        // Not yet past the timeout.
        clock.advance(TimeDelta::seconds(29));
        assert!(reaper.sweep_once().await.unwrap().is_empty());

        clock.advance(TimeDelta::seconds(2));
        let report = reaper.sweep_once().await.unwrap();
        assert_eq!(report.stuck.len(), 1);

        let entry = store.entry(&Gid::new("g1")).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.lease, None);
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test]
    async fn forced_stale_row_is_recovered() {
        let (store, _clock, reaper) = setup(false).await;
        store
            .execute_raw(
                "UPDATE queue_entries
                 SET status = 'in_progress', locked_by = 'w-old', locked_at = '2024-05-01 11:00:00.000',
                     attempts = 3",
            )
            .await
            .unwrap();

        let report = reaper.sweep_once().await.unwrap();
        assert_eq!(report.stuck.len(), 1);

        let entry = store.entry(&Gid::new("g1")).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.lease, None);
        assert_eq!(entry.attempts, 3);
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let (store, clock, reaper) = setup(true).await;
        store
            .claim_next(&WorkerId::new("crashed"), t0())
            .await
            .unwrap()
            .unwrap();
        clock.advance(TimeDelta::minutes(5));

        let report = reaper.sweep_once().await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.stuck.len(), 1);

        let entry = store.entry(&Gid::new("g1")).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::InProgress);
    }

    #[tokio::test]
    async fn transient_sweep_errors_skip_the_cycle() {
        let (store, clock, _) = setup(false).await;
        store
            .claim_next(&WorkerId::new("crashed"), t0())
            .await
            .unwrap()
            .unwrap();
        clock.advance(TimeDelta::minutes(5));

        let flaky = Arc::new(FlakyStore::new(store.clone()));
        flaky.fail_sweeps(true);
        let config = CourierConfig::default();
        let reaper = ReaperLoop::new(flaky.clone(), Arc::new(clock.clone()), &config);

        let report = reaper.sweep_once().await.unwrap();
        assert!(report.is_empty());
        let entry = store.entry(&Gid::new("g1")).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::InProgress);
        assert_eq!(entry.attempts, 0);

        flaky.fail_sweeps(false);
        assert_eq!(reaper.sweep_once().await.unwrap().stuck.len(), 1);
    }

    #[test]
    fn non_transient_sweep_errors_surface() {
        let err = absorb_transient("stuck", Err(StoreError::Query("no such table".to_string())));
        assert!(matches!(err, Err(CourierError::Store(StoreError::Query(_)))));
        let skipped = absorb_transient("due", Err(StoreError::Busy("locked".to_string())));
        assert!(skipped.unwrap().is_empty());
    }

    #[test]
    fn cutoff_saturates_for_huge_timeouts() {
        let store = SqliteOutboxStore::open_in_memory().unwrap();
        let config = CourierConfig {
            lease_timeout_secs: u64::MAX,
            ..CourierConfig::default()
        };
        let reaper = ReaperLoop::new(Arc::new(store), Arc::new(FixedClock::new(t0())), &config);
        assert_eq!(reaper.cutoff(t0()), DateTime::<Utc>::MIN_UTC);
    }
}
