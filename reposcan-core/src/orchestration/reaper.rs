use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::ScanStore;

/// Periodically fails scans that have sat in `Queued` or `In Progress`
/// longer than `max_stale`.
///
/// This is the recovery path for scans whose request or result message was
/// lost: without it they would never reach a terminal state.
pub struct StaleScanReaper {
    scans: Arc<dyn ScanStore>,
    interval: Duration,
    max_stale: chrono::Duration,
}

impl std::fmt::Debug for StaleScanReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleScanReaper")
            .field("interval", &self.interval)
            .field("max_stale", &self.max_stale)
            .finish_non_exhaustive()
    }
}

impl StaleScanReaper {
    pub fn new(
        scans: Arc<dyn ScanStore>,
        interval: Duration,
        max_stale: chrono::Duration,
    ) -> Self {
        Self {
            scans,
            interval,
            max_stale,
        }
    }

    /// One pass. Returns how many scans were failed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - self.max_stale;
        let failed = self.scans.mark_stale_as_failure(cutoff, now).await?;
        if failed > 0 {
            info!(failed, %cutoff, "marked stale scans as failed");
        } else {
            debug!(%cutoff, "no stale scans");
        }
        Ok(failed)
    }

    /// Sweep every `interval` until `shutdown` fires. Sweep errors are
    /// logged and the next tick proceeds as usual.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_stale_minutes = self.max_stale.num_minutes(),
            "stale scan reaper started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!(error = %e, "stale scan sweep failed");
                    }
                }
            }
        }
        debug!("stale scan reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use reposcan_model::{RepositoryId, Scan, ScanId, ScanStatus};

    fn scan(status: ScanStatus, queued_minutes_ago: Option<i64>) -> Scan {
        let now = Utc::now();
        Scan {
            id: ScanId(0),
            repository_id: RepositoryId(1),
            repository_name: "widgets".into(),
            repository_url: "https://github.com/acme/widgets".into(),
            findings: None,
            status,
            queued_at: queued_minutes_ago.map(|m| now - chrono::Duration::minutes(m)),
            scanning_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn sweep_fails_only_stale_active_scans() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_scan(scan(ScanStatus::Queued, Some(45))).await;
        store.insert_scan(scan(ScanStatus::Queued, Some(5))).await;
        store.insert_scan(scan(ScanStatus::Success, Some(90))).await;
        store.insert_scan(scan(ScanStatus::Pending, None)).await;

        let reaper = StaleScanReaper::new(
            store.clone(),
            Duration::from_secs(60),
            chrono::Duration::minutes(30),
        );
        let now = Utc::now();

        assert_eq!(reaper.sweep(now).await.unwrap(), 1);
        assert_eq!(reaper.sweep(now).await.unwrap(), 0);

        let statuses: Vec<ScanStatus> =
            store.scans().await.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                ScanStatus::Failure,
                ScanStatus::Queued,
                ScanStatus::Success,
                ScanStatus::Pending,
            ]
        );
        let reaped = &store.scans().await[0];
        assert_eq!(reaped.finished_at, Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_on_each_tick() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_scan(scan(ScanStatus::Queued, Some(45))).await;

        let reaper = StaleScanReaper::new(
            store.clone(),
            Duration::from_secs(60),
            chrono::Duration::minutes(30),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(reaper.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(store.scans().await[0].status, ScanStatus::Failure);
    }
}
