use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reposcan_model::{
    NewScan, Page, RepositoryId, Scan, ScanFilter, ScanId, ScanRequestMessage,
    ScanResultMessage, ScanStatus, ScanUpdate,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reaper::StaleScanReaper;
use crate::channel::{
    MessageConsumer, MessageHandler, MessagePublisher, publish_json, run_consume_loop,
};
use crate::error::{Result, ScanError};
use crate::store::{RepositoryStore, ScanStore};

/// Trigger-side scan orchestration: creates scans, publishes requests, and
/// folds worker results back into the store.
#[derive(Clone)]
pub struct ScanService {
    repositories: Arc<dyn RepositoryStore>,
    scans: Arc<dyn ScanStore>,
    requests: Arc<dyn MessagePublisher>,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService").finish_non_exhaustive()
    }
}

impl ScanService {
    pub fn new(
        repositories: Arc<dyn RepositoryStore>,
        scans: Arc<dyn ScanStore>,
        requests: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            repositories,
            scans,
            requests,
        }
    }

    /// Record a new scan and hand it to the execution role.
    ///
    /// If the request cannot be published the scan stays `Pending` and the
    /// error is returned; calling again creates a fresh scan. Once published,
    /// the trigger succeeds even if a worker result has already moved the
    /// scan past `Queued`.
    pub async fn trigger_scan(&self, repository_id: RepositoryId) -> Result<Scan> {
        let repository = self.repositories.get_by_id(repository_id).await?;
        let mut scan = self.scans.create(&NewScan::for_repository(&repository)).await?;

        let request = ScanRequestMessage {
            scan_id: scan.id,
            owner: repository.owner.clone(),
            repository: repository.name.clone(),
        };
        if let Err(e) = publish_json(self.requests.as_ref(), &request).await {
            warn!(
                scan_id = %scan.id,
                repository_id = %repository_id,
                error = %e,
                "failed to publish scan request; scan left pending"
            );
            return Err(e);
        }

        let queued = ScanUpdate::queued(Utc::now());
        match self.update_scan(&mut scan, &queued).await {
            Ok(()) => {}
            Err(ScanError::InvalidTransition { from, .. }) => {
                // A worker result was applied first; keep its status.
                debug!(
                    scan_id = %scan.id,
                    status = %from,
                    "scan already past queued; recording queued_at only"
                );
                let timestamp = ScanUpdate::default().with_queued_at(queued.queued_at);
                self.update_scan(&mut scan, &timestamp).await?;
            }
            Err(e) => return Err(e),
        }
        info!(
            scan_id = %scan.id,
            status = %scan.status,
            owner = %repository.owner,
            repo = %repository.name,
            "scan queued"
        );
        Ok(scan)
    }

    /// Sparse update: only the fields set in `update` are written, to the
    /// store and to `scan`.
    pub async fn update_scan(&self, scan: &mut Scan, update: &ScanUpdate) -> Result<()> {
        *scan = self.scans.update(scan.id, update).await?;
        Ok(())
    }

    /// Apply one worker result. Unrecognised statuses are ignored, as are
    /// results that arrive after the scan already reached a later state.
    pub async fn handle_result_message(&self, result: &ScanResultMessage) -> Result<()> {
        let Some(status) = result.status() else {
            debug!(
                scan_id = %result.scan_id,
                scan_status = %result.scan_status,
                "ignoring result with unrecognised status"
            );
            return Ok(());
        };

        let update = match status {
            ScanStatus::InProgress => {
                ScanUpdate::status(status).with_scanning_at(result.scanning_at)
            }
            ScanStatus::Success => ScanUpdate::status(status)
                .with_finished_at(result.finished_at)
                .with_findings(result.findings.clone()),
            ScanStatus::Failure => {
                ScanUpdate::status(status).with_finished_at(result.finished_at)
            }
            ScanStatus::Pending | ScanStatus::Queued => {
                debug!(scan_id = %result.scan_id, %status, "ignoring non-worker status");
                return Ok(());
            }
        };

        match self.scans.update(result.scan_id, &update).await {
            Ok(scan) => {
                info!(scan_id = %scan.id, status = %scan.status, "scan status updated");
                Ok(())
            }
            Err(ScanError::InvalidTransition { scan_id, from, to }) => {
                info!(%scan_id, %from, %to, "ignoring out-of-order scan result");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_scan(&self, id: ScanId) -> Result<Scan> {
        self.scans.get_by_id(id).await
    }

    pub async fn list_scans(&self, filter: &ScanFilter, page: Page) -> Result<Vec<Scan>> {
        self.scans.list(filter, page).await
    }

    /// Run the reaper in the background and consume the result topic until
    /// the channel fails or `shutdown` fires. The reaper stops with it.
    pub async fn start(
        &self,
        results: &dyn MessageConsumer,
        reaper: StaleScanReaper,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let reaper_token = shutdown.child_token();
        tokio::spawn(reaper.run(reaper_token.clone()));

        info!("consuming scan results");
        let outcome = run_consume_loop(results, self, shutdown).await;
        reaper_token.cancel();

        if let Err(e) = &outcome {
            error!(error = %e, "result consumer stopped");
        }
        outcome
    }
}

#[async_trait]
impl MessageHandler for ScanService {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let result: ScanResultMessage = serde_json::from_slice(payload)?;
        self.handle_result_message(&result).await
    }
}
