use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reposcan_model::{ScanJobPayload, ScanResultMessage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::{MessagePublisher, publish_json};
use crate::error::{Result, ScanError};
use crate::inspect::RepositoryInspector;
use crate::queue::{JobHandler, JobLease};

/// Executes `scan_source_code` jobs and reports progress on the result
/// topic.
///
/// A job that was cancelled by shutdown does not publish `Failure`; it is
/// retried by the queue and the scan stays open until it finishes or the
/// reaper closes it.
pub struct ScanJobHandler {
    inspector: Arc<dyn RepositoryInspector>,
    results: Arc<dyn MessagePublisher>,
}

impl std::fmt::Debug for ScanJobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanJobHandler").finish_non_exhaustive()
    }
}

impl ScanJobHandler {
    pub fn new(
        inspector: Arc<dyn RepositoryInspector>,
        results: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self { inspector, results }
    }

    pub async fn execute(
        &self,
        job: &ScanJobPayload,
        cancel: &CancellationToken,
    ) -> Result<()> {
        publish_json(
            self.results.as_ref(),
            &ScanResultMessage::in_progress(job.scan_id, Utc::now()),
        )
        .await?;

        let findings = match self
            .inspector
            .scan(&job.owner_name, &job.repo_name, cancel)
            .await
        {
            Ok(findings) => findings,
            Err(e @ ScanError::Cancelled(_)) => {
                info!(scan_id = %job.scan_id, "scan interrupted by shutdown");
                return Err(e);
            }
            Err(e) => {
                let failure = ScanResultMessage::failure(job.scan_id, Utc::now());
                if let Err(publish_err) = publish_json(self.results.as_ref(), &failure).await {
                    warn!(
                        scan_id = %job.scan_id,
                        error = %publish_err,
                        "failed to publish scan failure"
                    );
                }
                return Err(e);
            }
        };

        let success = ScanResultMessage::success(job.scan_id, Utc::now(), &findings)?;
        publish_json(self.results.as_ref(), &success).await?;
        info!(
            scan_id = %job.scan_id,
            findings = findings.len(),
            "scan completed"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ScanJobHandler {
    async fn handle(&self, lease: &JobLease, cancel: CancellationToken) -> Result<()> {
        let job: ScanJobPayload = lease.decode()?;
        self.execute(&job, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InMemoryChannel;
    use crate::queue::{
        EnqueueRequest, InMemoryJobQueue, JobQueue, JobState, RetryConfig, WorkerPool,
        WorkerPoolConfig,
    };
    use reposcan_model::{
        Finding, FindingMetadata, SCAN_SOURCE_CODE_JOB, ScanId, ScanStatus,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Outcome {
        Findings(Vec<Finding>),
        Fail(fn() -> ScanError),
    }

    struct StubInspector {
        outcome: Outcome,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubInspector {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RepositoryInspector for StubInspector {
        async fn scan(
            &self,
            owner: &str,
            repo: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Finding>> {
            self.calls
                .lock()
                .unwrap()
                .push((owner.to_string(), repo.to_string()));
            match &self.outcome {
                Outcome::Findings(found) => Ok(found.clone()),
                Outcome::Fail(make) => Err(make()),
            }
        }
    }

    fn job() -> ScanJobPayload {
        ScanJobPayload {
            scan_id: ScanId(3),
            owner_name: "acme".into(),
            repo_name: "widgets".into(),
        }
    }

    fn statuses(messages: &[ScanResultMessage]) -> Vec<Option<ScanStatus>> {
        messages.iter().map(|m| m.status()).collect()
    }

    #[tokio::test]
    async fn success_publishes_in_progress_then_success() {
        let finding = Finding::at_line(
            "sast",
            "G101",
            "config/keys.txt",
            2,
            FindingMetadata {
                description: "Potential hardcoded credentials".into(),
                severity: "HIGH".into(),
            },
        );
        let inspector = StubInspector::new(Outcome::Findings(vec![finding]));
        let results = Arc::new(InMemoryChannel::new());
        let handler = ScanJobHandler::new(inspector.clone(), results.clone());

        handler.execute(&job(), &CancellationToken::new()).await.unwrap();

        let published: Vec<ScanResultMessage> = results.published_json().await.unwrap();
        assert_eq!(
            statuses(&published),
            vec![Some(ScanStatus::InProgress), Some(ScanStatus::Success)]
        );
        assert!(published[0].scanning_at.is_some());
        let findings = published[1].findings.as_ref().unwrap();
        assert_eq!(findings[0]["rule_id"], "G101");
        assert_eq!(findings[0]["location"]["path"], "config/keys.txt");
        assert_eq!(
            *inspector.calls.lock().unwrap(),
            vec![("acme".to_string(), "widgets".to_string())]
        );
    }

    #[tokio::test]
    async fn clean_repository_omits_findings() {
        let inspector = StubInspector::new(Outcome::Findings(Vec::new()));
        let results = Arc::new(InMemoryChannel::new());
        let handler = ScanJobHandler::new(inspector, results.clone());

        handler.execute(&job(), &CancellationToken::new()).await.unwrap();

        let published: Vec<ScanResultMessage> = results.published_json().await.unwrap();
        assert_eq!(published[1].status(), Some(ScanStatus::Success));
        assert!(published[1].findings.is_none());
    }

    #[tokio::test]
    async fn engine_error_publishes_failure_and_propagates() {
        let inspector = StubInspector::new(Outcome::Fail(|| {
            ScanError::Fetch("GET tarball returned 404 Not Found".into())
        }));
        let results = Arc::new(InMemoryChannel::new());
        let handler = ScanJobHandler::new(inspector, results.clone());

        let err = handler
            .execute(&job(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Fetch(_)));

        let published: Vec<ScanResultMessage> = results.published_json().await.unwrap();
        assert_eq!(
            statuses(&published),
            vec![Some(ScanStatus::InProgress), Some(ScanStatus::Failure)]
        );
        assert!(published[1].finished_at.is_some());
        assert!(published[1].findings.is_none());
    }

    #[tokio::test]
    async fn cancellation_skips_failure_report() {
        let inspector =
            StubInspector::new(Outcome::Fail(|| ScanError::Cancelled("archive download".into())));
        let results = Arc::new(InMemoryChannel::new());
        let handler = ScanJobHandler::new(inspector, results.clone());

        let err = handler
            .execute(&job(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled(_)));

        let published: Vec<ScanResultMessage> = results.published_json().await.unwrap();
        assert_eq!(statuses(&published), vec![Some(ScanStatus::InProgress)]);
    }

    #[tokio::test]
    async fn unpublishable_progress_aborts_before_scanning() {
        let inspector = StubInspector::new(Outcome::Findings(Vec::new()));
        let results = Arc::new(InMemoryChannel::new());
        results.fail_publishes(true).await;
        let handler = ScanJobHandler::new(inspector.clone(), results);

        let err = handler
            .execute(&job(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Channel(_)));
        assert!(inspector.calls.lock().unwrap().is_empty());
    }

    struct CountingHandler {
        inner: ScanJobHandler,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, lease: &JobLease, cancel: CancellationToken) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.handle(lease, cancel).await
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_dead_lettered_on_first_attempt() {
        let queue = Arc::new(InMemoryJobQueue::new(RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 0,
            ..RetryConfig::default()
        }));
        queue
            .enqueue(EnqueueRequest {
                queue: "scans".into(),
                job_type: SCAN_SOURCE_CODE_JOB.into(),
                payload: json!({ "scan_id": "x" }),
            })
            .await
            .unwrap();

        let inspector = StubInspector::new(Outcome::Findings(Vec::new()));
        let results = Arc::new(InMemoryChannel::new());
        let handler = Arc::new(CountingHandler {
            inner: ScanJobHandler::new(inspector.clone(), results.clone()),
            calls: AtomicUsize::new(0),
        });

        let mut pool = WorkerPool::new(
            WorkerPoolConfig {
                queue: "scans".into(),
                concurrency: 2,
                poll_interval: Duration::from_millis(5),
                housekeeping_interval: Duration::from_millis(50),
                ..WorkerPoolConfig::default()
            },
            queue.clone(),
        );
        pool.register(SCAN_SOURCE_CODE_JOB, handler.clone());
        pool.start().await;

        let mut state = JobState::Ready;
        for _ in 0..200 {
            state = queue.jobs().await[0].state;
            if matches!(state, JobState::Completed | JobState::DeadLetter) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pool.shutdown().await;

        assert_eq!(state, JobState::DeadLetter);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.jobs().await[0].attempts, 0);
        assert!(inspector.calls.lock().unwrap().is_empty());
        assert!(results.published().await.is_empty());
    }
}
