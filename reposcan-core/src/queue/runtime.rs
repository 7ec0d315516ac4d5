use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{DequeueRequest, JobLease, JobQueue};
use crate::error::{Result, ScanError};

/// Executes one kind of job.
///
/// `Ok` completes the job. An error for which
/// [`ScanError::is_permanent`] holds dead-letters it; any other error
/// schedules a retry.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, lease: &JobLease, cancel: CancellationToken) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    pub queue: String,
    pub concurrency: usize,
    pub lease_ttl: chrono::Duration,
    pub poll_interval: Duration,
    pub housekeeping_interval: Duration,
    /// Prefix for worker ids recorded as lease owners.
    pub worker_group: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            queue: "default".to_string(),
            concurrency: 10,
            lease_ttl: chrono::Duration::seconds(300),
            poll_interval: Duration::from_millis(250),
            housekeeping_interval: Duration::from_secs(30),
            worker_group: format!("worker-{}", std::process::id()),
        }
    }
}

/// Bounded pool of queue workers plus a lease housekeeper.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_handle_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("job_types", &self.handlers.keys().collect::<Vec<_>>())
            .field("worker_handle_count", &worker_handle_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            config,
            queue,
            handlers: HashMap::new(),
            shutdown_token: CancellationToken::new(),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// Route jobs of `job_type` to `handler`.
    pub fn register(
        &mut self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> &mut Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Spawn `concurrency` workers and the housekeeper.
    pub async fn start(&self) {
        let handlers = Arc::new(self.handlers.clone());
        let job_types: Vec<String> = self.handlers.keys().cloned().collect();
        let mut handles = self.worker_handles.lock().await;

        for i in 0..self.config.concurrency.max(1) {
            let worker = Worker {
                id: format!("{}-w{}", self.config.worker_group, i),
                config: self.config.clone(),
                queue: Arc::clone(&self.queue),
                handlers: Arc::clone(&handlers),
                job_types: job_types.clone(),
                shutdown: self.shutdown_token.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        handles.push(self.spawn_housekeeper());

        info!(
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            job_types = ?job_types,
            "worker pool started"
        );
    }

    fn spawn_housekeeper(&self) -> JoinHandle<()> {
        let q = Arc::clone(&self.queue);
        let interval = self.config.housekeeping_interval;
        let shutdown = self.shutdown_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Housekeeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = q.reclaim_expired().await {
                            warn!("housekeeper reclaim_expired error: {err}");
                        }
                    }
                }
            }
        })
    }

    /// Cancel every worker, including in-flight jobs, and wait for them.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of worker pool");
        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Worker task failed: {:?}", e),
                Err(_) => warn!("Worker task timed out during shutdown"),
            }
        }

        info!("Worker pool shutdown complete");
    }
}

struct Worker {
    id: String,
    config: WorkerPoolConfig,
    queue: Arc<dyn JobQueue>,
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
    job_types: Vec<String>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let request = DequeueRequest {
            queue: self.config.queue.clone(),
            job_types: self.job_types.clone(),
            worker_id: self.id.clone(),
            lease_ttl: self.config.lease_ttl,
        };

        loop {
            if self.shutdown.is_cancelled() {
                debug!(worker = %self.id, "worker shutting down");
                break;
            }

            match self.queue.dequeue(&request).await {
                Ok(Some(lease)) => self.execute(lease).await,
                Ok(None) => {
                    if !self.idle().await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(worker = %self.id, "dequeue failed: {err}");
                    if !self.idle().await {
                        break;
                    }
                }
            }
        }
    }

    /// Sleep one poll interval. Returns `false` if shutdown fired instead.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.poll_interval) => true,
        }
    }

    async fn execute(&self, lease: JobLease) {
        let job_id = lease.job.id;
        let lease_id = lease.lease_id;
        let job_type = lease.job.job_type.clone();

        let Some(handler) = self.handlers.get(&job_type).cloned() else {
            error!(job_id = %job_id, job_type = %job_type, "no handler registered");
            if let Err(err) = self
                .queue
                .dead_letter(lease_id, &format!("no handler for job type {job_type}"))
                .await
            {
                error!("queue dead_letter error: {err}");
            }
            return;
        };

        debug!(worker = %self.id, job_id = %job_id, job_type = %job_type, "job leased");

        let renew_stop = CancellationToken::new();
        let renewer = self.spawn_renewer(&lease, renew_stop.clone());

        let outcome = handler.handle(&lease, self.shutdown.child_token()).await;

        renew_stop.cancel();
        let _ = renewer.await;

        let settled = match outcome {
            Ok(()) => {
                debug!(job_id = %job_id, "job succeeded");
                self.queue.complete(lease_id).await
            }
            Err(err) if err.is_permanent() => {
                warn!(job_id = %job_id, error = %err, "job failed permanently");
                self.queue.dead_letter(lease_id, &err.to_string()).await
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "job failed; retrying");
                self.queue.retry(lease_id, &err.to_string()).await
            }
        };
        if let Err(err) = settled {
            error!(job_id = %job_id, "queue settle error: {err}");
        }
    }

    fn spawn_renewer(&self, lease: &JobLease, stop: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let lease_id = lease.lease_id;
        let ttl = self.config.lease_ttl;
        let every = ttl
            .to_std()
            .map(|ttl| ttl / 2)
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(100));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                match queue.renew(lease_id, ttl).await {
                    Ok(expires_at) => trace!(lease = %lease_id, %expires_at, "lease renewed"),
                    Err(ScanError::NotFound(_)) => {
                        trace!(lease = %lease_id, "lease renew skipped (completed or released)");
                        break;
                    }
                    Err(err) => warn!("lease renew failed: {err}"),
                }
            }
        })
    }
}
