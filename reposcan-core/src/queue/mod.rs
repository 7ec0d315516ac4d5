//! Durable, lease-based job queue.
//!
//! A job is enqueued as `ready`, leased by one worker at a time, and ends
//! either `completed` or `dead_letter`. Retryable failures go back to
//! `ready` after an exponential backoff; leases that expire because a
//! worker died are reclaimed by the pool's housekeeper.

mod memory;
mod postgres;
mod runtime;

pub use memory::InMemoryJobQueue;
pub use postgres::PostgresJobQueue;
pub use runtime::{JobHandler, WorkerPool, WorkerPoolConfig};

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ScanError};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Ready,
    Leased,
    Completed,
    DeadLetter,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Ready => "ready",
            JobState::Leased => "leased",
            JobState::Completed => "completed",
            JobState::DeadLetter => "dead_letter",
        }
    }
}

/// Request to place one job on a named queue.
#[derive(Clone, Debug, PartialEq)]
pub struct EnqueueRequest {
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
}

impl EnqueueRequest {
    /// Encode `payload` as JSON for `job_type` on `queue`.
    pub fn json<T: Serialize>(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            queue: queue.into(),
            job_type: job_type.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Returned by `enqueue` for traceability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub queue: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Failed attempts so far.
    pub attempts: u16,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lease metadata returned when a worker dequeues a job.
#[derive(Clone, Debug)]
pub struct JobLease {
    pub lease_id: LeaseId,
    pub job: JobRecord,
    pub lease_owner: String,
    pub expires_at: DateTime<Utc>,
}

impl JobLease {
    /// Decode the job payload. A payload that does not match `T` is a
    /// permanent failure.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.job.payload.clone()).map_err(ScanError::from)
    }
}

/// Request object to dequeue work from a specific queue.
#[derive(Clone, Debug)]
pub struct DequeueRequest {
    pub queue: String,
    pub job_types: Vec<String>,
    pub worker_id: String,
    pub lease_ttl: chrono::Duration,
}

/// Backoff policy for retryable failures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryConfig {
    /// Executions allowed before a failing job is dead-lettered.
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 25,
            backoff_base_ms: 2_000,
            backoff_max_ms: 300_000,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt number `attempt` (1-based) of `job_id` becomes
    /// available again. Exponential in `attempt`, capped at
    /// `backoff_max_ms`, with jitter that is stable for a given job and
    /// attempt.
    pub fn delay_ms(&self, job_id: JobId, attempt: u16) -> u64 {
        let exp = i32::from(attempt.saturating_sub(1)).min(30);
        let max = self.backoff_max_ms as f64;
        let anchor = ((self.backoff_base_ms as f64) * 2f64.powi(exp)).min(max);
        if anchor <= 0.0 {
            return 0;
        }

        let span = anchor * f64::from(self.jitter_ratio.max(0.0));
        let lower = (anchor - span).max(0.0);
        let upper = (anchor + span).min(max);
        if upper <= lower {
            return lower.round() as u64;
        }

        let unit = deterministic_unit(job_id, attempt);
        (lower + (upper - lower) * unit).round() as u64
    }
}

fn deterministic_unit(job_id: JobId, attempt: u16) -> f64 {
    let mut hasher = DefaultHasher::default();
    job_id.hash(&mut hasher);
    attempt.hash(&mut hasher);
    (hasher.finish() as f64) / (u64::MAX as f64)
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle>;

    /// Lease the oldest available job matching the request, if any.
    async fn dequeue(&self, request: &DequeueRequest) -> Result<Option<JobLease>>;

    /// Push the lease expiry out by `extend_by`. Fails with `NotFound` once
    /// the lease has been released or reclaimed.
    async fn renew(
        &self,
        lease_id: LeaseId,
        extend_by: chrono::Duration,
    ) -> Result<DateTime<Utc>>;

    async fn complete(&self, lease_id: LeaseId) -> Result<()>;

    /// Release the lease after a retryable failure. The job returns to
    /// `ready` with a backoff delay, or is dead-lettered once its retry
    /// budget is spent.
    async fn retry(&self, lease_id: LeaseId, error: &str) -> Result<()>;

    /// Mark the job non-retryable.
    async fn dead_letter(&self, lease_id: LeaseId, error: &str) -> Result<()>;

    /// Return jobs with expired leases to `ready` (or dead-letter them).
    /// Returns how many were made ready again.
    async fn reclaim_expired(&self) -> Result<u64>;
}
