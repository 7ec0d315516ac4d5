use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    DequeueRequest, EnqueueRequest, JobHandle, JobId, JobLease, JobQueue,
    JobRecord, JobState, LeaseId, RetryConfig,
};
use crate::error::{Result, ScanError};

#[derive(Debug)]
struct Slot {
    job: JobRecord,
    lease: Option<(LeaseId, DateTime<Utc>)>,
}

/// Queue held in process memory. Same state machine as
/// [`PostgresJobQueue`](super::PostgresJobQueue), without durability.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    slots: Mutex<Vec<Slot>>,
    retry_config: RetryConfig,
}

impl InMemoryJobQueue {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            retry_config,
        }
    }

    /// Snapshot of every job in enqueue order.
    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|slot| slot.job.clone())
            .collect()
    }

    fn release(slot: &mut Slot, state: JobState, error: Option<&str>) {
        slot.job.state = state;
        slot.lease = None;
        if let Some(error) = error {
            slot.job.last_error = Some(error.to_string());
        }
    }

    fn fail_attempt(&self, slot: &mut Slot, error: &str, now: DateTime<Utc>) -> bool {
        let attempts_before = slot.job.attempts;
        slot.job.attempts = attempts_before.saturating_add(1);
        if slot.job.attempts < self.retry_config.max_attempts {
            let delay_ms = self.retry_config.delay_ms(slot.job.id, slot.job.attempts);
            slot.job.available_at =
                now + chrono::Duration::milliseconds(delay_ms as i64);
            Self::release(slot, JobState::Ready, Some(error));
            true
        } else {
            Self::release(slot, JobState::DeadLetter, Some(error));
            false
        }
    }
}

fn leased_by(slot: &Slot, lease_id: LeaseId) -> bool {
    slot.job.state == JobState::Leased
        && slot.lease.is_some_and(|(id, _)| id == lease_id)
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle> {
        let now = Utc::now();
        let id = JobId::new();
        self.slots.lock().await.push(Slot {
            job: JobRecord {
                id,
                queue: request.queue.clone(),
                job_type: request.job_type,
                payload: request.payload,
                state: JobState::Ready,
                attempts: 0,
                available_at: now,
                last_error: None,
                created_at: now,
            },
            lease: None,
        });
        Ok(JobHandle {
            id,
            queue: request.queue,
        })
    }

    async fn dequeue(&self, request: &DequeueRequest) -> Result<Option<JobLease>> {
        let now = Utc::now();
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots
            .iter_mut()
            .filter(|slot| {
                slot.job.state == JobState::Ready
                    && slot.job.queue == request.queue
                    && request.job_types.contains(&slot.job.job_type)
                    && slot.job.available_at <= now
            })
            .min_by_key(|slot| (slot.job.available_at, slot.job.attempts))
        else {
            return Ok(None);
        };

        let lease_id = LeaseId::new();
        let expires_at = now + request.lease_ttl;
        slot.job.state = JobState::Leased;
        slot.lease = Some((lease_id, expires_at));

        Ok(Some(JobLease {
            lease_id,
            job: slot.job.clone(),
            lease_owner: request.worker_id.clone(),
            expires_at,
        }))
    }

    async fn renew(
        &self,
        lease_id: LeaseId,
        extend_by: chrono::Duration,
    ) -> Result<DateTime<Utc>> {
        let mut slots = self.slots.lock().await;
        let slot = slots
            .iter_mut()
            .find(|slot| leased_by(slot, lease_id))
            .ok_or_else(|| ScanError::NotFound(format!("lease {lease_id}")))?;
        let expires_at = Utc::now() + extend_by;
        slot.lease = Some((lease_id, expires_at));
        Ok(expires_at)
    }

    async fn complete(&self, lease_id: LeaseId) -> Result<()> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|slot| leased_by(slot, lease_id)) {
            Self::release(slot, JobState::Completed, None);
        }
        Ok(())
    }

    async fn retry(&self, lease_id: LeaseId, error: &str) -> Result<()> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|slot| leased_by(slot, lease_id)) {
            self.fail_attempt(slot, error, Utc::now());
        }
        Ok(())
    }

    async fn dead_letter(&self, lease_id: LeaseId, error: &str) -> Result<()> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|slot| leased_by(slot, lease_id)) {
            Self::release(slot, JobState::DeadLetter, Some(error));
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut slots = self.slots.lock().await;
        let mut resurrected = 0;
        for slot in slots.iter_mut() {
            let expired = slot.job.state == JobState::Leased
                && slot.lease.is_some_and(|(_, expires_at)| expires_at < now);
            if expired && self.fail_attempt(slot, "lease expired", now) {
                resurrected += 1;
            }
        }
        Ok(resurrected)
    }
}
