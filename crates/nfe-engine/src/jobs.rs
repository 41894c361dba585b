//! # Follow-up Jobs
//!
//! The engine never waits or retries by itself. After each outcome it can
//! describe the job the host's scheduler should run next, and when.
//!
//! Backoff doubles from a 200 ms base and is capped:
//! 200ms, 400ms, 800ms, ... up to [`RetryPolicy::max_delay`].

use std::time::Duration;

use async_trait::async_trait;
use nfe_core::{AccessKey, StoreError, TenantId};
use parking_lot::Mutex;
use serde::Serialize;

use crate::transmission::TransmissionResult;

/// Base delay between attempts (doubles each attempt).
pub const BASE_DELAY_MS: u64 = 200;

/// Exponential backoff for follow-up jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts after the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether attempt number `attempt` may still run.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// What should happen after an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FollowUp {
    /// Consult the batch receipt.
    ConsultReceipt { receipt: String },
    /// Look up the document's protocol by access key.
    ConsultProtocol { access_key: AccessKey },
    /// Submit again.
    RetrySubmission { access_key: Option<AccessKey> },
    /// Nothing; the outcome is final.
    None,
}

impl FollowUp {
    /// The follow-up an outcome calls for.
    pub fn for_result(result: &TransmissionResult) -> Self {
        match result {
            TransmissionResult::Authorized { .. } | TransmissionResult::Rejected { .. } => Self::None,
            TransmissionResult::Pending {
                receipt: Some(receipt),
                ..
            } => Self::ConsultReceipt {
                receipt: receipt.clone(),
            },
            TransmissionResult::Pending {
                access_key: Some(key),
                ..
            } => Self::ConsultProtocol {
                access_key: key.clone(),
            },
            TransmissionResult::Pending { .. } => Self::None,
            TransmissionResult::TransportFailure { access_key, cause } => {
                if cause.is_retryable() {
                    Self::RetrySubmission {
                        access_key: access_key.clone(),
                    }
                } else {
                    Self::None
                }
            }
        }
    }
}

/// A unit of work for the host's scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub tenant: TenantId,
    pub production: bool,
    pub follow_up: FollowUp,
    /// 0 for the first follow-up.
    pub attempt: u32,
    /// Delay before running.
    #[serde(with = "millis")]
    pub run_after: Duration,
}

/// Plan the next job for `result`, or `None` if the outcome is final or the
/// policy is exhausted.
pub fn plan(
    tenant: TenantId,
    production: bool,
    result: &TransmissionResult,
    attempt: u32,
    policy: &RetryPolicy,
) -> Option<Job> {
    let follow_up = FollowUp::for_result(result);
    if follow_up == FollowUp::None || !policy.allows(attempt) {
        return None;
    }
    Some(Job {
        tenant,
        production,
        follow_up,
        attempt,
        run_after: policy.delay(attempt),
    })
}

/// The host's job queue.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<(), StoreError>;
}

/// Scheduler that only collects jobs.
#[derive(Debug, Default)]
pub struct MemoryJobScheduler {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued job.
    pub fn drain(&self) -> Vec<Job> {
        std::mem::take(&mut *self.jobs.lock())
    }
}

#[async_trait]
impl JobScheduler for MemoryJobScheduler {
    async fn enqueue(&self, job: Job) -> Result<(), StoreError> {
        tracing::debug!(tenant = %job.tenant, attempt = job.attempt, "job enqueued");
        self.jobs.lock().push(job);
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}
