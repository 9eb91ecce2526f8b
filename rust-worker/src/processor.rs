//! Job processing module - per-job retry, backoff and dead-lettering.
//!
//! Each job gets up to `retry_limit` attempts. An attempt waits for a rate
//! limiter permit, then runs the delivery action under a timeout. The
//! decision of what happens after an attempt is a pure function,
//! [`next_step`], so the retry table can be tested without sleeping.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::config::{QueueNames, WorkerSettings};
use crate::delivery::Deliverer;
use crate::error::{DeliveryError, ProcessError};
use crate::limiter::RateLimiter;
use crate::queue::{Job, QueueStore};

/// How a single delivery attempt went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable,
    Permanent,
}

impl AttemptOutcome {
    pub fn of(result: &Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => AttemptOutcome::Success,
            Err(e) if e.is_retryable() => AttemptOutcome::Retryable,
            Err(_) => AttemptOutcome::Permanent,
        }
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Delivered: remove from in-flight.
    Retire,
    /// Sleep, then make the next attempt.
    Backoff(Duration),
    /// Append to dead-letter, then remove from in-flight.
    DeadLetter,
}

/// Terminal state of a processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered { attempts: u32 },
    DeadLettered { attempts: u32, error: DeliveryError },
}

/// Delay before the attempt following `attempt` (1-indexed):
/// `error_delay * 2^(attempt - 1)`.
pub fn backoff_delay(attempt: u32, error_delay: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    error_delay.saturating_mul(factor)
}

/// Decide what follows attempt number `attempt` (1-indexed).
pub fn next_step(
    attempt: u32,
    retry_limit: u32,
    outcome: AttemptOutcome,
    error_delay: Duration,
) -> Step {
    match outcome {
        AttemptOutcome::Success => Step::Retire,
        AttemptOutcome::Permanent => Step::DeadLetter,
        AttemptOutcome::Retryable if attempt >= retry_limit => Step::DeadLetter,
        AttemptOutcome::Retryable => Step::Backoff(backoff_delay(attempt, error_delay)),
    }
}

/// Processes one claimed job to a terminal outcome.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn QueueStore>,
    deliverer: Arc<dyn Deliverer>,
    limiter: Arc<RateLimiter>,
    queues: QueueNames,
    retry_limit: u32,
    error_delay: Duration,
    delivery_timeout: Duration,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        deliverer: Arc<dyn Deliverer>,
        limiter: Arc<RateLimiter>,
        queues: QueueNames,
        settings: &WorkerSettings,
    ) -> Self {
        Self {
            store,
            deliverer,
            limiter,
            queues,
            retry_limit: settings.retry_limit.max(1),
            error_delay: settings.error_delay,
            delivery_timeout: settings.delivery_timeout,
        }
    }

    /// Run attempts for `job` until it is delivered or dead-lettered.
    ///
    /// The job is removed from the in-flight queue only after a successful
    /// delivery or a successful dead-letter append. An `Err` means the store
    /// failed during that retirement and the job is still in-flight.
    pub async fn process(&self, job: &Job) -> Result<JobOutcome, ProcessError> {
        let mut attempt = 1;

        loop {
            self.limiter.acquire().await;

            info!(job = %job, attempt = attempt, "job_attempt_starting");
            let result = self.attempt(job).await;

            match next_step(attempt, self.retry_limit, AttemptOutcome::of(&result), self.error_delay) {
                Step::Retire => {
                    self.store.remove(&self.queues.in_flight, job, 1).await?;
                    info!(job = %job, attempts = attempt, "job_delivered");
                    return Ok(JobOutcome::Delivered { attempts: attempt });
                }
                Step::Backoff(delay) => {
                    if let Err(e) = &result {
                        warn!(
                            job = %job,
                            attempt = attempt,
                            error = %e,
                            backoff_ms = delay.as_millis() as u64,
                            "job_attempt_failed"
                        );
                    }
                    sleep(delay).await;
                    attempt += 1;
                }
                Step::DeadLetter => {
                    let error = result
                        .err()
                        .unwrap_or_else(|| DeliveryError::Transient("unknown".to_string()));
                    self.store.push(&self.queues.dead_letter, job).await?;
                    self.store.remove(&self.queues.in_flight, job, 1).await?;
                    error!(
                        job = %job,
                        attempts = attempt,
                        error = %error,
                        "job_dead_lettered"
                    );
                    return Ok(JobOutcome::DeadLettered {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }

    /// One delivery call. A panicking deliverer counts as a failed attempt.
    async fn attempt(&self, job: &Job) -> Result<(), DeliveryError> {
        let delivery = AssertUnwindSafe(self.deliverer.deliver(job)).catch_unwind();
        match timeout(self.delivery_timeout, delivery).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DeliveryError::Transient("deliverer panicked".to_string())),
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        }
    }
}
