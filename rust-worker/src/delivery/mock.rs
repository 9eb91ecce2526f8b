//! Scripted deliverer for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::Deliverer;
use crate::error::DeliveryError;
use crate::queue::Job;

/// Deliverer whose outcome per job is scripted up front.
///
/// Jobs without a script succeed. Every call is recorded with the time it
/// started, so tests can assert on attempt counts and backoff spacing.
#[derive(Clone, Default)]
pub struct MockDeliverer {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Clone, Copy)]
enum Script {
    FailTimes(usize),
    AlwaysFail,
    Reject,
    Panic,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<Job, Script>,
    calls: Vec<(Job, Instant)>,
    latency: Duration,
}

impl MockDeliverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `job` transiently on its first `times` attempts, then succeed.
    pub fn fail_times(self, job: impl Into<Job>, times: usize) -> Self {
        self.lock().scripts.insert(job.into(), Script::FailTimes(times));
        self
    }

    /// Fail `job` transiently on every attempt.
    pub fn always_fail(self, job: impl Into<Job>) -> Self {
        self.lock().scripts.insert(job.into(), Script::AlwaysFail);
        self
    }

    /// Fail `job` with a non-retryable error.
    pub fn reject(self, job: impl Into<Job>) -> Self {
        self.lock().scripts.insert(job.into(), Script::Reject);
        self
    }

    /// Panic on every attempt for `job`.
    pub fn panic_on(self, job: impl Into<Job>) -> Self {
        self.lock().scripts.insert(job.into(), Script::Panic);
        self
    }

    /// Make every delivery take `latency` before returning.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Number of attempts made for `job`.
    pub fn attempts(&self, job: &Job) -> usize {
        self.lock().calls.iter().filter(|(j, _)| j == job).count()
    }

    /// Start times of every attempt made for `job`.
    pub fn attempt_times(&self, job: &Job) -> Vec<Instant> {
        self.lock()
            .calls
            .iter()
            .filter(|(j, _)| j == job)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Total attempts across all jobs.
    pub fn total_attempts(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Deliverer for MockDeliverer {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        let (script, outcome, latency) = {
            let mut state = self.lock();
            state.calls.push((job.clone(), Instant::now()));
            let attempt = state.calls.iter().filter(|(j, _)| j == job).count();
            let script = state.scripts.get(job).copied();
            let outcome = match script {
                Some(Script::FailTimes(times)) if attempt <= times => Err(
                    DeliveryError::Transient(format!("mock failure {attempt}")),
                ),
                Some(Script::AlwaysFail) => Err(DeliveryError::Transient(format!(
                    "mock failure {attempt}"
                ))),
                Some(Script::Reject) => {
                    Err(DeliveryError::Permanent("mock rejection".to_string()))
                }
                _ => Ok(()),
            };
            (script, outcome, state.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if matches!(script, Some(Script::Panic)) {
            panic!("mock panic delivering {job}");
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
