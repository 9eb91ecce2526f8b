//! Worker pool - concurrent drain-and-process loops.
//!
//! Each loop cycles through these states until cancelled:
//!
//! ```text
//!        ┌──────────────────────────────────────────────┐
//!        v                                              │
//!     ┌──────┐   ┌──────────┐  empty   ┌──────────────┐ │
//!     │ Idle │──>│ Draining │────────> │ EmptyBackoff │─┤
//!     └──────┘   └──────────┘          └──────────────┘ │
//!        │             │ claimed       ┌─────────────┐  │
//!        │             └─────────────> │ Dispatching │──┘
//!        │ cancelled                   └─────────────┘
//!        v
//!    ┌─────────┐
//!    │ Stopped │
//!    └─────────┘
//! ```
//!
//! Cancellation is checked at the top of each iteration. A batch in progress
//! always runs to completion; only the idle and error back-off sleeps are cut
//! short by cancellation.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::WorkerSettings;
use crate::drainer::{BatchDrainer, BatchItem};
use crate::error::QueueError;

/// States of a single processing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Draining,
    EmptyBackoff,
    Dispatching,
    Stopped,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Draining => "draining",
            LoopState::EmptyBackoff => "empty_backoff",
            LoopState::Dispatching => "dispatching",
            LoopState::Stopped => "stopped",
        }
    }
}

/// Counters collected by a pool run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    pub loops: usize,
    pub batches: u64,
    pub jobs: u64,
    pub errors: u64,
}

impl PoolReport {
    fn merge(&mut self, other: PoolReport) {
        self.loops += other.loops;
        self.batches += other.batches;
        self.jobs += other.jobs;
        self.errors += other.errors;
    }
}

/// Runs `concurrency` independent drain loops sharing one drainer.
pub struct WorkerPool {
    drainer: BatchDrainer,
    concurrency: usize,
    empty_queue_delay: Duration,
    error_delay: Duration,
}

impl WorkerPool {
    pub fn new(drainer: BatchDrainer, settings: &WorkerSettings) -> Self {
        Self {
            drainer,
            concurrency: settings.concurrency.max(1),
            empty_queue_delay: settings.empty_queue_delay,
            error_delay: settings.error_delay,
        }
    }

    /// Run every loop until `token` is cancelled.
    ///
    /// Resolves once all loops have observed cancellation and finished their
    /// current iteration.
    pub async fn run(self, token: CancellationToken) -> PoolReport {
        info!(concurrency = self.concurrency, "worker_pool_starting");

        let mut loops = JoinSet::new();
        for id in 0..self.concurrency {
            let worker = DrainLoop {
                id,
                drainer: self.drainer.clone(),
                token: token.clone(),
                empty_queue_delay: self.empty_queue_delay,
                error_delay: self.error_delay,
            };
            loops.spawn(worker.run());
        }

        let mut report = PoolReport::default();
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(stats) => report.merge(stats),
                Err(e) => error!(error = %e, "worker_loop_aborted"),
            }
        }

        info!(
            batches = report.batches,
            jobs = report.jobs,
            errors = report.errors,
            "worker_pool_stopped"
        );
        report
    }
}

struct DrainLoop {
    id: usize,
    drainer: BatchDrainer,
    token: CancellationToken,
    empty_queue_delay: Duration,
    error_delay: Duration,
}

impl DrainLoop {
    async fn run(self) -> PoolReport {
        let mut stats = PoolReport {
            loops: 1,
            ..PoolReport::default()
        };
        info!(worker = self.id, "worker_loop_started");

        while !self.token.is_cancelled() {
            let outcome = AssertUnwindSafe(self.iteration()).catch_unwind().await;

            let backoff = match outcome {
                Ok(Ok(items)) if items.is_empty() => {
                    self.transition(LoopState::EmptyBackoff);
                    Some(self.empty_queue_delay)
                }
                Ok(Ok(items)) => {
                    stats.batches += 1;
                    stats.jobs += items.len() as u64;
                    None
                }
                Ok(Err(e)) => {
                    stats.errors += 1;
                    error!(worker = self.id, error = %e, "worker_processing_error");
                    Some(self.error_delay)
                }
                Err(_) => {
                    stats.errors += 1;
                    error!(worker = self.id, "worker_iteration_panicked");
                    Some(self.error_delay)
                }
            };

            if let Some(delay) = backoff {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = sleep(delay) => {}
                }
            }
            self.transition(LoopState::Idle);
        }

        self.transition(LoopState::Stopped);
        info!(worker = self.id, "worker_loop_stopped");
        stats
    }

    /// Claim one batch and dispatch it. Empty when pending was empty.
    async fn iteration(&self) -> Result<Vec<BatchItem>, QueueError> {
        self.transition(LoopState::Draining);
        let jobs = self.drainer.claim_batch().await?;
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        self.transition(LoopState::Dispatching);
        Ok(self.drainer.dispatch_batch(jobs).await)
    }

    fn transition(&self, state: LoopState) {
        debug!(worker = self.id, state = state.as_str(), "worker_loop_state");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::config::QueueNames;
    use crate::delivery::MockDeliverer;
    use crate::limiter::RateLimiter;
    use crate::processor::JobProcessor;
    use crate::queue::{Job, MemoryQueue, QueueStore};

    fn settings(concurrency: usize) -> WorkerSettings {
        WorkerSettings {
            max_rps: 100,
            batch_size: 5,
            concurrency,
            empty_queue_delay: Duration::from_millis(5000),
            error_delay: Duration::from_millis(1000),
            ..WorkerSettings::default()
        }
    }

    fn pool(store: Arc<dyn QueueStore>, deliverer: &MockDeliverer, settings: &WorkerSettings) -> WorkerPool {
        let processor = JobProcessor::new(
            Arc::clone(&store),
            Arc::new(deliverer.clone()),
            Arc::new(RateLimiter::new(settings.max_rps)),
            QueueNames::default(),
            settings,
        );
        let drainer = BatchDrainer::new(store, processor, QueueNames::default(), settings.batch_size);
        WorkerPool::new(drainer, settings)
    }

    fn cancel_after(token: &CancellationToken, after: Duration) {
        let token = token.clone();
        tokio::spawn(async move {
            sleep(after).await;
            token.cancel();
        });
    }

    /// Panics on the first claim, then behaves like the wrapped store.
    struct PanicOnce {
        inner: MemoryQueue,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl QueueStore for PanicOnce {
        async fn push(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
            self.inner.push(queue, job).await
        }

        async fn atomic_move(&self, source: &str, dest: &str) -> Result<Option<Job>, QueueError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("simulated bug in claim");
            }
            self.inner.atomic_move(source, dest).await
        }

        async fn remove(&self, queue: &str, job: &Job, count: usize) -> Result<usize, QueueError> {
            self.inner.remove(queue, job, count).await
        }

        async fn len(&self, queue: &str) -> Result<usize, QueueError> {
            self.inner.len(queue).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_drains_queue_then_stops() {
        let queues = QueueNames::default();
        let ids: Vec<String> = (0..12).map(|i| format!("user{i}@example.com")).collect();
        let store = MemoryQueue::with_jobs(&queues.pending, ids);
        let deliverer = MockDeliverer::new();
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_secs(10));

        let report = pool(Arc::new(store.clone()), &deliverer, &settings(2))
            .run(token)
            .await;

        assert_eq!(report.loops, 2);
        assert_eq!(report.jobs, 12);
        assert_eq!(deliverer.total_attempts(), 12);
        assert_eq!(store.len(&queues.pending).await.unwrap(), 0);
        assert_eq!(store.len(&queues.in_flight).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_loop_backs_off_before_polling_again() {
        let queues = QueueNames::default();
        let store = MemoryQueue::new();
        let deliverer = MockDeliverer::new();
        let token = CancellationToken::new();
        let start = Instant::now();

        let producer = store.clone();
        let pending = queues.pending.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            producer.push(&pending, &Job::from("late@example.com")).await.unwrap();
        });
        cancel_after(&token, Duration::from_secs(12));

        pool(Arc::new(store.clone()), &deliverer, &settings(1))
            .run(token)
            .await;

        // Picked up on the first poll after the 5s idle back-off.
        let times = deliverer.attempt_times(&Job::from("late@example.com"));
        assert_eq!(times, vec![start + Duration::from_secs(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_backs_off_and_recovers() {
        let queues = QueueNames::default();
        let store = MemoryQueue::with_jobs(&queues.pending, ["a@example.com"]);
        store.set_unavailable(true);
        let deliverer = MockDeliverer::new();
        let token = CancellationToken::new();
        let start = Instant::now();

        let outage = store.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            outage.set_unavailable(false);
        });
        cancel_after(&token, Duration::from_secs(4));

        let report = pool(Arc::new(store.clone()), &deliverer, &settings(1))
            .run(token)
            .await;

        assert_eq!(report.errors, 3);
        assert_eq!(
            deliverer.attempt_times(&Job::from("a@example.com")),
            vec![start + Duration::from_secs(3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_iteration_does_not_kill_loop() {
        let queues = QueueNames::default();
        let store = Arc::new(PanicOnce {
            inner: MemoryQueue::with_jobs(&queues.pending, ["a@example.com"]),
            panicked: AtomicBool::new(false),
        });
        let deliverer = MockDeliverer::new();
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_secs(3));

        let report = pool(store, &deliverer, &settings(1)).run(token).await;

        assert_eq!(report.errors, 1);
        assert_eq!(report.jobs, 1);
        assert_eq!(deliverer.attempts(&Job::from("a@example.com")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pool_returns_promptly_when_idle() {
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_millis(100));
        let start = Instant::now();

        let report = pool(Arc::new(MemoryQueue::new()), &MockDeliverer::new(), &settings(3))
            .run(token)
            .await;

        assert_eq!(report.loops, 3);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_in_progress_finishes_after_cancel() {
        let queues = QueueNames::default();
        let store = MemoryQueue::with_jobs(&queues.pending, ["slow@example.com"]);
        let deliverer = MockDeliverer::new().fail_times("slow@example.com", 1);
        let token = CancellationToken::new();
        // Cancel while the job is in its 1s backoff.
        cancel_after(&token, Duration::from_millis(500));

        let report = pool(Arc::new(store.clone()), &deliverer, &settings(1))
            .run(token)
            .await;

        assert_eq!(report.jobs, 1);
        assert_eq!(deliverer.attempts(&Job::from("slow@example.com")), 2);
        assert_eq!(store.len(&queues.in_flight).await.unwrap(), 0);
    }
}
