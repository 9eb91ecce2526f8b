//! Batch draining - claim a bounded batch of jobs and process them concurrently.
//!
//! Claiming uses the store's atomic move from the pending queue to the
//! in-flight queue, one job at a time, stopping early once pending is empty.
//! The claimed jobs are then processed concurrently; every job runs to its
//! own terminal outcome regardless of how its siblings fare.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{error, info};

use crate::config::QueueNames;
use crate::error::{ProcessError, QueueError};
use crate::processor::{JobOutcome, JobProcessor};
use crate::queue::{Job, QueueStore};

/// Result of one job within a drained batch.
#[derive(Debug)]
pub struct BatchItem {
    pub job: Job,
    pub result: Result<JobOutcome, ProcessError>,
}

/// Summary counts for a drained batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub delivered: usize,
    pub dead_lettered: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(items: &[BatchItem]) -> Self {
        items.iter().fold(Self::default(), |mut summary, item| {
            match &item.result {
                Ok(JobOutcome::Delivered { .. }) => summary.delivered += 1,
                Ok(JobOutcome::DeadLettered { .. }) => summary.dead_lettered += 1,
                Err(_) => summary.failed += 1,
            }
            summary
        })
    }
}

/// Claims batches from the pending queue and fans them out to the processor.
#[derive(Clone)]
pub struct BatchDrainer {
    store: Arc<dyn QueueStore>,
    processor: JobProcessor,
    queues: QueueNames,
    batch_size: usize,
}

impl BatchDrainer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        processor: JobProcessor,
        queues: QueueNames,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            processor,
            queues,
            batch_size: batch_size.max(1),
        }
    }

    /// Atomically move up to `batch_size` jobs from pending to in-flight.
    ///
    /// If the store fails part-way, jobs already claimed are still returned
    /// so they get processed; the error only surfaces when nothing was claimed.
    pub async fn claim_batch(&self) -> Result<Vec<Job>, QueueError> {
        let mut jobs = Vec::with_capacity(self.batch_size);

        for _ in 0..self.batch_size {
            match self
                .store
                .atomic_move(&self.queues.pending, &self.queues.in_flight)
                .await
            {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => break,
                Err(e) if jobs.is_empty() => return Err(e),
                Err(e) => {
                    error!(claimed = jobs.len(), error = %e, "batch_claim_interrupted");
                    break;
                }
            }
        }

        Ok(jobs)
    }

    /// Claim one batch and process every claimed job to completion.
    ///
    /// Returns an empty vector when the pending queue was empty.
    pub async fn drain_batch(&self) -> Result<Vec<BatchItem>, QueueError> {
        let jobs = self.claim_batch().await?;
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.dispatch_batch(jobs).await)
    }

    /// Process already-claimed jobs concurrently, each to its own outcome.
    pub async fn dispatch_batch(&self, jobs: Vec<Job>) -> Vec<BatchItem> {
        info!(batch_size = jobs.len(), "batch_claimed");

        // Named fn (not a closure) so the spawned future stays `Send` for all lifetimes.
        fn absorb_panic(
            caught: std::thread::Result<Result<JobOutcome, ProcessError>>,
        ) -> Result<JobOutcome, ProcessError> {
            caught.unwrap_or(Err(ProcessError::Panicked))
        }

        // Each job unwinds on its own so a panic cannot drop its siblings.
        let results = join_all(jobs.iter().map(|job| {
            AssertUnwindSafe(self.processor.process(job))
                .catch_unwind()
                .map(absorb_panic)
        }))
        .await;

        let items: Vec<BatchItem> = jobs
            .into_iter()
            .zip(results)
            .map(|(job, result)| {
                if let Err(e) = &result {
                    // Degraded mode: the job stays in-flight for operators to reconcile.
                    error!(job = %job, error = %e, "job_retire_skipped");
                }
                BatchItem { job, result }
            })
            .collect();

        let summary = BatchSummary::of(&items);
        info!(
            delivered = summary.delivered,
            dead_lettered = summary.dead_lettered,
            failed = summary.failed,
            "batch_complete"
        );

        items
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::config::WorkerSettings;
    use crate::delivery::MockDeliverer;
    use crate::limiter::RateLimiter;
    use crate::queue::MemoryQueue;

    fn drainer(store: &MemoryQueue, deliverer: &MockDeliverer, batch_size: usize) -> BatchDrainer {
        let settings = WorkerSettings {
            max_rps: 100,
            batch_size,
            error_delay: Duration::from_millis(1000),
            ..WorkerSettings::default()
        };
        let store: Arc<dyn QueueStore> = Arc::new(store.clone());
        let processor = JobProcessor::new(
            Arc::clone(&store),
            Arc::new(deliverer.clone()),
            Arc::new(RateLimiter::new(settings.max_rps)),
            QueueNames::default(),
            &settings,
        );
        BatchDrainer::new(store, processor, QueueNames::default(), batch_size)
    }

    fn jobs(ids: &[&str]) -> Vec<Job> {
        ids.iter().map(|id| Job::from(*id)).collect()
    }

    #[tokio::test]
    async fn test_claim_batch_in_fifo_order_and_stops_early() {
        let queues = QueueNames::default();
        let store = MemoryQueue::with_jobs(&queues.pending, ["A", "B", "C", "D", "E", "F", "G"]);
        let drainer = drainer(&store, &MockDeliverer::new(), 5);

        let first = drainer.claim_batch().await.unwrap();
        assert_eq!(first, jobs(&["A", "B", "C", "D", "E"]));
        assert_eq!(store.snapshot(&queues.pending), jobs(&["F", "G"]));
        assert_eq!(store.len(&queues.in_flight).await.unwrap(), 5);

        let second = drainer.claim_batch().await.unwrap();
        assert_eq!(second, jobs(&["F", "G"]));
        assert!(store.snapshot(&queues.pending).is_empty());

        assert!(drainer.claim_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_batch_retires_everything() {
        let queues = QueueNames::default();
        let store = MemoryQueue::with_jobs(&queues.pending, ["A", "B", "C"]);
        let deliverer = MockDeliverer::new();

        let items = drainer(&store, &deliverer, 5).drain_batch().await.unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(BatchSummary::of(&items).delivered, 3);
        assert!(store.snapshot(&queues.in_flight).is_empty());
        assert_eq!(deliverer.total_attempts(), 3);
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let store = MemoryQueue::new();
        let items = drainer(&store, &MockDeliverer::new(), 5).drain_batch().await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_does_not_delay_siblings() {
        let queues = QueueNames::default();
        let store = MemoryQueue::with_jobs(&queues.pending, ["bad", "good1", "good2"]);
        let deliverer = MockDeliverer::new().always_fail("bad");
        let start = Instant::now();

        let items = drainer(&store, &deliverer, 5).drain_batch().await.unwrap();

        // Siblings finished on their first attempt while "bad" was backing off.
        for good in ["good1", "good2"] {
            let times = deliverer.attempt_times(&Job::from(good));
            assert_eq!(times, vec![start]);
        }
        let summary = BatchSummary::of(&items);
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(store.snapshot(&queues.dead_letter), jobs(&["bad"]));
        assert!(store.snapshot(&queues.in_flight).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_delivery_does_not_strand_siblings() {
        let queues = QueueNames::default();
        let store = MemoryQueue::with_jobs(&queues.pending, ["good1", "bad", "good2"]);
        let deliverer = MockDeliverer::new()
            .panic_on("bad")
            .with_latency(Duration::from_millis(100));

        let items = drainer(&store, &deliverer, 5).drain_batch().await.unwrap();

        let summary = BatchSummary::of(&items);
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(deliverer.attempts(&Job::from("good1")), 1);
        assert_eq!(deliverer.attempts(&Job::from("good2")), 1);
        assert!(store.snapshot(&queues.in_flight).is_empty());
        assert_eq!(store.snapshot(&queues.dead_letter), jobs(&["bad"]));
    }

    /// Store that panics when asked to retire one particular job.
    struct PanicOnRemove {
        inner: MemoryQueue,
        job: Job,
    }

    #[async_trait]
    impl QueueStore for PanicOnRemove {
        async fn push(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
            self.inner.push(queue, job).await
        }

        async fn atomic_move(&self, source: &str, dest: &str) -> Result<Option<Job>, QueueError> {
            self.inner.atomic_move(source, dest).await
        }

        async fn remove(&self, queue: &str, job: &Job, count: usize) -> Result<usize, QueueError> {
            if *job == self.job {
                panic!("simulated bug in retire");
            }
            self.inner.remove(queue, job, count).await
        }

        async fn len(&self, queue: &str) -> Result<usize, QueueError> {
            self.inner.len(queue).await
        }
    }

    #[tokio::test]
    async fn test_panic_while_retiring_is_reported_per_job() {
        let queues = QueueNames::default();
        let memory = MemoryQueue::with_jobs(&queues.pending, ["a", "bad", "b"]);
        let store: Arc<dyn QueueStore> = Arc::new(PanicOnRemove {
            inner: memory.clone(),
            job: Job::from("bad"),
        });
        let settings = WorkerSettings {
            max_rps: 100,
            ..WorkerSettings::default()
        };
        let processor = JobProcessor::new(
            Arc::clone(&store),
            Arc::new(MockDeliverer::new()),
            Arc::new(RateLimiter::new(settings.max_rps)),
            queues.clone(),
            &settings,
        );
        let drainer = BatchDrainer::new(store, processor, queues.clone(), 5);

        let items = drainer.drain_batch().await.unwrap();

        assert_eq!(items.len(), 3);
        for item in &items {
            if item.job == Job::from("bad") {
                assert!(matches!(item.result, Err(ProcessError::Panicked)));
            } else {
                assert!(matches!(item.result, Ok(JobOutcome::Delivered { attempts: 1 })));
            }
        }
        assert_eq!(BatchSummary::of(&items).failed, 1);
        assert_eq!(memory.snapshot(&queues.in_flight), jobs(&["bad"]));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_claim() {
        let queues = QueueNames::default();
        let store = MemoryQueue::with_jobs(&queues.pending, ["A"]);
        store.set_unavailable(true);

        let err = drainer(&store, &MockDeliverer::new(), 5)
            .drain_batch()
            .await
            .unwrap_err();

        assert!(err.is_unavailable());
        store.set_unavailable(false);
        assert_eq!(store.snapshot(&queues.pending), jobs(&["A"]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_drainers_claim_each_job_once() {
        let queues = QueueNames::default();
        let ids: Vec<String> = (0..200).map(|i| format!("user{i}@example.com")).collect();
        let store = MemoryQueue::with_jobs(&queues.pending, ids.clone());

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let drainer = drainer(&store, &MockDeliverer::new(), 7);
                tokio::spawn(async move {
                    let mut claimed = Vec::new();
                    loop {
                        let batch = drainer.claim_batch().await.unwrap();
                        if batch.is_empty() {
                            break claimed;
                        }
                        claimed.extend(batch);
                    }
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        all.sort();
        let mut expected: Vec<Job> = ids.into_iter().map(Job::from).collect();
        expected.sort();
        assert_eq!(all, expected);
    }
}
