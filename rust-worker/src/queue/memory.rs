//! In-process queue store.
//!
//! Holds every queue in one map behind a mutex, so each operation (including
//! the pop-and-push of `atomic_move`) is indivisible. Used by tests and for
//! running the worker without Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::store::QueueStore;
use super::types::Job;
use crate::error::QueueError;

/// Queue store kept in memory. Cloning shares the same queues.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<MemoryQueueInner>,
}

#[derive(Default)]
struct MemoryQueueInner {
    // Front is the head (oldest), back is the tail.
    lists: Mutex<HashMap<String, VecDeque<Job>>>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with `jobs` appended to `queue` in order.
    pub fn with_jobs<I, J>(queue: &str, jobs: I) -> Self
    where
        I: IntoIterator<Item = J>,
        J: Into<Job>,
    {
        let store = Self::new();
        {
            let mut lists = store.lock();
            let list = lists.entry(queue.to_string()).or_default();
            list.extend(jobs.into_iter().map(Into::into));
        }
        store
    }

    /// Simulate the store going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Contents of `queue`, head first.
    pub fn snapshot(&self, queue: &str) -> Vec<Job> {
        self.lock()
            .get(queue)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Job>>> {
        // A panic while holding the lock cannot leave a list half-updated.
        self.inner
            .lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn push(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
        self.check_available()?;
        self.lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(job.clone());
        Ok(())
    }

    async fn atomic_move(&self, source: &str, dest: &str) -> Result<Option<Job>, QueueError> {
        self.check_available()?;
        let mut lists = self.lock();
        let job = match lists.get_mut(source).and_then(VecDeque::pop_front) {
            Some(job) => job,
            None => return Ok(None),
        };
        lists
            .entry(dest.to_string())
            .or_default()
            .push_back(job.clone());
        Ok(Some(job))
    }

    async fn remove(&self, queue: &str, job: &Job, count: usize) -> Result<usize, QueueError> {
        self.check_available()?;
        let mut lists = self.lock();
        let Some(list) = lists.get_mut(queue) else {
            return Ok(0);
        };

        let limit = if count == 0 { usize::MAX } else { count };
        let mut removed = 0;
        list.retain(|queued| {
            if removed < limit && queued == job {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        self.check_available()?;
        Ok(self.lock().get(queue).map(VecDeque::len).unwrap_or(0))
    }
}
