//! The contract the worker requires from the durable queue store.

use async_trait::async_trait;

use super::types::Job;
use crate::error::QueueError;

/// Durable list operations shared by every worker instance.
///
/// Queues are FIFO: `push` appends at the tail and `atomic_move` takes from
/// the head of the source. Implementations must perform `atomic_move` as one
/// indivisible operation so a job is never in both lists or in neither.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append `job` to the tail of `queue`.
    async fn push(&self, queue: &str, job: &Job) -> Result<(), QueueError>;

    /// Move the oldest job of `source` to the front of `dest`.
    ///
    /// Returns `None` when `source` is empty.
    async fn atomic_move(&self, source: &str, dest: &str) -> Result<Option<Job>, QueueError>;

    /// Remove up to `count` occurrences of `job` from `queue`, returning how many were removed.
    ///
    /// A `count` of zero removes every occurrence. Removing a job that is not
    /// present is not an error.
    async fn remove(&self, queue: &str, job: &Job, count: usize) -> Result<usize, QueueError>;

    /// Number of jobs currently in `queue`.
    async fn len(&self, queue: &str) -> Result<usize, QueueError>;
}
