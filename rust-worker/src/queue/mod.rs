//! Queue module for the durable job lists.
//!
//! This module provides:
//! - The `Job` type carried through the queues
//! - The `QueueStore` contract the worker needs from the store
//! - A Redis-backed store and an in-process store
//!
//! ## Lifecycle
//!
//! ```text
//! producer → pending ──atomic move──→ in-flight ──success──→ (removed)
//!                                         └──retries exhausted──→ dead-letter
//! ```

pub mod memory;
pub mod redis;
pub mod store;
pub mod types;

pub use memory::MemoryQueue;
pub use self::redis::RedisQueue;
pub use store::QueueStore;
pub use types::Job;
