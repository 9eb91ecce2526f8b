//! Verify Dispatch - rate-limited worker for email verification jobs.
//!
//! This library provides shared modules for the two binaries:
//! - `dispatch-worker`: Drains the pending queue and delivers verification emails
//! - `dispatch-web`: Thin web server that enqueues requests and verifies tokens
//!
//! ## Architecture
//!
//! ```text
//! dispatch-web → pending queue → WorkerPool → BatchDrainer → JobProcessor → Deliverer
//!                                                                  │
//!                                                          RateLimiter gate
//! ```

pub mod config;
pub mod delivery;
pub mod drainer;
pub mod error;
pub mod limiter;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod shutdown;
pub mod web;

// Re-export commonly used types
pub use config::{Config, QueueNames, WorkerSettings};
pub use delivery::{Deliverer, MockDeliverer, VerificationDeliverer, VerificationSigner};
pub use drainer::BatchDrainer;
pub use error::{ConfigError, DeliveryError, ProcessError, QueueError};
pub use limiter::RateLimiter;
pub use pool::{PoolReport, WorkerPool};
pub use processor::{JobOutcome, JobProcessor};
pub use queue::{Job, MemoryQueue, QueueStore, RedisQueue};
pub use shutdown::{listen_for_signals, ShutdownCoordinator, ShutdownOutcome};
