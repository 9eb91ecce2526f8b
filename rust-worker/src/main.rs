//! Dispatch Worker - drains the verification queue and delivers emails.
//!
//! This worker moves batches of jobs from the pending queue to the in-flight
//! queue, delivers each one under a global rate limit with retries, and
//! dead-letters jobs that exhaust their attempts. SIGINT/SIGTERM trigger a
//! graceful shutdown.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dispatch::{
    listen_for_signals, BatchDrainer, Config, JobProcessor, QueueStore, RateLimiter, RedisQueue,
    ShutdownCoordinator, ShutdownOutcome, VerificationDeliverer, WorkerPool,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!(pid = std::process::id(), "worker_starting");

    match run().await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            error!(error = %format!("{e:#}"), "worker_fatal_error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ShutdownOutcome> {
    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;
    let settings = &config.worker;
    info!(
        max_rps = settings.max_rps,
        batch_size = settings.batch_size,
        retry_limit = settings.retry_limit,
        concurrency = settings.concurrency,
        empty_queue_delay_ms = settings.empty_queue_delay.as_millis() as u64,
        error_delay_ms = settings.error_delay.as_millis() as u64,
        delivery_timeout_ms = settings.delivery_timeout.as_millis() as u64,
        pending_queue = %config.queues.pending,
        "config_loaded"
    );

    let signals = listen_for_signals().context("Failed to install signal handlers")?;

    let store: Arc<dyn QueueStore> = Arc::new(
        RedisQueue::connect(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );
    let deliverer = Arc::new(VerificationDeliverer::from_config(&config)?);
    let limiter = Arc::new(RateLimiter::new(settings.max_rps));

    let processor = JobProcessor::new(
        Arc::clone(&store),
        deliverer,
        limiter,
        config.queues.clone(),
        settings,
    );
    let drainer = BatchDrainer::new(store, processor, config.queues.clone(), settings.batch_size);
    let pool = WorkerPool::new(drainer, settings);

    let coordinator = ShutdownCoordinator::new(settings.shutdown_grace);
    let token = coordinator.token();

    info!("worker_ready");
    let outcome = coordinator.run(signals, pool.run(token)).await;

    info!(outcome = ?outcome, "worker_exiting");
    Ok(outcome)
}
