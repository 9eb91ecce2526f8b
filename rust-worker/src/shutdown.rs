//! Graceful shutdown on SIGINT/SIGTERM.
//!
//! The first signal cancels the shared token so the pool stops taking new
//! batches, then in-flight work gets a bounded grace period. A second signal
//! during the grace period abandons the wait immediately. Jobs still
//! in-flight when the process exits stay in the in-flight queue.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pool::PoolReport;

/// How the process came to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The pool finished on its own without a signal.
    Completed(PoolReport),
    /// A signal arrived and every loop stopped within the grace period.
    Drained(PoolReport),
    /// The grace period ran out with work still in flight.
    GraceExpired,
    /// A second signal arrived during the grace period.
    Forced,
}

impl ShutdownOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownOutcome::Drained(_) | ShutdownOutcome::GraceExpired => 0,
            ShutdownOutcome::Forced => 130,
            // Loops only stop when cancelled, so finishing unprompted is a fault.
            ShutdownOutcome::Completed(_) => 1,
        }
    }
}

/// Owns the cancellation token shared with the worker pool.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// A handle to the token the pool should watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token. Returns `true` only for the call that cancelled it.
    pub fn trigger(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Drive `work` until a signal arrives, then allow it the grace period.
    pub async fn run<W>(self, mut signals: mpsc::Receiver<&'static str>, work: W) -> ShutdownOutcome
    where
        W: Future<Output = PoolReport>,
    {
        tokio::pin!(work);

        tokio::select! {
            report = &mut work => return ShutdownOutcome::Completed(report),
            Some(name) = signals.recv() => {
                info!(signal = name, "shutdown_signal_received");
            }
        }

        if self.trigger() {
            info!(grace_ms = self.grace.as_millis() as u64, "worker_stopping");
        }

        tokio::select! {
            report = &mut work => {
                info!("worker_shutdown_complete");
                ShutdownOutcome::Drained(report)
            }
            _ = sleep(self.grace) => {
                warn!("shutdown_grace_expired");
                ShutdownOutcome::GraceExpired
            }
            Some(name) = signals.recv() => {
                warn!(signal = name, "shutdown_forced");
                ShutdownOutcome::Forced
            }
        }
    }
}

/// Forward SIGINT and SIGTERM into a channel, one message per signal.
///
/// Must be called from within a tokio runtime.
pub fn listen_for_signals() -> io::Result<mpsc::Receiver<&'static str>> {
    let (tx, rx) = mpsc::channel(4);

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let tx = tx.clone();
        tokio::spawn(async move {
            while terminate.recv().await.is_some() {
                if tx.send("SIGTERM").await.is_err() {
                    break;
                }
            }
        });
    }

    tokio::spawn(async move {
        loop {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "ctrl_c_handler_failed");
                break;
            }
            if tx.send("SIGINT").await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
