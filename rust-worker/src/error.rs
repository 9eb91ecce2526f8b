//! Error types shared across the dispatch pipeline.
//!
//! Library seams return these typed errors; the binaries wrap them with
//! `anyhow` context at the composition root.

use std::time::Duration;

use thiserror::Error;

/// Configuration could not be loaded from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Failure talking to the durable queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The store could not be reached (connection refused, dropped, timed out).
    #[error("queue store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error.
    #[error("queue command failed: {0}")]
    Command(#[source] redis::RedisError),
}

impl QueueError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            QueueError::Unavailable(err.to_string())
        } else {
            QueueError::Command(err)
        }
    }
}

/// Failure of the external delivery action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Worth retrying: network trouble, provider throttling, 5xx.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot help, e.g. the recipient address does not parse.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Permanent(_))
    }
}

/// A job could not be retired because the queue store failed underneath it.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to retire job: {0}")]
    Queue(#[from] QueueError),

    #[error("job processing panicked")]
    Panicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_retryable() {
        assert!(DeliveryError::Transient("smtp 421".into()).is_retryable());
        assert!(DeliveryError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(!DeliveryError::Permanent("bad address".into()).is_retryable());
    }

    #[test]
    fn test_redis_io_error_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = QueueError::from(redis::RedisError::from(io));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_config_error_message() {
        let err = ConfigError::Invalid {
            var: "MAX_RPS",
            value: "0".into(),
            reason: "must be at least 1",
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"0\" for MAX_RPS: must be at least 1"
        );
    }
}
