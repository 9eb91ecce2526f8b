//! Configuration module for environment variable parsing.
//!
//! Every tunable of the dispatch worker and the web front door is read from
//! the environment. Missing optional values fall back to defaults; malformed
//! values are logged and replaced by the default. A missing queue-store URL
//! or a zero-valued sizing knob is fatal.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

/// Which delivery provider the worker sends verification emails through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryProvider {
    Smtp,
    Http,
    Log,
}

impl FromStr for DeliveryProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(DeliveryProvider::Smtp),
            "http" => Ok(DeliveryProvider::Http),
            "log" => Ok(DeliveryProvider::Log),
            _ => Err(()),
        }
    }
}

/// Names of the three durable lists the worker moves jobs between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub pending: String,
    pub in_flight: String,
    pub dead_letter: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            pending: "email-queue".to_string(),
            in_flight: "processing-queue".to_string(),
            dead_letter: "dead-letter-queue".to_string(),
        }
    }
}

/// Worker tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Token bucket capacity and refill rate (permits per second)
    pub max_rps: u32,

    /// Maximum jobs claimed per drain
    pub batch_size: usize,

    /// Maximum delivery attempts per job
    pub retry_limit: u32,

    /// Idle back-off when a drain claims nothing
    pub empty_queue_delay: Duration,

    /// Loop error back-off, also the base of the per-job exponential backoff
    pub error_delay: Duration,

    /// Number of independent processing loops
    pub concurrency: usize,

    /// Upper bound on a single delivery call
    pub delivery_timeout: Duration,

    /// How long shutdown waits for in-flight work
    pub shutdown_grace: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let error_delay = Duration::from_millis(1000);
        let retry_limit = 3;
        Self {
            max_rps: 10,
            batch_size: 5,
            retry_limit,
            empty_queue_delay: Duration::from_millis(5000),
            error_delay,
            concurrency: 2,
            delivery_timeout: Duration::from_millis(10_000),
            shutdown_grace: error_delay * retry_limit,
        }
    }
}

/// SMTP transport settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

/// Transactional email HTTP API settings.
#[derive(Debug, Clone)]
pub struct HttpApiSettings {
    pub url: String,
    pub api_key: Option<String>,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL (endpoint and credentials)
    pub redis_url: String,

    pub queues: QueueNames,

    pub worker: WorkerSettings,

    pub delivery_provider: DeliveryProvider,

    pub smtp: Option<SmtpSettings>,

    pub http_api: Option<HttpApiSettings>,

    /// Sender mailbox for verification emails
    pub email_from: String,

    /// Base URL the verification link points at
    pub app_base_url: String,

    /// HMAC key used to sign verification tokens
    pub verification_secret: String,

    /// Lifetime of a verification token in seconds
    pub verification_ttl_secs: u64,

    /// Port for the web server to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_url = required("REDIS_URL")?;
        let verification_secret = required("VERIFICATION_SECRET")?;

        let defaults = WorkerSettings::default();
        let max_rps = at_least_one("MAX_RPS", parse_env("MAX_RPS", defaults.max_rps))?;
        let batch_size = at_least_one("BATCH_SIZE", parse_env("BATCH_SIZE", defaults.batch_size))?;
        let retry_limit =
            at_least_one("RETRY_LIMIT", parse_env("RETRY_LIMIT", defaults.retry_limit))?;
        let concurrency =
            at_least_one("CONCURRENCY", parse_env("CONCURRENCY", defaults.concurrency))?;
        let error_delay = parse_millis("ERROR_DELAY", defaults.error_delay);

        let worker = WorkerSettings {
            max_rps,
            batch_size,
            retry_limit,
            empty_queue_delay: parse_millis("EMPTY_QUEUE_DELAY", defaults.empty_queue_delay),
            error_delay,
            concurrency,
            delivery_timeout: parse_millis("DELIVERY_TIMEOUT_MS", defaults.delivery_timeout),
            shutdown_grace: parse_millis("SHUTDOWN_GRACE_MS", error_delay * retry_limit),
        };

        let queue_defaults = QueueNames::default();
        let queues = QueueNames {
            pending: env::var("PENDING_QUEUE").unwrap_or(queue_defaults.pending),
            in_flight: env::var("IN_FLIGHT_QUEUE").unwrap_or(queue_defaults.in_flight),
            dead_letter: env::var("DEAD_LETTER_QUEUE").unwrap_or(queue_defaults.dead_letter),
        };

        let smtp = env::var("SMTP_HOST").ok().map(|host| SmtpSettings {
            host,
            port: parse_env("SMTP_PORT", 587),
            username: env::var("SMTP_USERNAME").unwrap_or_default(),
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            use_tls: env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        });

        let http_api = env::var("EMAIL_HTTP_URL").ok().map(|url| HttpApiSettings {
            url,
            api_key: env::var("EMAIL_HTTP_API_KEY").ok(),
        });

        Ok(Config {
            redis_url,
            queues,
            worker,
            delivery_provider: parse_env("DELIVERY_PROVIDER", DeliveryProvider::Smtp),
            smtp,
            http_api,
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
            app_base_url: env::var("APP_BASE_URL")
                .or_else(|_| env::var("NEXTAUTH_URL"))
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            verification_secret,
            verification_ttl_secs: parse_env("VERIFICATION_TTL_SECS", 86_400),
            port: parse_env("PORT", 8080),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

fn parse_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_env(name, default.as_millis() as u64))
}

fn at_least_one<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8> + ToString,
{
    if value < T::from(1) {
        return Err(ConfigError::Invalid {
            var: name,
            value: value.to_string(),
            reason: "must be at least 1",
        });
    }
    Ok(value)
}
