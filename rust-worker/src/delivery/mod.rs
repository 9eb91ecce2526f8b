//! Verification email delivery.
//!
//! Delivering a job means generating a signed verification token for the
//! address, building the verification link, and handing the resulting email
//! to a mail transport.
//!
//! ```text
//! Job → VerificationSigner::issue → verification_link → Mailer::send
//! ```

pub mod http;
pub mod log;
pub mod mock;
pub mod smtp;
pub mod token;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::config::{Config, DeliveryProvider};
use crate::error::DeliveryError;
use crate::queue::Job;

pub use self::http::HttpMailer;
pub use self::log::LogMailer;
pub use self::mock::MockDeliverer;
pub use self::smtp::SmtpMailer;
pub use self::token::VerificationSigner;

/// The side-effecting action performed for each job.
///
/// Implementations must tolerate being invoked more than once for the same
/// job; the worker only guarantees at-least-once delivery.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

/// A mail transport that can send one rendered verification email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &VerificationEmail) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

/// A rendered verification email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub link: String,
}

impl VerificationEmail {
    pub fn new(to: &str, link: &Url) -> Self {
        Self {
            to: to.to_string(),
            subject: "Verify your email".to_string(),
            html: format!(
                "<p>Please click the link below to verify your email:</p>\n\
                 <a href=\"{link}\">Verify Email</a>"
            ),
            text: format!("Please open the link below to verify your email:\n{link}"),
            link: link.to_string(),
        }
    }
}

/// Build `{base}/auth/verify-email?token=...`.
pub fn verification_link(base_url: &str, token: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!(
        "{}/auth/verify-email",
        base_url.trim_end_matches('/')
    ))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Deliverer that signs a token and mails the verification link.
pub struct VerificationDeliverer {
    signer: VerificationSigner,
    base_url: String,
    mailer: Box<dyn Mailer>,
}

impl VerificationDeliverer {
    pub fn new(signer: VerificationSigner, base_url: impl Into<String>, mailer: Box<dyn Mailer>) -> Self {
        Self {
            signer,
            base_url: base_url.into(),
            mailer,
        }
    }

    /// Wire up the deliverer selected by `DELIVERY_PROVIDER`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mailer: Box<dyn Mailer> = match config.delivery_provider {
            DeliveryProvider::Smtp => {
                let Some(smtp) = config.smtp.as_ref() else {
                    bail!("DELIVERY_PROVIDER=smtp requires SMTP_HOST");
                };
                Box::new(
                    SmtpMailer::new(smtp, &config.email_from)
                        .context("Failed to create SMTP transport")?,
                )
            }
            DeliveryProvider::Http => {
                let Some(api) = config.http_api.as_ref() else {
                    bail!("DELIVERY_PROVIDER=http requires EMAIL_HTTP_URL");
                };
                Box::new(
                    HttpMailer::new(api, &config.email_from)
                        .context("Failed to create HTTP email client")?,
                )
            }
            DeliveryProvider::Log => Box::new(LogMailer),
        };

        // Fail fast on a base URL that can never produce a link.
        verification_link(&config.app_base_url, "probe")
            .with_context(|| format!("Invalid APP_BASE_URL {:?}", config.app_base_url))?;

        info!(provider = mailer.name(), "deliverer_configured");

        Ok(Self::new(
            VerificationSigner::new(&config.verification_secret, config.verification_ttl_secs),
            config.app_base_url.clone(),
            mailer,
        ))
    }

    /// Generate the verification artifact for a job.
    pub fn render(&self, job: &Job) -> Result<VerificationEmail, DeliveryError> {
        let token = self.signer.issue(job.as_str());
        let link = verification_link(&self.base_url, &token)
            .map_err(|e| DeliveryError::Permanent(format!("invalid verification link: {e}")))?;
        Ok(VerificationEmail::new(job.as_str(), &link))
    }
}

#[async_trait]
impl Deliverer for VerificationDeliverer {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        let email = self.render(job)?;
        self.mailer.send(&email).await
    }

    fn name(&self) -> &'static str {
        self.mailer.name()
    }
}
