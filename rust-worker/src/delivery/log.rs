//! Mail transport that only logs the verification link, for local development.

use async_trait::async_trait;
use tracing::info;

use super::{Mailer, VerificationEmail};
use crate::error::DeliveryError;

pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &VerificationEmail) -> Result<(), DeliveryError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            link = %email.link,
            "log_email_sent"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
