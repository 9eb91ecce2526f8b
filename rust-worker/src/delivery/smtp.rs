//! SMTP mail transport using lettre.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{Mailer, VerificationEmail};
use crate::config::SmtpSettings;
use crate::error::DeliveryError;

/// Sends verification emails through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings, from: &str) -> anyhow::Result<Self> {
        let from: Mailbox = from.parse()?;

        let transport = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
                .credentials(Credentials::new(
                    settings.username.clone(),
                    settings.password.clone(),
                ))
                .port(settings.port)
                .build()
        } else if !settings.username.is_empty() {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .credentials(Credentials::new(
                    settings.username.clone(),
                    settings.password.clone(),
                ))
                .port(settings.port)
                .build()
        } else {
            // No auth (Mailpit/Mailhog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
                .build()
        };

        Ok(Self { transport, from })
    }

    fn build_message(&self, email: &VerificationEmail) -> Result<Message, DeliveryError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError::Permanent(format!("invalid recipient address: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )
            .map_err(|e| DeliveryError::Permanent(format!("failed to build message: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &VerificationEmail) -> Result<(), DeliveryError> {
        let message = self.build_message(email)?;

        let response = self.transport.send(message).await.map_err(|e| {
            if e.is_permanent() {
                DeliveryError::Permanent(format!("smtp rejected message: {e}"))
            } else {
                DeliveryError::Transient(format!("smtp send failed: {e}"))
            }
        })?;

        info!(
            to = %email.to,
            smtp_code = %response.code(),
            "smtp_email_sent"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "localhost".to_string(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            use_tls: false,
        }
    }

    fn email(to: &str) -> VerificationEmail {
        VerificationEmail {
            to: to.to_string(),
            subject: "Verify your email".to_string(),
            html: "<a href=\"x\">Verify Email</a>".to_string(),
            text: "x".to_string(),
            link: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_message() {
        let mailer = SmtpMailer::new(&settings(), "Verify <noreply@example.com>").unwrap();
        let message = mailer.build_message(&email("user@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("Subject: Verify your email"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_permanent() {
        let mailer = SmtpMailer::new(&settings(), "noreply@example.com").unwrap();
        let err = mailer.build_message(&email("not an address")).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_sender_rejected() {
        assert!(SmtpMailer::new(&settings(), "nope").is_err());
    }
}
