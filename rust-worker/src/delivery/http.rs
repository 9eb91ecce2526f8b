//! Transactional email delivered through an HTTP JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::info;

use super::{Mailer, VerificationEmail};
use crate::config::HttpApiSettings;
use crate::error::DeliveryError;

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Posts each verification email to a transactional email endpoint.
pub struct HttpMailer {
    client: Client,
    url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(settings: &HttpApiSettings, from: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            api_key: settings.api_key.clone(),
            from: from.to_string(),
        })
    }
}

/// Map a non-success response status to a delivery error.
///
/// Throttling and server errors are worth retrying; any other client error
/// means the request itself is wrong.
pub fn classify_status(status: StatusCode) -> DeliveryError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DeliveryError::Transient(format!("email api returned {status}"))
    } else {
        DeliveryError::Permanent(format!("email api returned {status}"))
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &VerificationEmail) -> Result<(), DeliveryError> {
        let body = SendRequest {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("email api request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        info!(
            to = %email.to,
            status_code = status.as_u16(),
            "http_email_sent"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
