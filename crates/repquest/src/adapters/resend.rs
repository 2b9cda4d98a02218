use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::fundraising::notify::{NotificationSender, NotifyError, OutboundEmail};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transactional e-mail through the Resend HTTP API.
#[derive(Clone)]
pub struct ResendSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

#[derive(Debug, Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

impl ResendSender {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: RESEND_ENDPOINT.to_string(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }

    /// Points the sender at another endpoint, e.g. a local mail catcher.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn payload<'a>(&'a self, email: &'a OutboundEmail) -> ResendPayload<'a> {
        ResendPayload {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        }
    }
}

#[async_trait]
impl NotificationSender for ResendSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        if email.to.trim().is_empty() {
            return Err(NotifyError::MissingRecipient);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.payload(email))
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(recipient = %email.to, subject = %email.subject, "resend accepted e-mail");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(NotifyError::Transport(format!("resend returned {status}: {body}")))
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
