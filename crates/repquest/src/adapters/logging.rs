use async_trait::async_trait;
use tracing::info;

use crate::fundraising::notify::{NotificationSender, NotifyError, OutboundEmail};

/// Development sender that writes each e-mail to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSender;

#[async_trait]
impl NotificationSender for LoggingSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        if email.to.trim().is_empty() {
            return Err(NotifyError::MissingRecipient);
        }
        info!(
            recipient = %email.to,
            subject = %email.subject,
            body = %email.text,
            "e-mail delivery skipped (no provider configured)"
        );
        Ok(())
    }
}
