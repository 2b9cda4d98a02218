use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Notification, NotificationSender, NotifyError};

/// Creates a connected outbox/queue pair.
pub fn channel() -> (NotificationOutbox, NotificationQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationOutbox { tx }, NotificationQueue { rx })
}

/// Producer half handed to the engine. Enqueueing never blocks and never
/// talks to the network.
#[derive(Debug, Clone)]
pub struct NotificationOutbox {
    tx: mpsc::UnboundedSender<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification outbox is closed")]
pub struct OutboxClosed;

impl NotificationOutbox {
    pub fn enqueue(&self, notification: Notification) -> Result<(), OutboxClosed> {
        self.tx.send(notification).map_err(|_| OutboxClosed)
    }
}

#[derive(Debug)]
pub struct NotificationQueue {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationQueue {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Everything queued right now, without waiting.
    pub fn drain_ready(&mut self) -> Vec<Notification> {
        let mut ready = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            ready.push(notification);
        }
        ready
    }
}

/// Delivery that exhausted its attempts; kept for manual resend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDelivery {
    pub kind: &'static str,
    pub recipient: String,
    pub subject: String,
    pub attempts: u32,
    pub error: String,
    pub notification: Notification,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Consumer half: renders and sends queued notifications with bounded retries.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: Arc<dyn NotificationSender>,
    max_attempts: u32,
    backoff: Duration,
    failed: Arc<Mutex<Vec<FailedDelivery>>>,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn NotificationSender>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            sender,
            max_attempts: max_attempts.max(1),
            backoff,
            failed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sends one notification, retrying transport failures with linear backoff.
    pub async fn deliver(&self, notification: &Notification) -> Result<u32, NotifyError> {
        if notification.recipient().trim().is_empty() {
            return Err(NotifyError::MissingRecipient);
        }

        let email = notification.render();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sender.send(&email).await {
                Ok(()) => return Ok(attempt),
                Err(err) if !err.is_retryable() || attempt >= self.max_attempts => {
                    return Err(err)
                }
                Err(err) => {
                    warn!(
                        kind = notification.label(),
                        recipient = %email.to,
                        attempt,
                        error = %err,
                        "notification send failed, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
            }
        }
    }

    async fn process(&self, notification: Notification, summary: &mut DispatchSummary) {
        match self.deliver(&notification).await {
            Ok(attempts) => {
                debug!(
                    kind = notification.label(),
                    fundraiser_id = %notification.fundraiser_id(),
                    attempts,
                    "notification delivered"
                );
                summary.delivered += 1;
            }
            Err(err) => {
                error!(
                    kind = notification.label(),
                    fundraiser_id = %notification.fundraiser_id(),
                    recipient = notification.recipient(),
                    error = %err,
                    "notification delivery failed; queued for manual resend"
                );
                let email = notification.render();
                let attempts = match err {
                    NotifyError::MissingRecipient => 0,
                    NotifyError::Rejected { .. } => 1,
                    NotifyError::Transport(_) => self.max_attempts,
                };
                self.failed
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(FailedDelivery {
                        kind: notification.label(),
                        recipient: email.to,
                        subject: email.subject,
                        attempts,
                        error: err.to_string(),
                        notification,
                    });
                summary.failed += 1;
            }
        }
    }

    /// Delivers whatever is queued right now and returns.
    pub async fn flush(&self, queue: &mut NotificationQueue) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for notification in queue.drain_ready() {
            self.process(notification, &mut summary).await;
        }
        summary
    }

    /// Delivers until every outbox handle has been dropped.
    pub async fn run(self, mut queue: NotificationQueue) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        while let Some(notification) = queue.recv().await {
            self.process(notification, &mut summary).await;
        }
        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "notification dispatcher stopped"
        );
        summary
    }

    pub fn failed_deliveries(&self) -> Vec<FailedDelivery> {
        self.failed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
