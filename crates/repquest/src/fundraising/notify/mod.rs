//! Outbound fundraising notifications.
//!
//! The engine never talks to an e-mail provider directly. It enqueues
//! [`Notification`]s on a [`NotificationOutbox`] after its state changes are
//! committed; a [`NotificationDispatcher`] drains the queue and hands rendered
//! [`OutboundEmail`]s to a [`NotificationSender`], retrying and recording
//! deliveries that ultimately fail so they can be resent by hand.

mod outbox;
mod templates;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{Contact, Donor, FundraiserId, PledgeId, PledgeTerms};
use super::export::PledgeExportRow;

pub use outbox::{
    channel, DispatchSummary, FailedDelivery, NotificationDispatcher, NotificationOutbox,
    NotificationQueue, OutboxClosed,
};

/// A player crossed into a new fundraiser-scoped level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelUpNotice {
    pub recipient: String,
    pub fundraiser_id: FundraiserId,
    pub fundraiser_title: String,
    pub player_name: String,
    pub levels: u64,
    pub fundraiser_points: u64,
}

/// One settled pledge on a donor statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLine {
    pub pledge_id: PledgeId,
    pub terms: PledgeTerms,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_player: Option<String>,
    pub levels: u64,
    pub amount: Decimal,
}

/// Everything a donor owes on one fundraiser, sent once per donor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonorStatement {
    pub fundraiser_id: FundraiserId,
    pub fundraiser_title: String,
    pub donor: Donor,
    pub lines: Vec<StatementLine>,
    pub total: Decimal,
}

/// Settlement results for the fundraiser creator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerSummary {
    pub fundraiser_id: FundraiserId,
    pub fundraiser_title: String,
    pub recipient: Contact,
    pub participant_count: usize,
    pub total_levels: u64,
    pub pledge_count: usize,
    pub donor_count: usize,
    pub excluded_pledges: usize,
    pub total_owed: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_amount: Option<Decimal>,
    pub export: Vec<PledgeExportRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LevelUp(LevelUpNotice),
    DonorStatement(DonorStatement),
    OwnerSummary(OwnerSummary),
}

impl Notification {
    pub const fn label(&self) -> &'static str {
        match self {
            Notification::LevelUp(_) => "level_up",
            Notification::DonorStatement(_) => "donor_statement",
            Notification::OwnerSummary(_) => "owner_summary",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Notification::LevelUp(notice) => &notice.recipient,
            Notification::DonorStatement(statement) => &statement.donor.email,
            Notification::OwnerSummary(summary) => &summary.recipient.email,
        }
    }

    pub fn fundraiser_id(&self) -> &FundraiserId {
        match self {
            Notification::LevelUp(notice) => &notice.fundraiser_id,
            Notification::DonorStatement(statement) => &statement.fundraiser_id,
            Notification::OwnerSummary(summary) => &summary.fundraiser_id,
        }
    }

    pub fn render(&self) -> OutboundEmail {
        match self {
            Notification::LevelUp(notice) => templates::level_up(notice),
            Notification::DonorStatement(statement) => templates::donor_statement(statement),
            Notification::OwnerSummary(summary) => templates::owner_summary(summary),
        }
    }
}

/// Rendered e-mail ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Trait describing the transactional e-mail transport.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("notification has no recipient")]
    MissingRecipient,
}

impl NotifyError {
    /// Transport failures may succeed on a later attempt; rejections will not.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Transport(_))
    }
}
