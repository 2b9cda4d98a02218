//! Fundraiser pledge settlement and progress tracking.
//!
//! Players and teams run time-boxed fundraisers where donors pledge either a
//! flat amount or a capped amount per level earned. While a fundraiser is
//! open, points-earning events advance fundraiser-scoped progress. Once the
//! close date has passed a sweep claims the fundraiser, freezes each pledge's
//! final amount and queues statements for donors and the owner.

pub mod clock;
pub mod domain;
pub mod export;
pub mod ledger;
pub mod levels;
pub mod notify;
pub mod pledges;
pub mod progress;
pub mod repository;
pub mod router;
pub mod service;
pub mod settlement;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    Contact, Donor, Fundraiser, FundraiserId, FundraiserKind, FundraiserOwner, FundraiserProgress,
    FundraiserStatus, LevelChange, LevelRange, NewFundraiser, NewPledge, PaymentStatus, PlayerId,
    PlayerProfile, Pledge, PledgeId, PledgeRecord, PledgeTerms, TeamId,
};
pub use export::{export_rows, pledge_csv, write_pledge_csv, ExportTotals, PledgeExportRow};
pub use ledger::{PointsLedger, PointsWindow};
pub use levels::{level_for, points_to_next_level, POINTS_PER_LEVEL};
pub use notify::{
    DispatchSummary, FailedDelivery, Notification, NotificationDispatcher, NotificationOutbox,
    NotificationQueue, NotificationSender, NotifyError, OutboundEmail,
};
pub use pledges::{amount_owed, to_cents, LevelBasis, MissingProgressPolicy, PledgeFault};
pub use progress::{ProgressError, ProgressReport, ProgressTracker, SkipReason};
pub use repository::{FundraiserStore, RepositoryError};
pub use router::{fundraiser_router, PointsEvent};
pub use service::{
    FundraiserService, FundraiserServiceError, FundraiserStanding, LaunchFundraiser,
    LaunchedFundraiser, PledgeRequest, ValidationError,
};
pub use settlement::{
    ExcludedPledge, FinalizeOutcome, FundraiserSettlement, SettlementEngine, SettlementError,
    SettlementFailure, SweepReport,
};
