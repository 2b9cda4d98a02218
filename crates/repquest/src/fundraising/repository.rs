use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::domain::{
    Fundraiser, FundraiserId, FundraiserProgress, NewFundraiser, NewPledge, PlayerId,
    PlayerProfile, Pledge, PledgeId, PledgeRecord, TeamId,
};

/// Storage abstraction over the `fundraisers`, `fundraiser_progress` and
/// `fundraiser_pledges` tables so the engine can be exercised in isolation.
///
/// The three conditional writes (`claim_for_settlement`, `release_claim`,
/// `record_final_amount`) must be atomic compare-and-set operations in the
/// backing store and report whether a row was affected.
#[async_trait]
pub trait FundraiserStore: Send + Sync {
    async fn insert_fundraiser(&self, fundraiser: NewFundraiser)
        -> Result<Fundraiser, RepositoryError>;

    /// Removes a fundraiser and any progress rows written for it. Used to
    /// undo a launch whose participant rows could not be stored.
    async fn delete_fundraiser(&self, id: &FundraiserId) -> Result<(), RepositoryError>;

    async fn fetch_fundraiser(
        &self,
        id: &FundraiserId,
    ) -> Result<Option<Fundraiser>, RepositoryError>;

    /// Active player fundraisers owned by `player` plus active team
    /// fundraisers of every team `player` belongs to.
    async fn active_fundraisers_for_player(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<Fundraiser>, RepositoryError>;

    /// Active fundraisers whose close date is strictly before `today`.
    async fn overdue_active(&self, today: NaiveDate) -> Result<Vec<Fundraiser>, RepositoryError>;

    /// `active -> ended` only where the status is still `active`.
    async fn claim_for_settlement(&self, id: &FundraiserId) -> Result<bool, RepositoryError>;

    /// `ended -> active` only where the status is still `ended`. Used to hand a
    /// fundraiser back to the next sweep after a settlement-critical failure.
    async fn release_claim(&self, id: &FundraiserId) -> Result<bool, RepositoryError>;

    async fn team_roster(&self, team: &TeamId) -> Result<Vec<PlayerProfile>, RepositoryError>;

    async fn player_profile(
        &self,
        player: &PlayerId,
    ) -> Result<Option<PlayerProfile>, RepositoryError>;

    async fn insert_progress(&self, rows: Vec<FundraiserProgress>) -> Result<(), RepositoryError>;

    async fn fetch_progress(
        &self,
        fundraiser: &FundraiserId,
        player: &PlayerId,
    ) -> Result<Option<FundraiserProgress>, RepositoryError>;

    /// Overwrites the stored totals for the row's (fundraiser, player).
    async fn save_progress(&self, row: &FundraiserProgress) -> Result<(), RepositoryError>;

    async fn progress_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<FundraiserProgress>, RepositoryError>;

    async fn insert_pledge(&self, pledge: NewPledge) -> Result<Pledge, RepositoryError>;

    async fn pledges_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<PledgeRecord>, RepositoryError>;

    /// Sets `final_amount_owed` only where it is still null.
    async fn record_final_amount(
        &self,
        pledge: &PledgeId,
        amount: Decimal,
    ) -> Result<bool, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected repository payload: {0}")]
    Decode(String),
}
