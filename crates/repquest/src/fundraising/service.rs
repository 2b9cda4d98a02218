use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::clock::Clock;
use super::domain::{
    Contact, Donor, Fundraiser, FundraiserId, FundraiserOwner, FundraiserProgress,
    FundraiserStatus, LevelRange, NewFundraiser, NewPledge, PlayerId, Pledge, PledgeRecord,
    PledgeTerms, TeamId,
};
use super::export::{export_rows, PledgeExportRow};
use super::ledger::{PointsLedger, PointsWindow};
use super::levels::points_to_next_level;
use super::notify::NotificationOutbox;
use super::pledges::{amount_owed, LevelBasis, MissingProgressPolicy, PledgeFault};
use super::progress::{ProgressError, ProgressReport, ProgressTracker};
use super::repository::{FundraiserStore, RepositoryError};
use super::settlement::{FinalizeOutcome, SettlementEngine, SettlementError, SweepReport};

/// Service composing the store, points ledger, progress tracker and
/// settlement engine behind one entry point for routes and the CLI.
pub struct FundraiserService {
    store: Arc<dyn FundraiserStore>,
    ledger: Arc<dyn PointsLedger>,
    clock: Arc<dyn Clock>,
    tracker: ProgressTracker,
    engine: SettlementEngine,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaunchFundraiser {
    pub owner: FundraiserOwner,
    pub team_id: TeamId,
    pub title: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    #[serde(default)]
    pub goal_amount: Option<Decimal>,
    #[serde(default)]
    pub estimated_levels: Option<LevelRange>,
    pub created_by: Contact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchedFundraiser {
    pub fundraiser: Fundraiser,
    pub participants: Vec<FundraiserProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PledgeRequest {
    pub donor: Donor,
    #[serde(default)]
    pub target_player: Option<PlayerId>,
    #[serde(flatten)]
    pub terms: PledgeTerms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantStanding {
    pub player_id: PlayerId,
    pub display_name: String,
    pub starting_level: u64,
    pub current_level: u64,
    pub fundraiser_points: u64,
    pub fundraiser_levels: u64,
    pub points_to_next_level: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PledgeStanding {
    pub pledge_id: String,
    pub donor_name: String,
    pub pledge_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_player: Option<PlayerId>,
    /// Final amount once settled, otherwise the amount owed at current levels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
}

/// Current standing of a fundraiser, live while active and frozen once ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundraiserStanding {
    pub fundraiser: Fundraiser,
    pub participants: Vec<ParticipantStanding>,
    pub total_levels: u64,
    pub pledges: Vec<PledgeStanding>,
    pub malformed_pledges: usize,
    pub projected_total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_progress_pct: Option<Decimal>,
}

/// Rejected launch or pledge input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("close date {ends_on} must be after open date {starts_on}")]
    InvalidWindow {
        starts_on: NaiveDate,
        ends_on: NaiveDate,
    },
    #[error("goal amount must be positive")]
    NonPositiveGoal,
    #[error("goal amount {0} must be at least 0.01 with at most two decimal places")]
    InvalidGoalAmount(Decimal),
    #[error("estimated level range {min}..{max} is inverted")]
    InvalidLevelRange { min: u64, max: u64 },
    #[error("player {0} is not known")]
    UnknownPlayer(PlayerId),
    #[error("team {0} has no players")]
    EmptyRoster(TeamId),
    #[error("fundraiser {0} is not accepting pledges")]
    FundraiserClosed(FundraiserId),
    #[error("donor e-mail is required")]
    MissingDonorEmail,
    #[error("player-targeted pledges are only allowed on team fundraisers")]
    TargetNotAllowed,
    #[error("player {0} is not participating in this fundraiser")]
    TargetNotParticipant(PlayerId),
    #[error("invalid pledge terms: {0}")]
    InvalidTerms(#[from] PledgeFault),
}

#[derive(Debug, thiserror::Error)]
pub enum FundraiserServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("fundraiser {0} not found")]
    NotFound(FundraiserId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl FundraiserService {
    pub fn new(
        store: Arc<dyn FundraiserStore>,
        ledger: Arc<dyn PointsLedger>,
        clock: Arc<dyn Clock>,
        outbox: NotificationOutbox,
        policy: MissingProgressPolicy,
    ) -> Self {
        let tracker = ProgressTracker::new(store.clone(), clock.clone(), outbox.clone());
        let engine = SettlementEngine::new(store.clone(), clock.clone(), outbox, policy);
        Self {
            store,
            ledger,
            clock,
            tracker,
            engine,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn engine(&self) -> &SettlementEngine {
        &self.engine
    }

    /// Creates the fundraiser and snapshots each participant's team points.
    pub async fn launch(
        &self,
        request: LaunchFundraiser,
    ) -> Result<LaunchedFundraiser, FundraiserServiceError> {
        validate_launch(&request)?;

        let participants = match &request.owner {
            FundraiserOwner::Player(player) => {
                let profile = self
                    .store
                    .player_profile(player)
                    .await?
                    .ok_or_else(|| ValidationError::UnknownPlayer(player.clone()))?;
                vec![profile]
            }
            FundraiserOwner::Team(team) => {
                let roster = self.store.team_roster(team).await?;
                if roster.is_empty() {
                    return Err(ValidationError::EmptyRoster(team.clone()).into());
                }
                roster
            }
        };

        let now = self.clock.now();
        let mut starting = Vec::with_capacity(participants.len());
        for player in participants {
            let points = self
                .ledger
                .points_earned(&player.id, &request.team_id, PointsWindow::until(now))
                .await?;
            starting.push((player, points));
        }

        let fundraiser = self
            .store
            .insert_fundraiser(NewFundraiser {
                owner: request.owner,
                team_id: request.team_id,
                title: request.title.trim().to_string(),
                starts_on: request.starts_on,
                ends_on: request.ends_on,
                goal_amount: request.goal_amount,
                estimated_levels: request.estimated_levels,
                created_by: request.created_by,
                created_at: now,
            })
            .await?;

        let rows: Vec<FundraiserProgress> = starting
            .into_iter()
            .map(|(player, points)| {
                FundraiserProgress::snapshot(fundraiser.id.clone(), player, points, now)
            })
            .collect();
        if let Err(err) = self.store.insert_progress(rows.clone()).await {
            if let Err(cleanup) = self.store.delete_fundraiser(&fundraiser.id).await {
                warn!(
                    fundraiser_id = %fundraiser.id,
                    error = %cleanup,
                    "could not remove fundraiser after failed launch"
                );
            }
            return Err(err.into());
        }

        info!(
            fundraiser_id = %fundraiser.id,
            kind = fundraiser.kind().label(),
            participants = rows.len(),
            ends_on = %fundraiser.ends_on,
            "fundraiser launched"
        );

        Ok(LaunchedFundraiser {
            fundraiser,
            participants: rows,
        })
    }

    pub async fn submit_pledge(
        &self,
        fundraiser_id: &FundraiserId,
        request: PledgeRequest,
    ) -> Result<Pledge, FundraiserServiceError> {
        let fundraiser = self.fetch(fundraiser_id).await?;
        let today = self.clock.today();
        if fundraiser.status != FundraiserStatus::Active || today > fundraiser.ends_on {
            return Err(ValidationError::FundraiserClosed(fundraiser.id).into());
        }
        if request.donor.email.trim().is_empty() {
            return Err(ValidationError::MissingDonorEmail.into());
        }
        request.terms.validate().map_err(ValidationError::from)?;

        if let Some(target) = &request.target_player {
            if matches!(fundraiser.owner, FundraiserOwner::Player(_)) {
                return Err(ValidationError::TargetNotAllowed.into());
            }
            if self.store.fetch_progress(&fundraiser.id, target).await?.is_none() {
                return Err(ValidationError::TargetNotParticipant(target.clone()).into());
            }
        }

        let pledge = self
            .store
            .insert_pledge(NewPledge {
                fundraiser_id: fundraiser.id.clone(),
                donor: Donor {
                    email: request.donor.email.trim().to_string(),
                    ..request.donor
                },
                target_player: request.target_player,
                terms: request.terms,
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            fundraiser_id = %fundraiser.id,
            pledge_id = %pledge.id,
            pledge_type = pledge.terms.label(),
            "pledge recorded"
        );
        Ok(pledge)
    }

    pub async fn standing(
        &self,
        fundraiser_id: &FundraiserId,
    ) -> Result<FundraiserStanding, FundraiserServiceError> {
        let fundraiser = self.fetch(fundraiser_id).await?;
        let progress = self.store.progress_for(&fundraiser.id).await?;
        let basis = LevelBasis::from_progress(&progress);
        let policy = self.engine.policy();

        let mut pledges = Vec::new();
        let mut malformed_pledges = 0;
        for record in self.store.pledges_for(&fundraiser.id).await? {
            let PledgeRecord::Valid(pledge) = record else {
                malformed_pledges += 1;
                continue;
            };
            pledges.push(pledge_standing(&pledge, &basis, policy));
        }

        let projected_total: Decimal = pledges.iter().filter_map(|pledge| pledge.amount).sum();
        let goal_progress_pct = fundraiser
            .goal_amount
            .filter(|goal| *goal > Decimal::ZERO)
            .and_then(|goal| projected_total.checked_div(goal))
            .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
            .map(|pct| pct.round_dp(1));

        let participants = progress
            .iter()
            .map(|row| ParticipantStanding {
                player_id: row.player.id.clone(),
                display_name: row.player.display_name.clone(),
                starting_level: row.starting_level,
                current_level: row.current_level,
                fundraiser_points: row.fundraiser_points,
                fundraiser_levels: row.fundraiser_levels,
                points_to_next_level: points_to_next_level(row.fundraiser_points),
            })
            .collect();

        Ok(FundraiserStanding {
            fundraiser,
            participants,
            total_levels: basis.total(),
            pledges,
            malformed_pledges,
            projected_total,
            goal_progress_pct,
        })
    }

    pub async fn export(
        &self,
        fundraiser_id: &FundraiserId,
    ) -> Result<Vec<PledgeExportRow>, FundraiserServiceError> {
        let fundraiser = self.fetch(fundraiser_id).await?;
        let progress = self.store.progress_for(&fundraiser.id).await?;
        let pledges: Vec<Pledge> = self
            .store
            .pledges_for(&fundraiser.id)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                PledgeRecord::Valid(pledge) => Some(pledge),
                PledgeRecord::Malformed { .. } => None,
            })
            .collect();
        Ok(export_rows(&pledges, &progress))
    }

    pub async fn record_points(
        &self,
        player: &PlayerId,
        points_earned: i64,
    ) -> Result<ProgressReport, FundraiserServiceError> {
        Ok(self.tracker.record_points(player, points_earned).await?)
    }

    pub async fn sweep(&self) -> Result<SweepReport, FundraiserServiceError> {
        Ok(self.engine.sweep().await?)
    }

    pub async fn finalize(
        &self,
        fundraiser_id: &FundraiserId,
    ) -> Result<FinalizeOutcome, FundraiserServiceError> {
        Ok(self.engine.finalize(fundraiser_id).await?)
    }

    async fn fetch(&self, id: &FundraiserId) -> Result<Fundraiser, FundraiserServiceError> {
        self.store
            .fetch_fundraiser(id)
            .await?
            .ok_or_else(|| FundraiserServiceError::NotFound(id.clone()))
    }
}

fn validate_launch(request: &LaunchFundraiser) -> Result<(), ValidationError> {
    if request.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if request.ends_on <= request.starts_on {
        return Err(ValidationError::InvalidWindow {
            starts_on: request.starts_on,
            ends_on: request.ends_on,
        });
    }
    if let Some(goal) = request.goal_amount {
        if goal <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveGoal);
        }
        if goal < Decimal::new(1, 2) || goal.normalize().scale() > 2 {
            return Err(ValidationError::InvalidGoalAmount(goal));
        }
    }
    if let Some(range) = request.estimated_levels {
        if range.min > range.max {
            return Err(ValidationError::InvalidLevelRange {
                min: range.min,
                max: range.max,
            });
        }
    }
    Ok(())
}

fn pledge_standing(
    pledge: &Pledge,
    basis: &LevelBasis,
    policy: MissingProgressPolicy,
) -> PledgeStanding {
    let (amount, issue) = match pledge.final_amount_owed {
        Some(amount) => (Some(amount), None),
        None => match basis
            .resolve(pledge.target_player.as_ref(), policy)
            .and_then(|levels| amount_owed(&pledge.terms, levels))
        {
            Ok(amount) => (Some(amount), None),
            Err(fault) => (None, Some(fault.to_string())),
        },
    };

    PledgeStanding {
        pledge_id: pledge.id.0.clone(),
        donor_name: pledge.donor.name.clone(),
        pledge_type: pledge.terms.label(),
        target_player: pledge.target_player.clone(),
        amount,
        settled: pledge.final_amount_owed.is_some(),
        issue,
    }
}
