use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::fundraising::domain::{
    Fundraiser, FundraiserId, FundraiserOwner, FundraiserProgress, FundraiserStatus,
    NewFundraiser, NewPledge, PaymentStatus, PlayerId, PlayerProfile, Pledge, PledgeId,
    PledgeRecord, TeamId,
};
use crate::fundraising::ledger::{PointsLedger, PointsWindow};
use crate::fundraising::pledges::PledgeFault;
use crate::fundraising::repository::{FundraiserStore, RepositoryError};

#[derive(Debug, Clone)]
struct DrillCompletion {
    player: PlayerId,
    team: TeamId,
    points: u64,
    completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredPledge {
    fundraiser_id: FundraiserId,
    record: PledgeRecord,
}

#[derive(Debug, Default)]
struct State {
    fundraisers: Vec<Fundraiser>,
    progress: Vec<FundraiserProgress>,
    pledges: Vec<StoredPledge>,
    players: HashMap<PlayerId, PlayerProfile>,
    rosters: HashMap<TeamId, Vec<PlayerId>>,
    completions: Vec<DrillCompletion>,
}

/// Process-local store backing development runs and tests. Every conditional
/// write happens under a single lock, so compare-and-set semantics hold across
/// concurrent callers.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    sequence: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self, prefix: &str) -> String {
        let next = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{next:06}")
    }

    /// Registers a player and adds them to each team's roster.
    pub fn add_player(&self, profile: PlayerProfile, teams: &[TeamId]) {
        let mut state = self.state();
        for team in teams {
            let roster = state.rosters.entry(team.clone()).or_default();
            if !roster.contains(&profile.id) {
                roster.push(profile.id.clone());
            }
        }
        state.players.insert(profile.id.clone(), profile);
    }

    /// Appends a drill completion to the points ledger.
    pub fn record_completion(
        &self,
        player: &PlayerId,
        team: &TeamId,
        points: u64,
        completed_at: DateTime<Utc>,
    ) {
        self.state().completions.push(DrillCompletion {
            player: player.clone(),
            team: team.clone(),
            points,
            completed_at,
        });
    }

    /// Stores a pledge row whose terms could not be decoded.
    pub fn insert_malformed_pledge(&self, fundraiser: &FundraiserId, fault: PledgeFault) -> PledgeId {
        let pledge_id = PledgeId(self.next_id("pl"));
        self.state().pledges.push(StoredPledge {
            fundraiser_id: fundraiser.clone(),
            record: PledgeRecord::Malformed {
                pledge_id: pledge_id.clone(),
                fault,
            },
        });
        pledge_id
    }

    pub fn fundraiser_status(&self, id: &FundraiserId) -> Option<FundraiserStatus> {
        self.state()
            .fundraisers
            .iter()
            .find(|fundraiser| &fundraiser.id == id)
            .map(|fundraiser| fundraiser.status)
    }

    pub fn pledge(&self, id: &PledgeId) -> Option<Pledge> {
        self.state()
            .pledges
            .iter()
            .find_map(|stored| match &stored.record {
                PledgeRecord::Valid(pledge) if &pledge.id == id => Some(pledge.clone()),
                _ => None,
            })
    }
}

fn is_member(state: &State, team: &TeamId, player: &PlayerId) -> bool {
    state
        .rosters
        .get(team)
        .is_some_and(|roster| roster.contains(player))
}

#[async_trait]
impl FundraiserStore for InMemoryStore {
    async fn insert_fundraiser(
        &self,
        fundraiser: NewFundraiser,
    ) -> Result<Fundraiser, RepositoryError> {
        let record = Fundraiser {
            id: FundraiserId(self.next_id("fr")),
            owner: fundraiser.owner,
            team_id: fundraiser.team_id,
            title: fundraiser.title,
            starts_on: fundraiser.starts_on,
            ends_on: fundraiser.ends_on,
            goal_amount: fundraiser.goal_amount,
            estimated_levels: fundraiser.estimated_levels,
            status: FundraiserStatus::Active,
            created_by: fundraiser.created_by,
            created_at: fundraiser.created_at,
        };
        self.state().fundraisers.push(record.clone());
        Ok(record)
    }

    async fn delete_fundraiser(&self, id: &FundraiserId) -> Result<(), RepositoryError> {
        let mut state = self.state();
        state.fundraisers.retain(|fundraiser| &fundraiser.id != id);
        state.progress.retain(|row| &row.fundraiser_id != id);
        Ok(())
    }

    async fn fetch_fundraiser(
        &self,
        id: &FundraiserId,
    ) -> Result<Option<Fundraiser>, RepositoryError> {
        Ok(self
            .state()
            .fundraisers
            .iter()
            .find(|fundraiser| &fundraiser.id == id)
            .cloned())
    }

    async fn active_fundraisers_for_player(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<Fundraiser>, RepositoryError> {
        let state = self.state();
        Ok(state
            .fundraisers
            .iter()
            .filter(|fundraiser| fundraiser.status == FundraiserStatus::Active)
            .filter(|fundraiser| match &fundraiser.owner {
                FundraiserOwner::Player(owner) => owner == player,
                FundraiserOwner::Team(team) => is_member(&state, team, player),
            })
            .cloned()
            .collect())
    }

    async fn overdue_active(&self, today: NaiveDate) -> Result<Vec<Fundraiser>, RepositoryError> {
        Ok(self
            .state()
            .fundraisers
            .iter()
            .filter(|fundraiser| fundraiser.is_overdue(today))
            .cloned()
            .collect())
    }

    async fn claim_for_settlement(&self, id: &FundraiserId) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        match state
            .fundraisers
            .iter_mut()
            .find(|fundraiser| &fundraiser.id == id)
        {
            Some(fundraiser) if fundraiser.status == FundraiserStatus::Active => {
                fundraiser.status = FundraiserStatus::Ended;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, id: &FundraiserId) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        match state
            .fundraisers
            .iter_mut()
            .find(|fundraiser| &fundraiser.id == id)
        {
            Some(fundraiser) if fundraiser.status == FundraiserStatus::Ended => {
                fundraiser.status = FundraiserStatus::Active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn team_roster(&self, team: &TeamId) -> Result<Vec<PlayerProfile>, RepositoryError> {
        let state = self.state();
        Ok(state
            .rosters
            .get(team)
            .map(|roster| {
                roster
                    .iter()
                    .filter_map(|player| state.players.get(player).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn player_profile(
        &self,
        player: &PlayerId,
    ) -> Result<Option<PlayerProfile>, RepositoryError> {
        Ok(self.state().players.get(player).cloned())
    }

    async fn insert_progress(&self, rows: Vec<FundraiserProgress>) -> Result<(), RepositoryError> {
        let mut state = self.state();
        let duplicate = rows.iter().any(|row| {
            state.progress.iter().any(|existing| {
                existing.fundraiser_id == row.fundraiser_id && existing.player.id == row.player.id
            })
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        state.progress.extend(rows);
        Ok(())
    }

    async fn fetch_progress(
        &self,
        fundraiser: &FundraiserId,
        player: &PlayerId,
    ) -> Result<Option<FundraiserProgress>, RepositoryError> {
        Ok(self
            .state()
            .progress
            .iter()
            .find(|row| &row.fundraiser_id == fundraiser && &row.player.id == player)
            .cloned())
    }

    async fn save_progress(&self, row: &FundraiserProgress) -> Result<(), RepositoryError> {
        let mut state = self.state();
        let existing = state
            .progress
            .iter_mut()
            .find(|existing| {
                existing.fundraiser_id == row.fundraiser_id && existing.player.id == row.player.id
            })
            .ok_or(RepositoryError::NotFound)?;
        *existing = row.clone();
        Ok(())
    }

    async fn progress_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<FundraiserProgress>, RepositoryError> {
        Ok(self
            .state()
            .progress
            .iter()
            .filter(|row| &row.fundraiser_id == fundraiser)
            .cloned()
            .collect())
    }

    async fn insert_pledge(&self, pledge: NewPledge) -> Result<Pledge, RepositoryError> {
        let record = Pledge {
            id: PledgeId(self.next_id("pl")),
            fundraiser_id: pledge.fundraiser_id,
            donor: pledge.donor,
            target_player: pledge.target_player,
            terms: pledge.terms,
            final_amount_owed: None,
            payment_status: PaymentStatus::Unpaid,
            created_at: pledge.created_at,
        };
        self.state().pledges.push(StoredPledge {
            fundraiser_id: record.fundraiser_id.clone(),
            record: PledgeRecord::Valid(record.clone()),
        });
        Ok(record)
    }

    async fn pledges_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<PledgeRecord>, RepositoryError> {
        Ok(self
            .state()
            .pledges
            .iter()
            .filter(|stored| &stored.fundraiser_id == fundraiser)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn record_final_amount(
        &self,
        pledge: &PledgeId,
        amount: Decimal,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        for stored in state.pledges.iter_mut() {
            if let PledgeRecord::Valid(record) = &mut stored.record {
                if &record.id == pledge {
                    if record.final_amount_owed.is_some() {
                        return Ok(false);
                    }
                    record.final_amount_owed = Some(amount);
                    return Ok(true);
                }
            }
        }
        Err(RepositoryError::NotFound)
    }
}

#[async_trait]
impl PointsLedger for InMemoryStore {
    async fn points_earned(
        &self,
        player: &PlayerId,
        team: &TeamId,
        window: PointsWindow,
    ) -> Result<u64, RepositoryError> {
        Ok(self
            .state()
            .completions
            .iter()
            .filter(|completion| &completion.player == player && &completion.team == team)
            .filter(|completion| window.contains(completion.completed_at))
            .fold(0u64, |total, completion| {
                total.saturating_add(completion.points)
            }))
    }
}
