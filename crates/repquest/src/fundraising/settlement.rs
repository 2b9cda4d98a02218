use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use super::clock::Clock;
use super::domain::{
    Fundraiser, FundraiserId, FundraiserProgress, FundraiserStatus, Pledge, PledgeId, PledgeRecord,
};
use super::export::export_rows;
use super::notify::{
    DonorStatement, Notification, NotificationOutbox, OwnerSummary, StatementLine,
};
use super::pledges::{amount_owed, LevelBasis, MissingProgressPolicy};
use super::repository::{FundraiserStore, RepositoryError};

/// Closes overdue fundraisers: claims each one, freezes its levels, writes
/// every pledge's final amount once and then queues donor and owner mail.
pub struct SettlementEngine {
    store: Arc<dyn FundraiserStore>,
    clock: Arc<dyn Clock>,
    outbox: NotificationOutbox,
    policy: MissingProgressPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedPledge {
    pub pledge_id: PledgeId,
    pub reason: String,
}

/// Financial result for one fundraiser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundraiserSettlement {
    pub fundraiser_id: FundraiserId,
    pub total_levels: u64,
    pub pledges_settled: usize,
    pub excluded: Vec<ExcludedPledge>,
    pub total_owed: Decimal,
    pub donors_notified: usize,
    pub owner_notified: bool,
    pub notifications_dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Settled(FundraiserSettlement),
    /// Another run flipped the status first; nothing was written or sent.
    AlreadyClaimed { fundraiser_id: FundraiserId },
    AlreadyEnded { fundraiser_id: FundraiserId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementFailure {
    pub fundraiser_id: FundraiserId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub run_on: NaiveDate,
    pub examined: usize,
    pub settled: Vec<FundraiserSettlement>,
    pub already_claimed: Vec<FundraiserId>,
    pub failed: Vec<SettlementFailure>,
}

impl SweepReport {
    pub fn notifications_queued(&self) -> usize {
        self.settled
            .iter()
            .map(|settlement| settlement.donors_notified + usize::from(settlement.owner_notified))
            .sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("fundraiser {0} not found")]
    NotFound(FundraiserId),
    #[error("fundraiser {fundraiser_id} closes on {ends_on} and cannot be settled on {today}")]
    NotDue {
        fundraiser_id: FundraiserId,
        ends_on: NaiveDate,
        today: NaiveDate,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("settlement of {fundraiser_id} failed after claim (claim released: {released}): {source}")]
    Interrupted {
        fundraiser_id: FundraiserId,
        released: bool,
        #[source]
        source: RepositoryError,
    },
}

struct Computed {
    progress: Vec<FundraiserProgress>,
    basis: LevelBasis,
    pledges: Vec<Pledge>,
    excluded: Vec<ExcludedPledge>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn FundraiserStore>,
        clock: Arc<dyn Clock>,
        outbox: NotificationOutbox,
        policy: MissingProgressPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            outbox,
            policy,
        }
    }

    pub const fn policy(&self) -> MissingProgressPolicy {
        self.policy
    }

    /// Settles every active fundraiser that closed before today. Safe to run
    /// repeatedly and concurrently.
    pub async fn sweep(&self) -> Result<SweepReport, SettlementError> {
        let today = self.clock.today();
        let candidates = self.store.overdue_active(today).await?;
        info!(%today, candidates = candidates.len(), "fundraiser settlement sweep started");

        let mut report = SweepReport {
            run_on: today,
            examined: candidates.len(),
            settled: Vec::new(),
            already_claimed: Vec::new(),
            failed: Vec::new(),
        };

        for fundraiser in candidates {
            match self.settle(&fundraiser).await {
                Ok(FinalizeOutcome::Settled(settlement)) => report.settled.push(settlement),
                Ok(FinalizeOutcome::AlreadyClaimed { fundraiser_id })
                | Ok(FinalizeOutcome::AlreadyEnded { fundraiser_id }) => {
                    report.already_claimed.push(fundraiser_id)
                }
                Err(err) => report.failed.push(SettlementFailure {
                    fundraiser_id: fundraiser.id.clone(),
                    error: err.to_string(),
                }),
            }
        }

        info!(
            %today,
            settled = report.settled.len(),
            already_claimed = report.already_claimed.len(),
            failed = report.failed.len(),
            "fundraiser settlement sweep finished"
        );
        Ok(report)
    }

    /// Manually settles one fundraiser under the same rules as the sweep.
    pub async fn finalize(&self, id: &FundraiserId) -> Result<FinalizeOutcome, SettlementError> {
        let fundraiser = self
            .store
            .fetch_fundraiser(id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(id.clone()))?;

        let today = self.clock.today();
        if !fundraiser.is_overdue(today) {
            if fundraiser.status == FundraiserStatus::Ended {
                return Ok(FinalizeOutcome::AlreadyEnded {
                    fundraiser_id: fundraiser.id,
                });
            }
            return Err(SettlementError::NotDue {
                fundraiser_id: fundraiser.id,
                ends_on: fundraiser.ends_on,
                today,
            });
        }

        self.settle(&fundraiser).await
    }

    async fn settle(&self, fundraiser: &Fundraiser) -> Result<FinalizeOutcome, SettlementError> {
        if !self.store.claim_for_settlement(&fundraiser.id).await? {
            info!(fundraiser_id = %fundraiser.id, "fundraiser already claimed by another run");
            return Ok(FinalizeOutcome::AlreadyClaimed {
                fundraiser_id: fundraiser.id.clone(),
            });
        }

        let computed = match self.compute(fundraiser).await {
            Ok(computed) => computed,
            Err(source) => {
                let released = self.release(&fundraiser.id).await;
                error!(
                    fundraiser_id = %fundraiser.id,
                    released,
                    error = %source,
                    "fundraiser settlement interrupted"
                );
                return Err(SettlementError::Interrupted {
                    fundraiser_id: fundraiser.id.clone(),
                    released,
                    source,
                });
            }
        };

        let settlement = self.notify(fundraiser, &computed);
        info!(
            fundraiser_id = %fundraiser.id,
            total_levels = settlement.total_levels,
            pledges = settlement.pledges_settled,
            excluded = settlement.excluded.len(),
            total_owed = %settlement.total_owed,
            "fundraiser settled"
        );
        Ok(FinalizeOutcome::Settled(settlement))
    }

    async fn release(&self, id: &FundraiserId) -> bool {
        match self.store.release_claim(id).await {
            Ok(released) => released,
            Err(err) => {
                error!(
                    fundraiser_id = %id,
                    error = %err,
                    "could not release settlement claim; fundraiser needs manual settlement"
                );
                false
            }
        }
    }

    /// Writes final amounts and reads the committed pledges back.
    async fn compute(&self, fundraiser: &Fundraiser) -> Result<Computed, RepositoryError> {
        let progress = self.store.progress_for(&fundraiser.id).await?;
        let basis = LevelBasis::from_progress(&progress);
        let mut excluded = Vec::new();

        for record in self.store.pledges_for(&fundraiser.id).await? {
            let pledge = match record {
                PledgeRecord::Valid(pledge) => pledge,
                PledgeRecord::Malformed { pledge_id, fault } => {
                    warn!(
                        fundraiser_id = %fundraiser.id,
                        pledge_id = %pledge_id,
                        fault = %fault,
                        "malformed pledge excluded from settlement"
                    );
                    excluded.push(ExcludedPledge {
                        pledge_id,
                        reason: fault.to_string(),
                    });
                    continue;
                }
            };

            if pledge.final_amount_owed.is_some() {
                continue;
            }

            let owed = basis
                .resolve(pledge.target_player.as_ref(), self.policy)
                .and_then(|levels| amount_owed(&pledge.terms, levels));
            let amount = match owed {
                Ok(amount) => amount,
                Err(fault) => {
                    warn!(
                        fundraiser_id = %fundraiser.id,
                        pledge_id = %pledge.id,
                        fault = %fault,
                        "pledge excluded from settlement"
                    );
                    excluded.push(ExcludedPledge {
                        pledge_id: pledge.id.clone(),
                        reason: fault.to_string(),
                    });
                    continue;
                }
            };

            if !self.store.record_final_amount(&pledge.id, amount).await? {
                warn!(
                    fundraiser_id = %fundraiser.id,
                    pledge_id = %pledge.id,
                    "final amount was already recorded; keeping stored value"
                );
            }
        }

        let pledges = self
            .store
            .pledges_for(&fundraiser.id)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                PledgeRecord::Valid(pledge) => Some(pledge),
                PledgeRecord::Malformed { .. } => None,
            })
            .collect();

        Ok(Computed {
            progress,
            basis,
            pledges,
            excluded,
        })
    }

    fn notify(&self, fundraiser: &Fundraiser, computed: &Computed) -> FundraiserSettlement {
        let player_names: HashMap<_, _> = computed
            .progress
            .iter()
            .map(|row| (row.player.id.clone(), row.player.display_name.clone()))
            .collect();

        let mut order: Vec<String> = Vec::new();
        let mut statements: HashMap<String, DonorStatement> = HashMap::new();
        let mut total_owed = Decimal::ZERO;
        let mut pledges_settled = 0;

        for pledge in &computed.pledges {
            let Some(amount) = pledge.final_amount_owed else {
                continue;
            };
            pledges_settled += 1;
            total_owed += amount;

            let levels = computed
                .basis
                .resolve(pledge.target_player.as_ref(), self.policy)
                .unwrap_or(0);
            let line = StatementLine {
                pledge_id: pledge.id.clone(),
                terms: pledge.terms,
                target_player: pledge
                    .target_player
                    .as_ref()
                    .map(|id| player_names.get(id).cloned().unwrap_or_else(|| id.0.clone())),
                levels,
                amount,
            };

            let key = pledge.donor.grouping_key();
            let statement = statements.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                DonorStatement {
                    fundraiser_id: fundraiser.id.clone(),
                    fundraiser_title: fundraiser.title.clone(),
                    donor: pledge.donor.clone(),
                    lines: Vec::new(),
                    total: Decimal::ZERO,
                }
            });
            statement.total += amount;
            statement.lines.push(line);
        }

        let donor_count = order.len();
        let mut donors_notified = 0;
        let mut dropped = 0;
        for key in order {
            let Some(statement) = statements.remove(&key) else {
                continue;
            };
            if self.enqueue(Notification::DonorStatement(statement)) {
                donors_notified += 1;
            } else {
                dropped += 1;
            }
        }

        let summary = OwnerSummary {
            fundraiser_id: fundraiser.id.clone(),
            fundraiser_title: fundraiser.title.clone(),
            recipient: fundraiser.created_by.clone(),
            participant_count: computed.progress.len(),
            total_levels: computed.basis.total(),
            pledge_count: pledges_settled,
            donor_count,
            excluded_pledges: computed.excluded.len(),
            total_owed,
            goal_amount: fundraiser.goal_amount,
            export: export_rows(&computed.pledges, &computed.progress),
        };
        let owner_notified = self.enqueue(Notification::OwnerSummary(summary));
        if !owner_notified {
            dropped += 1;
        }

        FundraiserSettlement {
            fundraiser_id: fundraiser.id.clone(),
            total_levels: computed.basis.total(),
            pledges_settled,
            excluded: computed.excluded.clone(),
            total_owed,
            donors_notified,
            owner_notified,
            notifications_dropped: dropped,
        }
    }

    fn enqueue(&self, notification: Notification) -> bool {
        let kind = notification.label();
        let fundraiser_id = notification.fundraiser_id().clone();
        match self.outbox.enqueue(notification) {
            Ok(()) => true,
            Err(err) => {
                warn!(%fundraiser_id, kind, error = %err, "settlement notification dropped");
                false
            }
        }
    }
}
