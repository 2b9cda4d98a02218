use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::domain::{Fundraiser, FundraiserId, FundraiserProgress, LevelChange, PlayerId};
use super::notify::{LevelUpNotice, Notification, NotificationOutbox};
use super::repository::{FundraiserStore, RepositoryError};

/// Applies points-earning events to the fundraisers a player takes part in.
pub struct ProgressTracker {
    store: Arc<dyn FundraiserStore>,
    clock: Arc<dyn Clock>,
    outbox: NotificationOutbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub fundraiser_id: FundraiserId,
    pub previous_levels: u64,
    pub levels: u64,
    pub fundraiser_points: u64,
    pub leveled_up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Fundraiser opens later.
    NotStarted,
    /// Close date has passed; the fundraiser is waiting for settlement.
    WindowClosed,
    /// Player joined after launch and has no progress row.
    NoProgressRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSkip {
    pub fundraiser_id: FundraiserId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressFailure {
    pub fundraiser_id: FundraiserId,
    pub error: String,
}

/// Per-fundraiser outcome of one points event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub player_id: PlayerId,
    pub points_earned: u64,
    pub updated: Vec<ProgressUpdate>,
    pub skipped: Vec<ProgressSkip>,
    pub failed: Vec<ProgressFailure>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("points earned must not be negative, got {0}")]
    NegativePoints(i64),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

enum Applied {
    Updated(ProgressUpdate),
    Skipped(SkipReason),
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn FundraiserStore>,
        clock: Arc<dyn Clock>,
        outbox: NotificationOutbox,
    ) -> Self {
        Self {
            store,
            clock,
            outbox,
        }
    }

    /// Records `points_earned` for `player` against every active fundraiser
    /// they participate in. A failure on one fundraiser is reported and does
    /// not stop the others.
    pub async fn record_points(
        &self,
        player: &PlayerId,
        points_earned: i64,
    ) -> Result<ProgressReport, ProgressError> {
        let points =
            u64::try_from(points_earned).map_err(|_| ProgressError::NegativePoints(points_earned))?;

        let fundraisers = self.store.active_fundraisers_for_player(player).await?;
        let mut report = ProgressReport {
            player_id: player.clone(),
            points_earned: points,
            updated: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        };

        for fundraiser in fundraisers {
            match self.apply(&fundraiser, player, points).await {
                Ok(Applied::Updated(update)) => report.updated.push(update),
                Ok(Applied::Skipped(reason)) => {
                    debug!(
                        fundraiser_id = %fundraiser.id,
                        player_id = %player,
                        ?reason,
                        "skipping fundraiser progress update"
                    );
                    report.skipped.push(ProgressSkip {
                        fundraiser_id: fundraiser.id.clone(),
                        reason,
                    });
                }
                Err(err) => {
                    warn!(
                        fundraiser_id = %fundraiser.id,
                        player_id = %player,
                        error = %err,
                        "fundraiser progress update failed"
                    );
                    report.failed.push(ProgressFailure {
                        fundraiser_id: fundraiser.id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn apply(
        &self,
        fundraiser: &Fundraiser,
        player: &PlayerId,
        points: u64,
    ) -> Result<Applied, RepositoryError> {
        let now = self.clock.now();
        let today = now.date_naive();
        if today < fundraiser.starts_on {
            return Ok(Applied::Skipped(SkipReason::NotStarted));
        }
        if today > fundraiser.ends_on {
            return Ok(Applied::Skipped(SkipReason::WindowClosed));
        }

        let Some(mut row) = self.store.fetch_progress(&fundraiser.id, player).await? else {
            return Ok(Applied::Skipped(SkipReason::NoProgressRow));
        };

        let change = row.apply_points(points, now);
        self.store.save_progress(&row).await?;

        if change.leveled_up() {
            self.announce_level_up(fundraiser, &row, change);
        }

        Ok(Applied::Updated(ProgressUpdate {
            fundraiser_id: fundraiser.id.clone(),
            previous_levels: change.previous_levels,
            levels: change.levels,
            fundraiser_points: row.fundraiser_points,
            leveled_up: change.leveled_up(),
        }))
    }

    fn announce_level_up(
        &self,
        fundraiser: &Fundraiser,
        row: &FundraiserProgress,
        change: LevelChange,
    ) {
        let Some(recipient) = row.player.email.clone() else {
            debug!(
                fundraiser_id = %fundraiser.id,
                player_id = %row.player.id,
                "player has no e-mail on file; level-up not announced"
            );
            return;
        };

        let notice = Notification::LevelUp(LevelUpNotice {
            recipient,
            fundraiser_id: fundraiser.id.clone(),
            fundraiser_title: fundraiser.title.clone(),
            player_name: row.player.display_name.clone(),
            levels: change.levels,
            fundraiser_points: row.fundraiser_points,
        });

        match self.outbox.enqueue(notice) {
            Ok(()) => info!(
                fundraiser_id = %fundraiser.id,
                player_id = %row.player.id,
                levels = change.levels,
                "player leveled up"
            ),
            Err(err) => warn!(
                fundraiser_id = %fundraiser.id,
                player_id = %row.player.id,
                error = %err,
                "level-up notification dropped"
            ),
        }
    }
}
