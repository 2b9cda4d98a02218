use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::domain::{PlayerId, TeamId};
use super::repository::RepositoryError;

/// Half-open time window `[from, until)`; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointsWindow {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl PointsWindow {
    pub const fn all_time() -> Self {
        Self {
            from: None,
            until: None,
        }
    }

    pub const fn until(until: DateTime<Utc>) -> Self {
        Self {
            from: None,
            until: Some(until),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.until.map_or(true, |until| at < until)
    }
}

/// Read side of the drill-completion records owned by the data store.
#[async_trait]
pub trait PointsLedger: Send + Sync {
    /// Total points `player` earned for `team` inside `window`.
    async fn points_earned(
        &self,
        player: &PlayerId,
        team: &TeamId,
        window: PointsWindow,
    ) -> Result<u64, RepositoryError>;
}
