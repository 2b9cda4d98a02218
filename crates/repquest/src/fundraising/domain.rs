use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::levels::level_for;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for fundraising campaigns.
    FundraiserId
);
string_id!(
    /// Identifier wrapper for players.
    PlayerId
);
string_id!(TeamId);
string_id!(PledgeId);

/// Whose fundraiser this is. Determines the `player` | `team` type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum FundraiserOwner {
    Player(PlayerId),
    Team(TeamId),
}

impl FundraiserOwner {
    pub const fn kind(&self) -> FundraiserKind {
        match self {
            FundraiserOwner::Player(_) => FundraiserKind::Player,
            FundraiserOwner::Team(_) => FundraiserKind::Team,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundraiserKind {
    Player,
    Team,
}

impl FundraiserKind {
    pub const fn label(self) -> &'static str {
        match self {
            FundraiserKind::Player => "player",
            FundraiserKind::Team => "team",
        }
    }
}

/// Lifecycle of a fundraiser. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundraiserStatus {
    Active,
    Ended,
}

impl FundraiserStatus {
    pub const fn label(self) -> &'static str {
        match self {
            FundraiserStatus::Active => "active",
            FundraiserStatus::Ended => "ended",
        }
    }
}

/// Advisory level estimate shown to donors when they pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRange {
    pub min: u64,
    pub max: u64,
}

/// Person reachable by e-mail (fundraiser creator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fundraiser {
    pub id: FundraiserId,
    pub owner: FundraiserOwner,
    pub team_id: TeamId,
    pub title: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_levels: Option<LevelRange>,
    pub status: FundraiserStatus,
    pub created_by: Contact,
    pub created_at: DateTime<Utc>,
}

impl Fundraiser {
    pub const fn kind(&self) -> FundraiserKind {
        self.owner.kind()
    }

    /// Window is inclusive on both ends.
    pub fn is_open_on(&self, day: NaiveDate) -> bool {
        self.starts_on <= day && day <= self.ends_on
    }

    /// Eligible for the settlement sweep: still active and closed strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == FundraiserStatus::Active && self.ends_on < today
    }
}

/// Fundraiser as submitted for creation, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFundraiser {
    pub owner: FundraiserOwner,
    pub team_id: TeamId,
    pub title: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub goal_amount: Option<Decimal>,
    pub estimated_levels: Option<LevelRange>,
    pub created_by: Contact,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Per-participant progress row for one fundraiser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundraiserProgress {
    pub fundraiser_id: FundraiserId,
    pub player: PlayerProfile,
    pub starting_points: u64,
    pub starting_level: u64,
    pub current_points: u64,
    pub current_level: u64,
    pub fundraiser_points: u64,
    pub fundraiser_levels: u64,
    pub updated_at: DateTime<Utc>,
}

/// Level movement produced by applying a points event to a progress row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelChange {
    pub previous_levels: u64,
    pub levels: u64,
}

impl LevelChange {
    pub const fn leveled_up(&self) -> bool {
        self.levels > self.previous_levels
    }
}

impl FundraiserProgress {
    /// Snapshot taken when the fundraiser launches.
    pub fn snapshot(
        fundraiser_id: FundraiserId,
        player: PlayerProfile,
        starting_points: u64,
        at: DateTime<Utc>,
    ) -> Self {
        let starting_level = level_for(starting_points);
        Self {
            fundraiser_id,
            player,
            starting_points,
            starting_level,
            current_points: starting_points,
            current_level: starting_level,
            fundraiser_points: 0,
            fundraiser_levels: 0,
            updated_at: at,
        }
    }

    /// Adds fundraiser-scoped points and recomputes the derived totals.
    pub fn apply_points(&mut self, points: u64, at: DateTime<Utc>) -> LevelChange {
        let previous_levels = self.fundraiser_levels;

        self.fundraiser_points = self.fundraiser_points.saturating_add(points);
        self.fundraiser_levels = previous_levels.max(level_for(self.fundraiser_points));
        self.current_points = self.starting_points.saturating_add(self.fundraiser_points);
        self.current_level = level_for(self.current_points);
        self.updated_at = at;

        LevelChange {
            previous_levels,
            levels: self.fundraiser_levels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donor {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl Donor {
    /// Key used to group a donor's pledges into one statement.
    pub fn grouping_key(&self) -> String {
        self.email.trim().to_ascii_lowercase()
    }
}

/// Monetary terms of a pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pledge_type", rename_all = "snake_case")]
pub enum PledgeTerms {
    Flat {
        amount: Decimal,
    },
    PerLevel {
        amount_per_level: Decimal,
        max_amount: Decimal,
    },
}

impl PledgeTerms {
    pub const fn label(&self) -> &'static str {
        match self {
            PledgeTerms::Flat { .. } => "flat",
            PledgeTerms::PerLevel { .. } => "per_level",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pledge {
    pub id: PledgeId,
    pub fundraiser_id: FundraiserId,
    pub donor: Donor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_player: Option<PlayerId>,
    pub terms: PledgeTerms,
    pub final_amount_owed: Option<Decimal>,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPledge {
    pub fundraiser_id: FundraiserId,
    pub donor: Donor,
    pub target_player: Option<PlayerId>,
    pub terms: PledgeTerms,
    pub created_at: DateTime<Utc>,
}

/// Pledge row as read back from the store. Rows whose terms cannot be decoded
/// are kept so settlement can report and skip them individually.
#[derive(Debug, Clone, PartialEq)]
pub enum PledgeRecord {
    Valid(Pledge),
    Malformed {
        pledge_id: PledgeId,
        fault: super::pledges::PledgeFault,
    },
}

impl PledgeRecord {
    pub fn pledge_id(&self) -> &PledgeId {
        match self {
            PledgeRecord::Valid(pledge) => &pledge.id,
            PledgeRecord::Malformed { pledge_id, .. } => pledge_id,
        }
    }
}
