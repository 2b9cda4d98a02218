use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{FundraiserProgress, PlayerId, PledgeTerms};

/// Data-integrity problems with a single pledge. Settlement skips the pledge
/// and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PledgeFault {
    #[error("unknown pledge type '{0}'")]
    UnknownType(String),
    #[error("pledge is missing {0}")]
    MissingField(&'static str),
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Decimal },
    #[error("max amount {max_amount} is below the per-level rate {amount_per_level}")]
    CapBelowRate {
        amount_per_level: Decimal,
        max_amount: Decimal,
    },
    #[error("targeted player {0} has no progress on this fundraiser")]
    MissingProgress(PlayerId),
    #[error("pledge row could not be decoded: {0}")]
    Undecodable(String),
}

impl PledgeTerms {
    /// Builds terms from loosely typed storage columns.
    pub fn from_columns(
        pledge_type: &str,
        amount: Option<Decimal>,
        amount_per_level: Option<Decimal>,
        max_amount: Option<Decimal>,
    ) -> Result<Self, PledgeFault> {
        let terms = match pledge_type.trim() {
            "flat" => PledgeTerms::Flat {
                amount: amount.ok_or(PledgeFault::MissingField("amount"))?,
            },
            "per_level" => PledgeTerms::PerLevel {
                amount_per_level: amount_per_level
                    .ok_or(PledgeFault::MissingField("amount_per_level"))?,
                max_amount: max_amount.ok_or(PledgeFault::MissingField("max_amount"))?,
            },
            other => return Err(PledgeFault::UnknownType(other.to_string())),
        };
        terms.validate()?;
        Ok(terms)
    }

    pub fn validate(&self) -> Result<(), PledgeFault> {
        match *self {
            PledgeTerms::Flat { amount } => positive("amount", amount),
            PledgeTerms::PerLevel {
                amount_per_level,
                max_amount,
            } => {
                positive("amount_per_level", amount_per_level)?;
                if max_amount < amount_per_level {
                    return Err(PledgeFault::CapBelowRate {
                        amount_per_level,
                        max_amount,
                    });
                }
                Ok(())
            }
        }
    }
}

fn positive(field: &'static str, value: Decimal) -> Result<(), PledgeFault> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(PledgeFault::NonPositive { field, value })
    }
}

/// Amount a pledge owes at `levels_earned`. Flat pledges ignore levels,
/// per-level pledges are capped at their max amount.
pub fn amount_owed(terms: &PledgeTerms, levels_earned: u64) -> Result<Decimal, PledgeFault> {
    terms.validate()?;
    let owed = match *terms {
        PledgeTerms::Flat { amount } => amount,
        PledgeTerms::PerLevel {
            amount_per_level,
            max_amount,
        } => Decimal::from(levels_earned)
            .checked_mul(amount_per_level)
            .map_or(max_amount, |earned| earned.min(max_amount)),
    };
    Ok(owed)
}

/// What to do with a player-targeted pledge when that player has no progress row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingProgressPolicy {
    /// Skip the pledge as a data-integrity fault.
    #[default]
    Exclude,
    /// Count the pledge against the whole fundraiser's levels.
    FundraiserTotal,
    /// Treat the player as having earned nothing.
    ZeroLevels,
}

impl MissingProgressPolicy {
    pub const fn label(self) -> &'static str {
        match self {
            MissingProgressPolicy::Exclude => "exclude",
            MissingProgressPolicy::FundraiserTotal => "fundraiser_total",
            MissingProgressPolicy::ZeroLevels => "zero_levels",
        }
    }
}

impl FromStr for MissingProgressPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exclude" => Ok(Self::Exclude),
            "fundraiser_total" | "team_total" => Ok(Self::FundraiserTotal),
            "zero_levels" | "zero" => Ok(Self::ZeroLevels),
            other => Err(format!("unknown missing progress policy '{other}'")),
        }
    }
}

/// Frozen or live level counts for one fundraiser, used to pick the level
/// count each pledge is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct LevelBasis {
    per_player: HashMap<PlayerId, u64>,
    total: u64,
}

impl LevelBasis {
    pub fn from_progress(rows: &[FundraiserProgress]) -> Self {
        let per_player: HashMap<PlayerId, u64> = rows
            .iter()
            .map(|row| (row.player.id.clone(), row.fundraiser_levels))
            .collect();
        let total = rows.iter().map(|row| row.fundraiser_levels).sum();
        Self { per_player, total }
    }

    pub const fn total(&self) -> u64 {
        self.total
    }

    pub fn levels_for(&self, player: &PlayerId) -> Option<u64> {
        self.per_player.get(player).copied()
    }

    /// Level count for a pledge, given its optional target player.
    pub fn resolve(
        &self,
        target_player: Option<&PlayerId>,
        policy: MissingProgressPolicy,
    ) -> Result<u64, PledgeFault> {
        let Some(player) = target_player else {
            return Ok(self.total);
        };

        match (self.levels_for(player), policy) {
            (Some(levels), _) => Ok(levels),
            (None, MissingProgressPolicy::FundraiserTotal) => Ok(self.total),
            (None, MissingProgressPolicy::ZeroLevels) => Ok(0),
            (None, MissingProgressPolicy::Exclude) => {
                Err(PledgeFault::MissingProgress(player.clone()))
            }
        }
    }
}

/// Rounds to whole cents and pins the scale to two places for presentation.
pub fn to_cents(amount: Decimal) -> Decimal {
    let mut cents =
        amount.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
    cents.rescale(2);
    cents
}
