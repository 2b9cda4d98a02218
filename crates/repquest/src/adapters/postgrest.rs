use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::PostgrestConfig;
use crate::fundraising::domain::{
    Contact, Donor, Fundraiser, FundraiserId, FundraiserOwner, FundraiserProgress,
    FundraiserStatus, LevelRange, NewFundraiser, NewPledge, PaymentStatus, PlayerId,
    PlayerProfile, Pledge, PledgeId, PledgeRecord, PledgeTerms, TeamId,
};
use crate::fundraising::ledger::{PointsLedger, PointsWindow};
use crate::fundraising::pledges::PledgeFault;
use crate::fundraising::repository::{FundraiserStore, RepositoryError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const READ_ATTEMPTS: u32 = 3;
const READ_BACKOFF_MS: u64 = 200;

/// Supabase-backed store speaking PostgREST over HTTPS with the service role key.
#[derive(Clone)]
pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl PostgrestStore {
    pub fn new(config: &PostgrestConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        table: &str,
        request: RequestBuilder,
    ) -> Result<T, RepositoryError> {
        let response = request
            .send()
            .await
            .map_err(|err| RepositoryError::Unavailable(format!("{table}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::CONFLICT => RepositoryError::Conflict,
                StatusCode::NOT_FOUND => RepositoryError::NotFound,
                _ => RepositoryError::Unavailable(format!("{table} returned {status}: {body}")),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| RepositoryError::Decode(format!("{table}: {err}")))
    }

    /// Reads are idempotent, so transport failures are retried with linear backoff.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, RepositoryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = self.request(Method::GET, table).query(query);
            match self.execute::<Vec<T>>(table, request).await {
                Ok(rows) => return Ok(rows),
                Err(RepositoryError::Unavailable(reason)) if attempt < READ_ATTEMPTS => {
                    warn!(table, attempt, reason = %reason, "postgrest read failed, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        READ_BACKOFF_MS.saturating_mul(u64::from(attempt)),
                    ))
                    .await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<Vec<T>, RepositoryError> {
        let request = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(body);
        self.execute(table, request).await
    }

    /// Conditional update; returns how many rows matched the filter.
    async fn update(
        &self,
        table: &str,
        filter: &[(&str, String)],
        body: serde_json::Value,
    ) -> Result<usize, RepositoryError> {
        let request = self
            .request(Method::PATCH, table)
            .query(filter)
            .header("Prefer", "return=representation")
            .json(&body);
        let rows: Vec<serde_json::Value> = self.execute(table, request).await?;
        debug!(table, affected = rows.len(), "postgrest conditional update");
        Ok(rows.len())
    }

    async fn fundraisers(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<Fundraiser>, RepositoryError> {
        let rows: Vec<serde_json::Value> = self.select("fundraisers", query).await?;
        Ok(decode_fundraiser_rows(rows))
    }

    async fn players(&self, ids: &[String]) -> Result<Vec<PlayerProfile>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<PlayerRow> = self
            .select(
                "players",
                &[
                    ("select", "id,display_name,email".to_string()),
                    ("id", format!("in.({})", in_list(ids))),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(PlayerProfile::from).collect())
    }
}

/// Decodes fundraiser rows one at a time; a row that cannot be decoded is
/// logged and skipped so it cannot hide the rest of the batch.
fn decode_fundraiser_rows(rows: Vec<serde_json::Value>) -> Vec<Fundraiser> {
    rows.into_iter()
        .filter_map(|value| {
            let id = row_id(&value);
            let decoded = serde_json::from_value::<FundraiserRow>(value)
                .map_err(|err| RepositoryError::Decode(err.to_string()))
                .and_then(Fundraiser::try_from);
            match decoded {
                Ok(fundraiser) => Some(fundraiser),
                Err(err) => {
                    warn!(fundraiser_id = %id, error = %err, "skipping undecodable fundraiser row");
                    None
                }
            }
        })
        .collect()
}

/// Decodes pledge rows one at a time. Rows that do not fit the pledge shape
/// come back as malformed records instead of failing the whole read.
fn decode_pledge_rows(rows: Vec<serde_json::Value>) -> Vec<PledgeRecord> {
    rows.into_iter()
        .map(|value| {
            let id = row_id(&value);
            match serde_json::from_value::<PledgeRow>(value) {
                Ok(row) => PledgeRecord::from(row),
                Err(err) => PledgeRecord::Malformed {
                    pledge_id: PledgeId(id),
                    fault: PledgeFault::Undecodable(err.to_string()),
                },
            }
        })
        .collect()
}

fn row_id(value: &serde_json::Value) -> String {
    match value.get("id") {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

fn claim_filter(id: &FundraiserId) -> Vec<(&'static str, String)> {
    vec![
        ("id", format!("eq.{id}")),
        ("status", format!("eq.{}", FundraiserStatus::Active.label())),
    ]
}

fn release_filter(id: &FundraiserId) -> Vec<(&'static str, String)> {
    vec![
        ("id", format!("eq.{id}")),
        ("status", format!("eq.{}", FundraiserStatus::Ended.label())),
    ]
}

fn final_amount_filter(pledge: &PledgeId) -> Vec<(&'static str, String)> {
    vec![
        ("id", format!("eq.{pledge}")),
        ("final_amount_owed", "is.null".to_string()),
    ]
}

/// Quotes values for a PostgREST `in.(...)` filter.
fn in_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| format!("\"{}\"", value.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FundraiserRow {
    #[serde(default, skip_serializing)]
    id: String,
    fundraiser_type: String,
    #[serde(default)]
    player_id: Option<String>,
    team_id: String,
    title: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    goal_amount: Option<Decimal>,
    #[serde(default)]
    estimated_min_levels: Option<u64>,
    #[serde(default)]
    estimated_max_levels: Option<u64>,
    status: String,
    created_by_name: String,
    created_by_email: String,
    #[serde(default)]
    created_by_account_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<&NewFundraiser> for FundraiserRow {
    fn from(value: &NewFundraiser) -> Self {
        let (fundraiser_type, player_id) = match &value.owner {
            FundraiserOwner::Player(player) => ("player", Some(player.0.clone())),
            FundraiserOwner::Team(_) => ("team", None),
        };
        Self {
            id: String::new(),
            fundraiser_type: fundraiser_type.to_string(),
            player_id,
            team_id: value.team_id.0.clone(),
            title: value.title.clone(),
            start_date: value.starts_on,
            end_date: value.ends_on,
            goal_amount: value.goal_amount,
            estimated_min_levels: value.estimated_levels.map(|range| range.min),
            estimated_max_levels: value.estimated_levels.map(|range| range.max),
            status: FundraiserStatus::Active.label().to_string(),
            created_by_name: value.created_by.name.clone(),
            created_by_email: value.created_by.email.clone(),
            created_by_account_id: value.created_by.account_id.clone(),
            created_at: value.created_at,
        }
    }
}

impl TryFrom<FundraiserRow> for Fundraiser {
    type Error = RepositoryError;

    fn try_from(row: FundraiserRow) -> Result<Self, Self::Error> {
        let owner = match (row.fundraiser_type.as_str(), row.player_id) {
            ("player", Some(player)) => FundraiserOwner::Player(PlayerId(player)),
            ("team", _) => FundraiserOwner::Team(TeamId(row.team_id.clone())),
            (other, _) => {
                return Err(RepositoryError::Decode(format!(
                    "fundraiser {} has unusable type '{other}'",
                    row.id
                )))
            }
        };
        let status = match row.status.as_str() {
            "active" => FundraiserStatus::Active,
            "ended" => FundraiserStatus::Ended,
            other => {
                return Err(RepositoryError::Decode(format!(
                    "fundraiser {} has unknown status '{other}'",
                    row.id
                )))
            }
        };
        let estimated_levels = match (row.estimated_min_levels, row.estimated_max_levels) {
            (Some(min), Some(max)) => Some(LevelRange { min, max }),
            _ => None,
        };

        Ok(Fundraiser {
            id: FundraiserId(row.id),
            owner,
            team_id: TeamId(row.team_id),
            title: row.title,
            starts_on: row.start_date,
            ends_on: row.end_date,
            goal_amount: row.goal_amount,
            estimated_levels,
            status,
            created_by: Contact {
                name: row.created_by_name,
                email: row.created_by_email,
                account_id: row.created_by_account_id,
            },
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PlayerRow {
    id: String,
    display_name: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<PlayerRow> for PlayerProfile {
    fn from(row: PlayerRow) -> Self {
        Self {
            id: PlayerId(row.id),
            display_name: row.display_name,
            email: row.email.filter(|email| !email.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RosterRow {
    team_id: String,
    player_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressRow {
    fundraiser_id: String,
    player_id: String,
    player_name: String,
    #[serde(default)]
    player_email: Option<String>,
    starting_points: u64,
    starting_level: u64,
    current_points: u64,
    current_level: u64,
    fundraiser_points: u64,
    fundraiser_levels: u64,
    updated_at: DateTime<Utc>,
}

impl From<&FundraiserProgress> for ProgressRow {
    fn from(row: &FundraiserProgress) -> Self {
        Self {
            fundraiser_id: row.fundraiser_id.0.clone(),
            player_id: row.player.id.0.clone(),
            player_name: row.player.display_name.clone(),
            player_email: row.player.email.clone(),
            starting_points: row.starting_points,
            starting_level: row.starting_level,
            current_points: row.current_points,
            current_level: row.current_level,
            fundraiser_points: row.fundraiser_points,
            fundraiser_levels: row.fundraiser_levels,
            updated_at: row.updated_at,
        }
    }
}

impl From<ProgressRow> for FundraiserProgress {
    fn from(row: ProgressRow) -> Self {
        Self {
            fundraiser_id: FundraiserId(row.fundraiser_id),
            player: PlayerProfile {
                id: PlayerId(row.player_id),
                display_name: row.player_name,
                email: row.player_email,
            },
            starting_points: row.starting_points,
            starting_level: row.starting_level,
            current_points: row.current_points,
            current_level: row.current_level,
            fundraiser_points: row.fundraiser_points,
            fundraiser_levels: row.fundraiser_levels,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PledgeRow {
    #[serde(default, skip_serializing)]
    id: String,
    fundraiser_id: String,
    donor_name: String,
    donor_email: String,
    #[serde(default)]
    donor_account_id: Option<String>,
    #[serde(default)]
    target_player_id: Option<String>,
    pledge_type: String,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    amount_per_level: Option<Decimal>,
    #[serde(default)]
    max_amount: Option<Decimal>,
    #[serde(default)]
    final_amount_owed: Option<Decimal>,
    payment_status: String,
    created_at: DateTime<Utc>,
}

impl From<&NewPledge> for PledgeRow {
    fn from(pledge: &NewPledge) -> Self {
        let (amount, amount_per_level, max_amount) = match pledge.terms {
            PledgeTerms::Flat { amount } => (Some(amount), None, None),
            PledgeTerms::PerLevel {
                amount_per_level,
                max_amount,
            } => (None, Some(amount_per_level), Some(max_amount)),
        };
        Self {
            id: String::new(),
            fundraiser_id: pledge.fundraiser_id.0.clone(),
            donor_name: pledge.donor.name.clone(),
            donor_email: pledge.donor.email.clone(),
            donor_account_id: pledge.donor.account_id.clone(),
            target_player_id: pledge.target_player.as_ref().map(|player| player.0.clone()),
            pledge_type: pledge.terms.label().to_string(),
            amount,
            amount_per_level,
            max_amount,
            final_amount_owed: None,
            payment_status: PaymentStatus::Unpaid.label().to_string(),
            created_at: pledge.created_at,
        }
    }
}

impl From<PledgeRow> for PledgeRecord {
    fn from(row: PledgeRow) -> Self {
        let terms = match PledgeTerms::from_columns(
            &row.pledge_type,
            row.amount,
            row.amount_per_level,
            row.max_amount,
        ) {
            Ok(terms) => terms,
            Err(fault) => {
                return PledgeRecord::Malformed {
                    pledge_id: PledgeId(row.id),
                    fault,
                }
            }
        };
        let payment_status = if row.payment_status.eq_ignore_ascii_case("paid") {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Unpaid
        };

        PledgeRecord::Valid(Pledge {
            id: PledgeId(row.id),
            fundraiser_id: FundraiserId(row.fundraiser_id),
            donor: Donor {
                name: row.donor_name,
                email: row.donor_email,
                account_id: row.donor_account_id,
            },
            target_player: row.target_player_id.map(PlayerId),
            terms,
            final_amount_owed: row.final_amount_owed,
            payment_status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionRow {
    points_earned: u64,
}

fn first<T>(rows: Vec<T>, table: &str) -> Result<T, RepositoryError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| RepositoryError::Decode(format!("{table}: insert returned no rows")))
}

#[async_trait]
impl FundraiserStore for PostgrestStore {
    async fn insert_fundraiser(
        &self,
        fundraiser: NewFundraiser,
    ) -> Result<Fundraiser, RepositoryError> {
        let rows: Vec<FundraiserRow> = self
            .insert("fundraisers", &FundraiserRow::from(&fundraiser))
            .await?;
        Fundraiser::try_from(first(rows, "fundraisers")?)
    }

    async fn delete_fundraiser(&self, id: &FundraiserId) -> Result<(), RepositoryError> {
        let progress = self
            .request(Method::DELETE, "fundraiser_progress")
            .query(&[("fundraiser_id", format!("eq.{id}"))])
            .header("Prefer", "return=representation");
        let _: Vec<serde_json::Value> = self.execute("fundraiser_progress", progress).await?;
        let fundraiser = self
            .request(Method::DELETE, "fundraisers")
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation");
        let _: Vec<serde_json::Value> = self.execute("fundraisers", fundraiser).await?;
        Ok(())
    }

    async fn fetch_fundraiser(
        &self,
        id: &FundraiserId,
    ) -> Result<Option<Fundraiser>, RepositoryError> {
        Ok(self
            .fundraisers(&[("id", format!("eq.{id}"))])
            .await?
            .into_iter()
            .next())
    }

    async fn active_fundraisers_for_player(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<Fundraiser>, RepositoryError> {
        let mut active = self
            .fundraisers(&[
                ("status", "eq.active".to_string()),
                ("fundraiser_type", "eq.player".to_string()),
                ("player_id", format!("eq.{player}")),
            ])
            .await?;

        let teams: Vec<String> = self
            .select::<RosterRow>(
                "team_roster",
                &[
                    ("select", "team_id,player_id".to_string()),
                    ("player_id", format!("eq.{player}")),
                ],
            )
            .await?
            .into_iter()
            .map(|row| row.team_id)
            .collect();

        if !teams.is_empty() {
            active.extend(
                self.fundraisers(&[
                    ("status", "eq.active".to_string()),
                    ("fundraiser_type", "eq.team".to_string()),
                    ("team_id", format!("in.({})", in_list(&teams))),
                ])
                .await?,
            );
        }
        Ok(active)
    }

    async fn overdue_active(&self, today: NaiveDate) -> Result<Vec<Fundraiser>, RepositoryError> {
        self.fundraisers(&[
            ("status", "eq.active".to_string()),
            ("end_date", format!("lt.{today}")),
            ("order", "end_date.asc".to_string()),
        ])
        .await
    }

    async fn claim_for_settlement(&self, id: &FundraiserId) -> Result<bool, RepositoryError> {
        let affected = self
            .update(
                "fundraisers",
                &claim_filter(id),
                json!({ "status": FundraiserStatus::Ended.label() }),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn release_claim(&self, id: &FundraiserId) -> Result<bool, RepositoryError> {
        let affected = self
            .update(
                "fundraisers",
                &release_filter(id),
                json!({ "status": FundraiserStatus::Active.label() }),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn team_roster(&self, team: &TeamId) -> Result<Vec<PlayerProfile>, RepositoryError> {
        let ids: Vec<String> = self
            .select::<RosterRow>(
                "team_roster",
                &[
                    ("select", "team_id,player_id".to_string()),
                    ("team_id", format!("eq.{team}")),
                ],
            )
            .await?
            .into_iter()
            .map(|row| row.player_id)
            .collect();
        self.players(&ids).await
    }

    async fn player_profile(
        &self,
        player: &PlayerId,
    ) -> Result<Option<PlayerProfile>, RepositoryError> {
        Ok(self.players(&[player.0.clone()]).await?.into_iter().next())
    }

    async fn insert_progress(&self, rows: Vec<FundraiserProgress>) -> Result<(), RepositoryError> {
        if rows.is_empty() {
            return Ok(());
        }
        let body: Vec<ProgressRow> = rows.iter().map(ProgressRow::from).collect();
        let _: Vec<serde_json::Value> = self.insert("fundraiser_progress", &body).await?;
        Ok(())
    }

    async fn fetch_progress(
        &self,
        fundraiser: &FundraiserId,
        player: &PlayerId,
    ) -> Result<Option<FundraiserProgress>, RepositoryError> {
        let rows: Vec<ProgressRow> = self
            .select(
                "fundraiser_progress",
                &[
                    ("fundraiser_id", format!("eq.{fundraiser}")),
                    ("player_id", format!("eq.{player}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(FundraiserProgress::from))
    }

    async fn save_progress(&self, row: &FundraiserProgress) -> Result<(), RepositoryError> {
        let affected = self
            .update(
                "fundraiser_progress",
                &[
                    ("fundraiser_id", format!("eq.{}", row.fundraiser_id)),
                    ("player_id", format!("eq.{}", row.player.id)),
                ],
                json!({
                    "current_points": row.current_points,
                    "current_level": row.current_level,
                    "fundraiser_points": row.fundraiser_points,
                    "fundraiser_levels": row.fundraiser_levels,
                    "updated_at": row.updated_at,
                }),
            )
            .await?;
        if affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn progress_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<FundraiserProgress>, RepositoryError> {
        let rows: Vec<ProgressRow> = self
            .select(
                "fundraiser_progress",
                &[
                    ("fundraiser_id", format!("eq.{fundraiser}")),
                    ("order", "player_name.asc".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(FundraiserProgress::from).collect())
    }

    async fn insert_pledge(&self, pledge: NewPledge) -> Result<Pledge, RepositoryError> {
        let rows: Vec<PledgeRow> = self
            .insert("fundraiser_pledges", &PledgeRow::from(&pledge))
            .await?;
        match PledgeRecord::from(first(rows, "fundraiser_pledges")?) {
            PledgeRecord::Valid(stored) => Ok(stored),
            PledgeRecord::Malformed { pledge_id, fault } => Err(RepositoryError::Decode(format!(
                "pledge {pledge_id} stored with invalid terms: {fault}"
            ))),
        }
    }

    async fn pledges_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<PledgeRecord>, RepositoryError> {
        let rows: Vec<serde_json::Value> = self
            .select(
                "fundraiser_pledges",
                &[
                    ("fundraiser_id", format!("eq.{fundraiser}")),
                    ("order", "created_at.asc".to_string()),
                ],
            )
            .await?;
        Ok(decode_pledge_rows(rows))
    }

    async fn record_final_amount(
        &self,
        pledge: &PledgeId,
        amount: Decimal,
    ) -> Result<bool, RepositoryError> {
        let affected = self
            .update(
                "fundraiser_pledges",
                &final_amount_filter(pledge),
                json!({ "final_amount_owed": amount }),
            )
            .await?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl PointsLedger for PostgrestStore {
    async fn points_earned(
        &self,
        player: &PlayerId,
        team: &TeamId,
        window: PointsWindow,
    ) -> Result<u64, RepositoryError> {
        let mut query = vec![
            ("select", "points_earned".to_string()),
            ("player_id", format!("eq.{player}")),
            ("team_id", format!("eq.{team}")),
        ];
        if let Some(from) = window.from {
            query.push(("completed_at", format!("gte.{}", from.to_rfc3339())));
        }
        if let Some(until) = window.until {
            query.push(("completed_at", format!("lt.{}", until.to_rfc3339())));
        }

        let rows: Vec<CompletionRow> = self.select("drill_completions", &query).await?;
        Ok(rows
            .iter()
            .fold(0u64, |total, row| total.saturating_add(row.points_earned)))
    }
}
