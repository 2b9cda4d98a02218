use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::adapters::InMemoryStore;
use crate::fundraising::clock::{Clock, FixedClock};
use crate::fundraising::domain::{
    Contact, Donor, Fundraiser, FundraiserId, FundraiserOwner, FundraiserProgress, NewFundraiser,
    NewPledge, PlayerId, PlayerProfile, Pledge, PledgeId, PledgeRecord, PledgeTerms, TeamId,
};
use crate::fundraising::notify::{
    self, NotificationQueue, NotificationSender, NotifyError, OutboundEmail,
};
use crate::fundraising::ledger::{PointsLedger, PointsWindow};
use crate::fundraising::pledges::MissingProgressPolicy;
use crate::fundraising::repository::{FundraiserStore, RepositoryError};
use crate::fundraising::service::{
    FundraiserService, LaunchFundraiser, LaunchedFundraiser, PledgeRequest,
};

pub(super) fn day(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn hawks() -> TeamId {
    TeamId::from("hawks")
}

pub(super) fn player(id: &str, name: &str, email: Option<&str>) -> PlayerProfile {
    PlayerProfile {
        id: PlayerId::from(id),
        display_name: name.to_string(),
        email: email.map(str::to_string),
    }
}

pub(super) fn coach() -> Contact {
    Contact {
        name: "Coach Dee".to_string(),
        email: "coach@example.com".to_string(),
        account_id: Some("acct-coach".to_string()),
    }
}

pub(super) fn donor(name: &str, email: &str) -> Donor {
    Donor {
        name: name.to_string(),
        email: email.to_string(),
        account_id: None,
    }
}

pub(super) fn dollars(value: i64) -> Decimal {
    Decimal::from(value)
}

pub(super) fn flat(amount: i64) -> PledgeTerms {
    PledgeTerms::Flat {
        amount: dollars(amount),
    }
}

pub(super) fn per_level(rate: i64, cap: i64) -> PledgeTerms {
    PledgeTerms::PerLevel {
        amount_per_level: dollars(rate),
        max_amount: dollars(cap),
    }
}

pub(super) fn pledge(donor: Donor, target: Option<&str>, terms: PledgeTerms) -> PledgeRequest {
    PledgeRequest {
        donor,
        target_player: target.map(PlayerId::from),
        terms,
    }
}

pub(super) fn team_launch(starts_on: NaiveDate, ends_on: NaiveDate) -> LaunchFundraiser {
    LaunchFundraiser {
        owner: FundraiserOwner::Team(hawks()),
        team_id: hawks(),
        title: "Hawks spring drive".to_string(),
        starts_on,
        ends_on,
        goal_amount: Some(dollars(200)),
        estimated_levels: None,
        created_by: coach(),
    }
}

pub(super) fn player_launch(
    player: &str,
    starts_on: NaiveDate,
    ends_on: NaiveDate,
) -> LaunchFundraiser {
    LaunchFundraiser {
        owner: FundraiserOwner::Player(PlayerId::from(player)),
        team_id: hawks(),
        title: format!("{player}'s rep challenge"),
        starts_on,
        ends_on,
        goal_amount: None,
        estimated_levels: None,
        created_by: coach(),
    }
}

/// Service wired to an in-memory store, a fixed clock and an open outbox.
pub(super) struct Harness {
    pub(super) store: Arc<InMemoryStore>,
    pub(super) clock: Arc<FixedClock>,
    pub(super) queue: NotificationQueue,
    pub(super) service: Arc<FundraiserService>,
}

impl Harness {
    pub(super) fn on(today: NaiveDate) -> Self {
        Self::with_policy(today, MissingProgressPolicy::Exclude)
    }

    pub(super) fn with_policy(today: NaiveDate, policy: MissingProgressPolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.add_player(
            player("ava", "Ava Lee", Some("ava@example.com")),
            &[hawks()],
        );
        store.add_player(player("ben", "Ben Ortiz", None), &[hawks()]);

        let clock = Arc::new(FixedClock::on(today));
        let (outbox, queue) = notify::channel();
        let service = Arc::new(FundraiserService::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            outbox,
            policy,
        ));
        Self {
            store,
            clock,
            queue,
            service,
        }
    }

    /// Team points earned before today, used as the launch snapshot.
    pub(super) fn earned_before_launch(&self, player: &str, points: u64) {
        let earlier = self.clock.now() - chrono::Duration::days(30);
        self.store
            .record_completion(&PlayerId::from(player), &hawks(), points, earlier);
    }

    pub(super) async fn launch(&self, request: LaunchFundraiser) -> LaunchedFundraiser {
        self.service.launch(request).await.expect("launch succeeds")
    }

    pub(super) async fn pledge(&self, fundraiser: &FundraiserId, request: PledgeRequest) -> Pledge {
        self.service
            .submit_pledge(fundraiser, request)
            .await
            .expect("pledge accepted")
    }

    pub(super) async fn earn(&self, player: &str, points: i64) {
        self.service
            .record_points(&PlayerId::from(player), points)
            .await
            .expect("points recorded");
    }

    pub(super) fn drain(&mut self) -> Vec<notify::Notification> {
        self.queue.drain_ready()
    }
}

/// Sender that keeps every e-mail it was asked to deliver.
#[derive(Default, Clone)]
pub(super) struct RecordingSender {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
}

impl RecordingSender {
    pub(super) fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().expect("sender mutex poisoned").clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("sender mutex poisoned")
            .push(email.clone());
        Ok(())
    }
}

/// Fails with a transport error a fixed number of times before succeeding.
pub(super) struct FlakySender {
    failures_left: AtomicUsize,
    pub(super) calls: AtomicUsize,
}

impl FlakySender {
    pub(super) fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NotificationSender for FlakySender {
    async fn send(&self, _email: &OutboundEmail) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifyError::Transport("connection reset".to_string()));
        }
        Ok(())
    }
}

pub(super) struct RejectingSender;

#[async_trait]
impl NotificationSender for RejectingSender {
    async fn send(&self, _email: &OutboundEmail) -> Result<(), NotifyError> {
        Err(NotifyError::Rejected {
            status: 422,
            body: "invalid recipient".to_string(),
        })
    }
}

/// In-memory store that can be told to fail specific settlement writes.
pub(super) struct FaultyStore {
    pub(super) inner: Arc<InMemoryStore>,
    fail_final_amount_after: Option<usize>,
    final_amount_writes: AtomicUsize,
    fail_release: bool,
    fail_progress_insert: bool,
    rival_claims: bool,
    yield_after_listing: bool,
}

impl FaultyStore {
    pub(super) fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_final_amount_after: None,
            final_amount_writes: AtomicUsize::new(0),
            fail_release: false,
            fail_progress_insert: false,
            rival_claims: false,
            yield_after_listing: false,
        }
    }

    pub(super) fn failing_final_amount_after(mut self, successes: usize) -> Self {
        self.fail_final_amount_after = Some(successes);
        self
    }

    pub(super) fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub(super) fn failing_progress_insert(mut self) -> Self {
        self.fail_progress_insert = true;
        self
    }

    /// Hands control back to the runtime after listing candidates, so two
    /// sweeps joined on one task both see the same overdue fundraisers.
    pub(super) fn yielding_after_listing(mut self) -> Self {
        self.yield_after_listing = true;
        self
    }

    /// Another process claims every candidate right after it is listed.
    pub(super) fn with_rival_claims(mut self) -> Self {
        self.rival_claims = true;
        self
    }
}

#[async_trait]
impl FundraiserStore for FaultyStore {
    async fn insert_fundraiser(
        &self,
        fundraiser: NewFundraiser,
    ) -> Result<Fundraiser, RepositoryError> {
        self.inner.insert_fundraiser(fundraiser).await
    }

    async fn delete_fundraiser(&self, id: &FundraiserId) -> Result<(), RepositoryError> {
        self.inner.delete_fundraiser(id).await
    }

    async fn fetch_fundraiser(
        &self,
        id: &FundraiserId,
    ) -> Result<Option<Fundraiser>, RepositoryError> {
        self.inner.fetch_fundraiser(id).await
    }

    async fn active_fundraisers_for_player(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<Fundraiser>, RepositoryError> {
        self.inner.active_fundraisers_for_player(player).await
    }

    async fn overdue_active(&self, today: NaiveDate) -> Result<Vec<Fundraiser>, RepositoryError> {
        let candidates = self.inner.overdue_active(today).await?;
        if self.rival_claims {
            for fundraiser in &candidates {
                self.inner.claim_for_settlement(&fundraiser.id).await?;
            }
        }
        if self.yield_after_listing {
            tokio::task::yield_now().await;
        }
        Ok(candidates)
    }

    async fn claim_for_settlement(&self, id: &FundraiserId) -> Result<bool, RepositoryError> {
        self.inner.claim_for_settlement(id).await
    }

    async fn release_claim(&self, id: &FundraiserId) -> Result<bool, RepositoryError> {
        if self.fail_release {
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        self.inner.release_claim(id).await
    }

    async fn team_roster(&self, team: &TeamId) -> Result<Vec<PlayerProfile>, RepositoryError> {
        self.inner.team_roster(team).await
    }

    async fn player_profile(
        &self,
        player: &PlayerId,
    ) -> Result<Option<PlayerProfile>, RepositoryError> {
        self.inner.player_profile(player).await
    }

    async fn insert_progress(&self, rows: Vec<FundraiserProgress>) -> Result<(), RepositoryError> {
        if self.fail_progress_insert {
            return Err(RepositoryError::Unavailable("insert timed out".to_string()));
        }
        self.inner.insert_progress(rows).await
    }

    async fn fetch_progress(
        &self,
        fundraiser: &FundraiserId,
        player: &PlayerId,
    ) -> Result<Option<FundraiserProgress>, RepositoryError> {
        self.inner.fetch_progress(fundraiser, player).await
    }

    async fn save_progress(&self, row: &FundraiserProgress) -> Result<(), RepositoryError> {
        self.inner.save_progress(row).await
    }

    async fn progress_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<FundraiserProgress>, RepositoryError> {
        self.inner.progress_for(fundraiser).await
    }

    async fn insert_pledge(&self, pledge: NewPledge) -> Result<Pledge, RepositoryError> {
        self.inner.insert_pledge(pledge).await
    }

    async fn pledges_for(
        &self,
        fundraiser: &FundraiserId,
    ) -> Result<Vec<PledgeRecord>, RepositoryError> {
        self.inner.pledges_for(fundraiser).await
    }

    async fn record_final_amount(
        &self,
        pledge: &PledgeId,
        amount: Decimal,
    ) -> Result<bool, RepositoryError> {
        if let Some(limit) = self.fail_final_amount_after {
            if self.final_amount_writes.fetch_add(1, Ordering::SeqCst) >= limit {
                return Err(RepositoryError::Unavailable("write timed out".to_string()));
            }
        }
        self.inner.record_final_amount(pledge, amount).await
    }
}

/// Points ledger that is unreachable for one player and delegates otherwise.
pub(super) struct FailingLedger {
    pub(super) inner: Arc<InMemoryStore>,
    pub(super) unreachable_for: PlayerId,
}

#[async_trait]
impl PointsLedger for FailingLedger {
    async fn points_earned(
        &self,
        player: &PlayerId,
        team: &TeamId,
        window: PointsWindow,
    ) -> Result<u64, RepositoryError> {
        if player == &self.unreachable_for {
            return Err(RepositoryError::Unavailable("ledger offline".to_string()));
        }
        self.inner.points_earned(player, team, window).await
    }
}

/// Store whose every call fails, for error-path routing checks.
pub(super) struct UnavailableStore;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

#[async_trait]
impl FundraiserStore for UnavailableStore {
    async fn insert_fundraiser(&self, _: NewFundraiser) -> Result<Fundraiser, RepositoryError> {
        offline()
    }

    async fn delete_fundraiser(&self, _: &FundraiserId) -> Result<(), RepositoryError> {
        offline()
    }

    async fn fetch_fundraiser(&self, _: &FundraiserId) -> Result<Option<Fundraiser>, RepositoryError> {
        offline()
    }

    async fn active_fundraisers_for_player(
        &self,
        _: &PlayerId,
    ) -> Result<Vec<Fundraiser>, RepositoryError> {
        offline()
    }

    async fn overdue_active(&self, _: NaiveDate) -> Result<Vec<Fundraiser>, RepositoryError> {
        offline()
    }

    async fn claim_for_settlement(&self, _: &FundraiserId) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn release_claim(&self, _: &FundraiserId) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn team_roster(&self, _: &TeamId) -> Result<Vec<PlayerProfile>, RepositoryError> {
        offline()
    }

    async fn player_profile(&self, _: &PlayerId) -> Result<Option<PlayerProfile>, RepositoryError> {
        offline()
    }

    async fn insert_progress(&self, _: Vec<FundraiserProgress>) -> Result<(), RepositoryError> {
        offline()
    }

    async fn fetch_progress(
        &self,
        _: &FundraiserId,
        _: &PlayerId,
    ) -> Result<Option<FundraiserProgress>, RepositoryError> {
        offline()
    }

    async fn save_progress(&self, _: &FundraiserProgress) -> Result<(), RepositoryError> {
        offline()
    }

    async fn progress_for(&self, _: &FundraiserId) -> Result<Vec<FundraiserProgress>, RepositoryError> {
        offline()
    }

    async fn insert_pledge(&self, _: NewPledge) -> Result<Pledge, RepositoryError> {
        offline()
    }

    async fn pledges_for(&self, _: &FundraiserId) -> Result<Vec<PledgeRecord>, RepositoryError> {
        offline()
    }

    async fn record_final_amount(&self, _: &PledgeId, _: Decimal) -> Result<bool, RepositoryError> {
        offline()
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) async fn read_text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}
