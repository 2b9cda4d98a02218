use std::sync::Arc;

use super::common::*;

use crate::fundraising::domain::{
    FundraiserId, FundraiserKind, FundraiserOwner, FundraiserStatus, LevelRange, NewFundraiser,
    PlayerId, TeamId,
};
use crate::fundraising::notify;
use crate::fundraising::pledges::{MissingProgressPolicy, PledgeFault};
use crate::fundraising::repository::{FundraiserStore, RepositoryError};
use crate::fundraising::service::{FundraiserService, FundraiserServiceError, ValidationError};
use crate::fundraising::Clock;
use rust_decimal::Decimal;

fn validation(err: FundraiserServiceError) -> ValidationError {
    match err {
        FundraiserServiceError::Validation(inner) => inner,
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn launch_rejects_malformed_requests() {
    let harness = Harness::on(day(2025, 5, 1));
    let service = &harness.service;

    let mut untitled = team_launch(day(2025, 5, 1), day(2025, 5, 10));
    untitled.title = "   ".to_string();
    let err = service.launch(untitled).await.expect_err("blank title");
    assert_eq!(validation(err), ValidationError::EmptyTitle);

    let err = service
        .launch(team_launch(day(2025, 5, 10), day(2025, 5, 10)))
        .await
        .expect_err("empty window");
    assert!(matches!(validation(err), ValidationError::InvalidWindow { .. }));

    let mut no_goal = team_launch(day(2025, 5, 1), day(2025, 5, 10));
    no_goal.goal_amount = Some(Decimal::ZERO);
    let err = service.launch(no_goal).await.expect_err("zero goal");
    assert_eq!(validation(err), ValidationError::NonPositiveGoal);

    let mut inverted = team_launch(day(2025, 5, 1), day(2025, 5, 10));
    inverted.estimated_levels = Some(LevelRange { min: 9, max: 3 });
    let err = service.launch(inverted).await.expect_err("inverted range");
    assert_eq!(
        validation(err),
        ValidationError::InvalidLevelRange { min: 9, max: 3 }
    );

    let err = service
        .launch(player_launch("zed", day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .expect_err("unknown player");
    assert!(matches!(validation(err), ValidationError::UnknownPlayer(_)));

    let mut empty_team = team_launch(day(2025, 5, 1), day(2025, 5, 10));
    empty_team.owner = FundraiserOwner::Team(TeamId::from("eagles"));
    let err = service.launch(empty_team).await.expect_err("empty roster");
    assert!(matches!(validation(err), ValidationError::EmptyRoster(_)));
}

#[tokio::test]
async fn launch_rejects_goals_finer_than_cents() {
    let harness = Harness::on(day(2025, 5, 1));

    for goal in [Decimal::new(1, 28), Decimal::new(1, 3), Decimal::new(12_345, 3)] {
        let mut request = team_launch(day(2025, 5, 1), day(2025, 5, 10));
        request.goal_amount = Some(goal);
        let err = harness.service.launch(request).await.expect_err("sub-cent goal");
        assert_eq!(validation(err), ValidationError::InvalidGoalAmount(goal));
    }

    let mut trailing_zero = team_launch(day(2025, 5, 1), day(2025, 5, 10));
    trailing_zero.goal_amount = Some(Decimal::new(12_500, 3));
    let launched = harness.launch(trailing_zero).await;
    assert_eq!(launched.fundraiser.goal_amount, Some(Decimal::new(12_500, 3)));
}

#[tokio::test]
async fn standing_survives_a_stored_goal_too_small_to_divide_by() {
    let harness = Harness::on(day(2025, 5, 1));
    let legacy = harness
        .store
        .insert_fundraiser(NewFundraiser {
            owner: FundraiserOwner::Team(hawks()),
            team_id: hawks(),
            title: "Imported drive".to_string(),
            starts_on: day(2025, 5, 1),
            ends_on: day(2025, 5, 10),
            goal_amount: Some(Decimal::new(1, 28)),
            estimated_levels: None,
            created_by: coach(),
            created_at: harness.clock.now(),
        })
        .await
        .expect("fundraiser stored");
    harness
        .pledge(&legacy.id, pledge(donor("Sam", "sam@example.com"), None, flat(500)))
        .await;

    let standing = harness.service.standing(&legacy.id).await.expect("standing renders");
    assert_eq!(standing.projected_total, dollars(500));
    assert_eq!(standing.goal_progress_pct, None);
}

#[tokio::test]
async fn launch_reads_every_snapshot_before_writing() {
    let harness = Harness::on(day(2025, 5, 1));
    let (outbox, _queue) = notify::channel();
    let service = FundraiserService::new(
        harness.store.clone(),
        Arc::new(FailingLedger {
            inner: harness.store.clone(),
            unreachable_for: PlayerId::from("ben"),
        }),
        harness.clock.clone(),
        outbox,
        MissingProgressPolicy::Exclude,
    );

    let err = service
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .expect_err("ledger offline for ben");
    assert!(matches!(
        err,
        FundraiserServiceError::Repository(RepositoryError::Unavailable(_))
    ));

    let visible = harness
        .store
        .active_fundraisers_for_player(&PlayerId::from("ava"))
        .await
        .expect("store readable");
    assert!(visible.is_empty());
}

#[tokio::test]
async fn launch_removes_the_fundraiser_when_progress_rows_fail() {
    let harness = Harness::on(day(2025, 5, 1));
    let store = Arc::new(FaultyStore::new(harness.store.clone()).failing_progress_insert());
    let (outbox, _queue) = notify::channel();
    let service = FundraiserService::new(
        store,
        harness.store.clone(),
        harness.clock.clone(),
        outbox,
        MissingProgressPolicy::Exclude,
    );

    let err = service
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .expect_err("progress insert fails");
    assert!(matches!(
        err,
        FundraiserServiceError::Repository(RepositoryError::Unavailable(_))
    ));

    let orphan = harness
        .store
        .fetch_fundraiser(&FundraiserId::from("fr-000001"))
        .await
        .expect("store readable");
    assert!(orphan.is_none());
    assert!(harness
        .store
        .active_fundraisers_for_player(&PlayerId::from("ava"))
        .await
        .expect("store readable")
        .is_empty());
}

#[tokio::test]
async fn team_launch_snapshots_every_roster_player() {
    let harness = Harness::on(day(2025, 5, 1));
    harness.earned_before_launch("ava", 2500);
    harness.earned_before_launch("ben", 400);

    let launched = harness
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await;

    assert_eq!(launched.fundraiser.status, FundraiserStatus::Active);
    assert_eq!(launched.fundraiser.kind(), FundraiserKind::Team);
    assert_eq!(launched.participants.len(), 2);
    let ava = launched
        .participants
        .iter()
        .find(|row| row.player.id.as_str() == "ava")
        .expect("ava participates");
    assert_eq!(ava.starting_points, 2500);
    assert_eq!(ava.starting_level, 2);
    assert_eq!(ava.current_level, 2);
    assert_eq!(ava.fundraiser_points, 0);
    assert_eq!(ava.fundraiser_levels, 0);
}

#[tokio::test]
async fn player_launch_tracks_only_the_owner() {
    let harness = Harness::on(day(2025, 5, 1));
    let launched = harness
        .launch(player_launch("ben", day(2025, 5, 1), day(2025, 5, 10)))
        .await;

    assert_eq!(launched.fundraiser.kind(), FundraiserKind::Player);
    assert_eq!(launched.participants.len(), 1);
    assert_eq!(launched.participants[0].player.display_name, "Ben Ortiz");
}

#[tokio::test]
async fn pledges_are_validated_before_storage() {
    let harness = Harness::on(day(2025, 5, 1));
    let team = harness
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .fundraiser
        .id;
    let solo = harness
        .launch(player_launch("ava", day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .fundraiser
        .id;
    let service = &harness.service;

    let err = service
        .submit_pledge(&team, pledge(donor("Sam", "  "), None, flat(10)))
        .await
        .expect_err("missing email");
    assert_eq!(validation(err), ValidationError::MissingDonorEmail);

    let err = service
        .submit_pledge(&team, pledge(donor("Sam", "sam@example.com"), None, per_level(10, 5)))
        .await
        .expect_err("cap below rate");
    assert!(matches!(
        validation(err),
        ValidationError::InvalidTerms(PledgeFault::CapBelowRate { .. })
    ));

    let err = service
        .submit_pledge(&team, pledge(donor("Sam", "sam@example.com"), None, flat(0)))
        .await
        .expect_err("zero amount");
    assert!(matches!(
        validation(err),
        ValidationError::InvalidTerms(PledgeFault::NonPositive { .. })
    ));

    let err = service
        .submit_pledge(&solo, pledge(donor("Sam", "sam@example.com"), Some("ava"), flat(10)))
        .await
        .expect_err("target on player fundraiser");
    assert_eq!(validation(err), ValidationError::TargetNotAllowed);

    let err = service
        .submit_pledge(&team, pledge(donor("Sam", "sam@example.com"), Some("zed"), flat(10)))
        .await
        .expect_err("target outside roster");
    assert!(matches!(
        validation(err),
        ValidationError::TargetNotParticipant(_)
    ));

    let err = service
        .submit_pledge(
            &FundraiserId::from("fr-missing"),
            pledge(donor("Sam", "sam@example.com"), None, flat(10)),
        )
        .await
        .expect_err("unknown fundraiser");
    assert!(matches!(err, FundraiserServiceError::NotFound(_)));
}

#[tokio::test]
async fn pledges_close_with_the_fundraiser() {
    let harness = Harness::on(day(2025, 5, 1));
    let fundraiser = harness
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .fundraiser
        .id;

    harness.clock.advance_days(9);
    let accepted = harness
        .pledge(
            &fundraiser,
            pledge(donor("Sam", " sam@example.com "), None, flat(10)),
        )
        .await;
    assert_eq!(accepted.donor.email, "sam@example.com");
    assert_eq!(accepted.final_amount_owed, None);

    harness.clock.advance_days(1);
    let err = harness
        .service
        .submit_pledge(
            &fundraiser,
            pledge(donor("Sam", "sam@example.com"), None, flat(10)),
        )
        .await
        .expect_err("window closed");
    assert!(matches!(
        validation(err),
        ValidationError::FundraiserClosed(_)
    ));
}

#[tokio::test]
async fn standing_projects_amounts_at_current_levels() {
    let harness = Harness::on(day(2025, 5, 1));
    let fundraiser = harness
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .fundraiser
        .id;
    harness
        .pledge(
            &fundraiser,
            pledge(donor("Sam", "sam@example.com"), None, per_level(10, 100)),
        )
        .await;
    harness
        .pledge(
            &fundraiser,
            pledge(donor("Kim", "kim@example.com"), Some("ben"), per_level(5, 50)),
        )
        .await;
    harness
        .pledge(
            &fundraiser,
            pledge(donor("Lou", "lou@example.com"), None, flat(30)),
        )
        .await;
    harness
        .store
        .insert_malformed_pledge(&fundraiser, PledgeFault::MissingField("amount"));
    harness.earn("ava", 2300).await;

    let standing = harness
        .service
        .standing(&fundraiser)
        .await
        .expect("standing loads");

    assert_eq!(standing.total_levels, 2);
    assert_eq!(standing.malformed_pledges, 1);
    assert_eq!(standing.pledges.len(), 3);
    assert_eq!(standing.pledges[0].amount, Some(dollars(20)));
    assert_eq!(standing.pledges[1].amount, Some(Decimal::ZERO));
    assert!(standing.pledges.iter().all(|pledge| !pledge.settled));
    assert_eq!(standing.projected_total, dollars(50));
    assert_eq!(standing.goal_progress_pct, Some(Decimal::new(250, 1)));

    let ava = standing
        .participants
        .iter()
        .find(|row| row.player_id.as_str() == "ava")
        .expect("ava listed");
    assert_eq!(ava.fundraiser_levels, 2);
    assert_eq!(ava.points_to_next_level, 700);
}

#[tokio::test]
async fn export_lists_pledges_in_creation_order() {
    let harness = Harness::on(day(2025, 5, 1));
    let fundraiser = harness
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await
        .fundraiser
        .id;
    harness
        .pledge(
            &fundraiser,
            pledge(donor("Kim", "kim@example.com"), Some("ava"), per_level(5, 50)),
        )
        .await;
    harness.clock.advance_days(1);
    harness
        .pledge(
            &fundraiser,
            pledge(donor("Lou", "lou@example.com"), None, flat(30)),
        )
        .await;

    let rows = harness
        .service
        .export(&fundraiser)
        .await
        .expect("export loads");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].donor_name, "Kim");
    assert_eq!(rows[0].target_player_name.as_deref(), Some("Ava Lee"));
    assert_eq!(rows[0].pledged_on, "2025-05-01");
    assert_eq!(rows[1].flat_amount, Some(dollars(30)));
    assert_eq!(rows[1].payment_status, "unpaid");
    assert_eq!(rows[1].final_amount_owed, None);
}
