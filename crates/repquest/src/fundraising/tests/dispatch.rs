use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::common::*;

use crate::fundraising::domain::FundraiserId;
use crate::fundraising::notify::{
    self, LevelUpNotice, Notification, NotificationDispatcher, NotifyError,
};

fn level_up(recipient: &str) -> Notification {
    Notification::LevelUp(LevelUpNotice {
        recipient: recipient.to_string(),
        fundraiser_id: FundraiserId::from("fr-000001"),
        fundraiser_title: "Hawks spring drive".to_string(),
        player_name: "Ava Lee".to_string(),
        levels: 2,
        fundraiser_points: 2100,
    })
}

#[tokio::test]
async fn transport_failures_are_retried_until_delivered() {
    let sender = Arc::new(FlakySender::failing(2));
    let dispatcher = NotificationDispatcher::new(sender.clone(), 3, Duration::ZERO);

    let attempts = dispatcher
        .deliver(&level_up("ava@example.com"))
        .await
        .expect("third attempt succeeds");

    assert_eq!(attempts, 3);
    assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_land_in_the_failed_log() {
    let sender = Arc::new(FlakySender::failing(10));
    let dispatcher = NotificationDispatcher::new(sender.clone(), 3, Duration::ZERO);
    let (outbox, mut queue) = notify::channel();
    outbox
        .enqueue(level_up("ava@example.com"))
        .expect("outbox open");

    let summary = dispatcher.flush(&mut queue).await;

    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.failed, 1);
    let failed = dispatcher.failed_deliveries();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 3);
    assert_eq!(failed[0].recipient, "ava@example.com");
    assert_eq!(failed[0].kind, "level_up");
    assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejected_mail_is_not_retried() {
    let dispatcher = NotificationDispatcher::new(Arc::new(RejectingSender), 5, Duration::ZERO);

    let err = dispatcher
        .deliver(&level_up("ava@example.com"))
        .await
        .expect_err("provider rejects");
    assert!(matches!(err, NotifyError::Rejected { status: 422, .. }));

    let (outbox, mut queue) = notify::channel();
    outbox.enqueue(level_up("ava@example.com")).expect("outbox open");
    dispatcher.flush(&mut queue).await;
    assert_eq!(dispatcher.failed_deliveries()[0].attempts, 1);
}

#[tokio::test]
async fn blank_recipient_is_never_sent() {
    let sender = RecordingSender::default();
    let dispatcher = NotificationDispatcher::new(Arc::new(sender.clone()), 3, Duration::ZERO);
    let (outbox, mut queue) = notify::channel();
    outbox.enqueue(level_up("   ")).expect("outbox open");
    outbox.enqueue(level_up("ava@example.com")).expect("outbox open");

    let summary = dispatcher.flush(&mut queue).await;

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(dispatcher.failed_deliveries()[0].attempts, 0);
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ava@example.com");
}

#[tokio::test]
async fn dispatcher_stops_once_outboxes_are_dropped() {
    let sender = RecordingSender::default();
    let dispatcher = NotificationDispatcher::new(Arc::new(sender.clone()), 3, Duration::ZERO);
    let (outbox, queue) = notify::channel();
    let worker = tokio::spawn(dispatcher.run(queue));

    let second = outbox.clone();
    outbox.enqueue(level_up("ava@example.com")).expect("outbox open");
    second.enqueue(level_up("coach@example.com")).expect("outbox open");
    drop(outbox);
    drop(second);

    let summary = worker.await.expect("dispatcher task joins");
    assert_eq!(summary.delivered, 2);
    assert_eq!(sender.sent().len(), 2);
}

#[tokio::test]
async fn level_ups_flow_from_points_to_the_sender() {
    let mut harness = Harness::on(day(2025, 5, 1));
    harness
        .launch(team_launch(day(2025, 5, 1), day(2025, 5, 10)))
        .await;
    harness.earn("ava", 1000).await;
    harness.earn("ben", 1000).await;

    let sender = RecordingSender::default();
    let dispatcher = NotificationDispatcher::new(Arc::new(sender.clone()), 3, Duration::ZERO);
    let summary = dispatcher.flush(&mut harness.queue).await;

    // Ben has no e-mail on file, so only Ava's notice was queued.
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 0);
    let sent = sender.sent();
    assert_eq!(sent[0].to, "ava@example.com");
    assert_eq!(sent[0].subject, "Ava Lee reached level 1 in Hawks spring drive");
}
