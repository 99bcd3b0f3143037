use std::time::Duration;

use tokio::sync::mpsc;

use direct_chat::models::OnlineUser;
use direct_chat::notifications::{NotificationDeduplicator, NotificationKind};
use direct_chat::presence::PresenceChange;

#[tokio::test(start_paused = true)]
async fn identical_notifications_inside_window_collapse_to_one() {
    let hub = NotificationDeduplicator::new();
    assert!(hub.add("bob joined", NotificationKind::Joined).await.is_some());
    assert!(hub.add("bob joined", NotificationKind::Joined).await.is_none());
    assert_eq!(hub.active().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn identical_notifications_outside_window_both_live() {
    let hub = NotificationDeduplicator::new();
    hub.add("bob joined", NotificationKind::Joined).await;
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert!(hub.add("bob joined", NotificationKind::Joined).await.is_some());
    assert_eq!(hub.active().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn same_text_different_kind_is_not_a_duplicate() {
    let hub = NotificationDeduplicator::new();
    hub.add("bob", NotificationKind::Joined).await;
    assert!(hub.add("bob", NotificationKind::Left).await.is_some());
    assert_eq!(hub.active().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn notification_expires_after_ttl_and_not_before() {
    let hub = NotificationDeduplicator::new();
    hub.add("bob joined", NotificationKind::Joined).await;

    tokio::time::sleep(Duration::from_millis(4999)).await;
    assert_eq!(hub.active().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(hub.active().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dedup_window_does_not_extend_ttl() {
    let hub = NotificationDeduplicator::new();
    hub.add("bob joined", NotificationKind::Joined).await;
    // Suppressed creation attempt inside the window.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    hub.add("bob joined", NotificationKind::Joined).await;
    assert_eq!(hub.active().await.len(), 1);

    // The original still dies 5000 ms after its own creation.
    tokio::time::sleep(Duration::from_millis(3501)).await;
    assert!(hub.active().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn remove_is_immediate_and_unknown_ids_are_ignored() {
    let hub = NotificationDeduplicator::new();
    let id = hub
        .add("bob joined", NotificationKind::Joined)
        .await
        .expect("created");

    hub.remove("not-a-real-id").await;
    assert_eq!(hub.active().await.len(), 1);

    hub.remove(&id).await;
    assert!(hub.active().await.is_empty());

    // A dismissed notification no longer suppresses re-creation.
    assert!(hub.add("bob joined", NotificationKind::Joined).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn presence_changes_become_join_and_leave_notices() {
    let hub = NotificationDeduplicator::new();
    let (tx, rx) = mpsc::unbounded_channel();
    hub.watch_presence(rx).await;

    let bob = OnlineUser {
        id: "u2".to_string(),
        username: "bob".to_string(),
    };
    tx.send(PresenceChange::Joined(bob.clone())).expect("send");
    tx.send(PresenceChange::Left(bob)).expect("send");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let active = hub.active().await;
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].text, "bob joined");
    assert_eq!(active[0].kind, NotificationKind::Joined);
    assert_eq!(active[1].text, "bob left");
    assert_eq!(active[1].kind, NotificationKind::Left);
}

#[tokio::test(start_paused = true)]
async fn shutdown_ignores_later_adds() {
    let hub = NotificationDeduplicator::new();
    hub.add("bob joined", NotificationKind::Joined).await;
    hub.shutdown().await;
    assert!(hub.add("carol joined", NotificationKind::Joined).await.is_none());
    assert!(hub.active().await.is_empty());
}
