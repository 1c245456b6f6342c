use messenger_model::{RecordKind, SchemaRegistry};
use messenger_store::{StoreEngine, StoreHandle, StoreLocation, WriteContext};
use messenger_sync::{BridgeConfig, CloudContainer, InMemoryContainer, SyncBridge, SyncError};
use messenger_types::{RemoteChange, RemoteChangeNotification, RemoteId, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const CONTAINER: &str = "iCloud.messenger.test";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_bridge() -> (SyncBridge, Arc<InMemoryContainer>) {
    init_tracing();
    let store = StoreHandle::open_in_memory().unwrap();
    let ctx = WriteContext::new(store, Arc::new(SchemaRegistry::default())).unwrap();
    let container = Arc::new(InMemoryContainer::new(CONTAINER));
    let bridge = SyncBridge::new(ctx, container.clone(), BridgeConfig::default());
    (bridge, container)
}

fn remote(name: &str) -> RemoteId {
    RemoteId::new(name).unwrap()
}

fn room(name: &str, millis: u64, title: &str) -> RemoteChange {
    let version = Timestamp::from_millis(millis);
    RemoteChange::upsert(remote(name), version, "chatroom", json!({"title": title}))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ── Notifications ────────────────────────────────────────────────

#[tokio::test]
async fn notification_is_merged_and_reported() {
    let (bridge, container) = make_bridge();
    let notification = container.notification(vec![room("a", 1, "A"), room("b", 2, "B")]);

    let report = bridge.on_remote_notification(notification).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.applied(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(bridge.context().store().count(RecordKind::Chatroom).unwrap(), 2);

    let status = bridge.status();
    assert_eq!(status.notifications_processed, 1);
    assert_eq!(status.changes_applied, 2);
    assert!(status.last_sync.is_some());
}

#[tokio::test]
async fn redelivered_notification_is_idempotent() {
    let (bridge, container) = make_bridge();
    let notification = container.notification(vec![room("a", 1, "A")]);

    bridge.on_remote_notification(notification.clone()).await.unwrap();
    let before = bridge.context().store().list(RecordKind::Chatroom).unwrap();

    let report = bridge.on_remote_notification(notification).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(report.stale, 1);
    assert_eq!(bridge.context().store().list(RecordKind::Chatroom).unwrap(), before);
    assert_eq!(bridge.status().changes_skipped, 1);
}

#[tokio::test]
async fn bad_record_is_skipped_without_losing_the_rest() {
    let (bridge, container) = make_bridge();
    let notification = container.notification(vec![
        room("good", 1, "ok"),
        RemoteChange::upsert(
            remote("bad"),
            Timestamp::from_millis(1),
            "chatroom",
            json!("not an object"),
        ),
        RemoteChange::upsert(remote("odd"), Timestamp::from_millis(1), "sticker", json!({})),
    ]);

    let report = bridge.on_remote_notification(notification).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].remote_id, remote("bad"));

    let store = bridge.context().store();
    assert!(store.find_by_remote(&remote("good")).unwrap().is_some());
    assert!(store.load_by_remote(&remote("bad")).unwrap().is_none());
    assert_eq!(bridge.status().changes_failed, 2);
}

#[tokio::test]
async fn foreign_container_is_rejected() {
    let (bridge, _container) = make_bridge();
    let notification = RemoteChangeNotification::single("iCloud.someone-else", room("a", 1, "A"));

    let err = bridge.on_remote_notification(notification).await.unwrap_err();
    assert!(matches!(err, SyncError::ContainerMismatch { .. }));
    assert!(!err.is_retryable());
    assert_eq!(bridge.context().store().count(RecordKind::Chatroom).unwrap(), 0);
}

#[tokio::test]
async fn foreign_container_allowed_when_configured() {
    let store = StoreHandle::open_in_memory().unwrap();
    let ctx = WriteContext::new(store, Arc::new(SchemaRegistry::default())).unwrap();
    let config = BridgeConfig {
        reject_foreign_notifications: false,
        ..BridgeConfig::default()
    };
    let bridge = SyncBridge::new(ctx, Arc::new(InMemoryContainer::new(CONTAINER)), config);

    let notification = RemoteChangeNotification::single("elsewhere", room("a", 1, "A"));
    assert_eq!(bridge.on_remote_notification(notification).await.unwrap().created, 1);
}

#[tokio::test]
async fn closed_context_reports_channel_closed() {
    let (bridge, container) = make_bridge();
    bridge.context().shutdown();

    let err = bridge
        .on_remote_notification(container.notification(vec![room("a", 1, "A")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ChannelClosed));
}

#[tokio::test]
async fn notification_is_serialized_with_local_writes() {
    let (bridge, container) = make_bridge();
    let ctx = bridge.context().clone();

    // Queue a local write first, then merge; both land, in that order.
    let local = ctx.enqueue(|txn| {
        txn.insert_with_remote(RecordKind::User, remote("u"), json!({"name": "local"}))
    });
    let merged = bridge.on_remote_notification(container.notification(vec![RemoteChange::upsert(
        remote("u"),
        Timestamp::from_millis(1),
        "user",
        json!({"name": "remote"}),
    )]));

    let (local, merged) = tokio::join!(local, merged);
    local.unwrap();
    assert_eq!(merged.unwrap().kept_local, 1);
    let record = ctx.store().find_by_remote(&remote("u")).unwrap().unwrap();
    assert_eq!(record.get_str("/name"), Some("local"));
}

#[tokio::test]
async fn failed_save_is_retryable_and_redelivery_applies() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("messenger.db");
    let store = StoreEngine::new(StoreLocation::Path(path.clone()))
        .open()
        .await
        .unwrap();

    // Writing a record that mentions "poison" now fails at commit time.
    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute_batch(
        "CREATE TABLE save_guard_parent (id TEXT PRIMARY KEY);
         CREATE TABLE save_guard (
             record_id TEXT NOT NULL
                 REFERENCES save_guard_parent(id) DEFERRABLE INITIALLY DEFERRED
         );
         CREATE TRIGGER save_guard_poison AFTER INSERT ON records
         WHEN NEW.fields LIKE '%poison%'
         BEGIN
             INSERT INTO save_guard (record_id) VALUES (NEW.id);
         END;",
    )
    .unwrap();

    let ctx = WriteContext::new(store, Arc::new(SchemaRegistry::default())).unwrap();
    let container = Arc::new(InMemoryContainer::new(CONTAINER));
    let bridge = SyncBridge::new(ctx, container.clone(), BridgeConfig::default());
    let notification = container.notification(vec![room("a", 1, "A"), room("b", 2, "poison")]);

    let err = bridge
        .on_remote_notification(notification.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Save(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert_eq!(bridge.context().store().count(RecordKind::Chatroom).unwrap(), 0);
    assert_eq!(bridge.status().save_failures, 1);
    assert_eq!(bridge.status().notifications_processed, 0);

    raw.execute_batch("DROP TRIGGER save_guard_poison").unwrap();

    let report = bridge.on_remote_notification(notification).await.unwrap();
    assert_eq!(report.created, 2);
    assert!(report.failures.is_empty());
    assert_eq!(bridge.context().store().count(RecordKind::Chatroom).unwrap(), 2);
    assert_eq!(bridge.status().save_failures, 1);
}

// ── Subscription ─────────────────────────────────────────────────

#[tokio::test]
async fn subscription_merges_delivered_notifications() {
    let (bridge, container) = make_bridge();
    bridge.subscribe().await.unwrap();
    assert!(bridge.is_subscribed());
    assert!(bridge.status().subscribed);

    let delivered = container.deliver(container.notification(vec![room("a", 1, "A")])).await;
    assert_eq!(delivered, 1);

    let store = bridge.context().store().clone();
    wait_for(|| store.count(RecordKind::Chatroom).unwrap() == 1).await;
    wait_for(|| bridge.status().notifications_processed == 1).await;
}

#[tokio::test]
async fn unsubscribe_stops_merging() {
    let (bridge, container) = make_bridge();
    bridge.subscribe().await.unwrap();
    bridge.unsubscribe();
    assert!(!bridge.is_subscribed());
    assert!(!bridge.status().subscribed);

    // The aborted task drops its receiver.
    wait_for(|| container.subscriber_count() == 0).await;
    assert_eq!(container.deliver(container.notification(vec![room("a", 1, "A")])).await, 0);
    assert_eq!(bridge.context().store().count(RecordKind::Chatroom).unwrap(), 0);
}

#[tokio::test]
async fn resubscribe_replaces_previous_subscription() {
    let (bridge, container) = make_bridge();
    bridge.subscribe().await.unwrap();
    bridge.subscribe().await.unwrap();

    wait_for(|| container.subscriber_count() == 1).await;
    container.deliver(container.notification(vec![room("a", 1, "A")])).await;
    wait_for(|| bridge.status().notifications_processed == 1).await;
}

#[tokio::test]
async fn dropping_bridge_ends_subscription() {
    let (bridge, container) = make_bridge();
    bridge.subscribe().await.unwrap();
    drop(bridge);

    wait_for(|| container.subscriber_count() == 0).await;
}

// ── Push ─────────────────────────────────────────────────────────

#[tokio::test]
async fn push_pending_sends_and_clears_local_edits() {
    let (bridge, container) = make_bridge();
    let ctx = bridge.context().clone();
    ctx.enqueue(|txn| {
        txn.insert(RecordKind::Chatroom, json!({"title": "one"}))?;
        txn.insert(RecordKind::Chatroom, json!({"title": "two"}))
    })
    .await
    .unwrap();

    let pushed = bridge.push_pending().await.unwrap();
    assert_eq!(pushed, 2);
    assert_eq!(container.pushed().len(), 2);
    assert!(ctx.store().pending_push().unwrap().is_empty());
    assert_eq!(bridge.status().records_pushed, 2);

    assert_eq!(bridge.push_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn push_pending_respects_batch_size() {
    let store = StoreHandle::open_in_memory().unwrap();
    let ctx = WriteContext::new(store, Arc::new(SchemaRegistry::default())).unwrap();
    let container = Arc::new(InMemoryContainer::new(CONTAINER));
    let config = BridgeConfig {
        push_batch_size: 2,
        ..BridgeConfig::default()
    };
    let bridge = SyncBridge::new(ctx.clone(), container.clone(), config);

    ctx.enqueue(|txn| {
        for i in 0..5 {
            txn.insert(RecordKind::User, json!({"name": format!("u{i}")}))?;
        }
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(bridge.push_pending().await.unwrap(), 5);
    assert_eq!(container.pushed().len(), 5);
}

#[tokio::test]
async fn failed_push_keeps_records_pending() {
    let (bridge, container) = make_bridge();
    let ctx = bridge.context().clone();
    ctx.enqueue(|txn| txn.insert(RecordKind::Chatroom, json!({"title": "one"})))
        .await
        .unwrap();

    container.set_fail_pushes(true);
    let err = bridge.push_pending().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(ctx.store().pending_push().unwrap().len(), 1);

    container.set_fail_pushes(false);
    assert_eq!(bridge.push_pending().await.unwrap(), 1);
}

#[tokio::test]
async fn container_identifier_is_exposed() {
    let (bridge, _container) = make_bridge();
    assert_eq!(bridge.container().identifier(), CONTAINER);
}
