use messenger_model::{Record, RecordKind, SchemaRegistry};
use messenger_store::{MutationError, StoreError, StoreHandle, WriteContext, MAX_WALL_TIME};
use messenger_types::{RemoteId, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn make_context() -> WriteContext {
    let store = StoreHandle::open_in_memory().unwrap();
    WriteContext::new(store, Arc::new(SchemaRegistry::default())).unwrap()
}

fn remote(name: &str) -> RemoteId {
    RemoteId::new(name).unwrap()
}

async fn insert_room(ctx: &WriteContext, title: &str) -> Record {
    let fields = json!({"title": title});
    ctx.enqueue(move |txn| txn.insert(RecordKind::Chatroom, fields))
        .await
        .unwrap()
}

// ── Local writes ─────────────────────────────────────────────────

#[tokio::test]
async fn insert_with_remote_rejects_duplicates() {
    let ctx = make_context();
    ctx.enqueue(|txn| txn.insert_with_remote(RecordKind::User, remote("u-1"), json!({"name": "a"})))
        .await
        .unwrap();

    let err = ctx
        .enqueue(|txn| {
            txn.insert_with_remote(RecordKind::User, remote("u-1"), json!({"name": "b"}))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::Conflict(id) if id.as_str() == "u-1"));
    assert_eq!(ctx.store().count(RecordKind::User).unwrap(), 1);
}

#[tokio::test]
async fn update_replaces_fields_and_restamps() {
    let ctx = make_context();
    let room = insert_room(&ctx, "before").await;
    let id = room.id;

    let updated = ctx
        .enqueue(move |txn| txn.update(&id, json!({"title": "after"})))
        .await
        .unwrap();

    assert_eq!(updated.get_str("/title"), Some("after"));
    assert!(updated.modified_at > room.modified_at);
    assert!(updated.pending_push);
    assert_eq!(ctx.store().get(&id).unwrap().unwrap(), updated);
}

#[tokio::test]
async fn patch_keeps_untouched_fields() {
    let ctx = make_context();
    let room = ctx
        .enqueue(|txn| txn.insert(RecordKind::Chatroom, json!({"title": "t", "topic": "x"})))
        .await
        .unwrap();
    let id = room.id;

    let mut changes = serde_json::Map::new();
    changes.insert("topic".into(), json!("y"));
    let patched = ctx.enqueue(move |txn| txn.patch(&id, changes)).await.unwrap();

    assert_eq!(patched.fields, json!({"title": "t", "topic": "y"}));
}

#[tokio::test]
async fn patch_cannot_break_schema() {
    let ctx = make_context();
    let room = insert_room(&ctx, "t").await;
    let id = room.id;

    let mut changes = serde_json::Map::new();
    changes.insert("title".into(), serde_json::Value::Null);
    let err = ctx.enqueue(move |txn| txn.patch(&id, changes)).await.unwrap_err();

    assert!(matches!(err, MutationError::Validation { record, .. } if record == id));
    assert_eq!(ctx.store().get(&id).unwrap().unwrap().get_str("/title"), Some("t"));
}

#[tokio::test]
async fn delete_leaves_pending_tombstone() {
    let ctx = make_context();
    let room = insert_room(&ctx, "gone").await;
    let id = room.id;
    let remote_id = room.remote_id.clone();

    ctx.enqueue(move |txn| txn.delete(&id)).await.unwrap();

    assert!(ctx.store().get(&id).unwrap().is_none());
    assert!(ctx.store().find_by_remote(&remote_id).unwrap().is_none());
    let tombstone = ctx.store().load_by_remote(&remote_id).unwrap().unwrap();
    assert!(tombstone.deleted);
    assert!(tombstone.pending_push);
    assert_eq!(tombstone.fields, json!({}));

    let pending = ctx.store().pending_push().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].deleted);
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let ctx = make_context();
    let room = insert_room(&ctx, "x").await;
    let id = room.id;
    ctx.enqueue(move |txn| txn.delete(&id)).await.unwrap();

    let err = ctx
        .enqueue(move |txn| txn.update(&id, json!({"title": "zombie"})))
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::NotFound(missing) if missing == id));
}

// ── Savepoints ───────────────────────────────────────────────────

#[tokio::test]
async fn failed_savepoint_rolls_back_only_its_writes() {
    let ctx = make_context();
    let outcome = ctx
        .enqueue(|txn| {
            let inner = txn.savepoint(|txn| {
                txn.insert(RecordKind::Chatroom, json!({"title": "discarded"}))?;
                Err::<(), _>(MutationError::Rejected("bad record".into()))
            });
            txn.insert(RecordKind::Chatroom, json!({"title": "kept"}))?;
            Ok(inner.is_err())
        })
        .await
        .unwrap();

    assert!(outcome);
    let titles: Vec<_> = ctx
        .store()
        .list(RecordKind::Chatroom)
        .unwrap()
        .into_iter()
        .map(|r| r.get_str("/title").unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["kept"]);
}

#[tokio::test]
async fn successful_savepoints_nest_into_commit() {
    let ctx = make_context();
    ctx.enqueue(|txn| {
        for i in 0..3 {
            let fields = json!({"title": format!("r{i}")});
            txn.savepoint(|txn| txn.insert(RecordKind::Chatroom, fields))?;
        }
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(ctx.store().count(RecordKind::Chatroom).unwrap(), 3);
}

// ── Sync bookkeeping ─────────────────────────────────────────────

#[tokio::test]
async fn clear_pending_only_for_pushed_version() {
    let ctx = make_context();
    let room = insert_room(&ctx, "v1").await;
    let id = room.id;
    let pushed_at = room.modified_at;

    // Edited again after the push snapshot was taken.
    ctx.enqueue(move |txn| txn.update(&id, json!({"title": "v2"})))
        .await
        .unwrap();
    let cleared = ctx
        .enqueue(move |txn| Ok(txn.clear_pending(&id, pushed_at)?))
        .await
        .unwrap();
    assert!(!cleared);
    assert!(ctx.store().get(&id).unwrap().unwrap().pending_push);

    let current = ctx.store().get(&id).unwrap().unwrap().modified_at;
    let cleared = ctx
        .enqueue(move |txn| Ok(txn.clear_pending(&id, current)?))
        .await
        .unwrap();
    assert!(cleared);
    assert!(ctx.store().pending_push().unwrap().is_empty());
}

#[tokio::test]
async fn put_record_writes_remote_state_verbatim() {
    let ctx = make_context();
    let version = Timestamp::new(1_000, 3);
    let fields = json!({"name": "remote"});
    let record = Record::from_remote(RecordKind::User, remote("u-9"), fields, version);
    let expected = record.clone();

    ctx.enqueue(move |txn| Ok(txn.put_record(&record)?)).await.unwrap();

    let stored = ctx.store().find_by_remote(&remote("u-9")).unwrap().unwrap();
    assert_eq!(stored, expected);
    assert!(!stored.pending_push);
    assert_eq!(stored.remote_version, Some(version));
}

#[tokio::test]
async fn largest_wall_time_sorts_newest() {
    let ctx = make_context();
    insert_room(&ctx, "now").await;
    let version = Timestamp::new(MAX_WALL_TIME, 0);
    let fields = json!({"name": "far"});
    let record = Record::from_remote(RecordKind::User, remote("u-far"), fields, version);

    ctx.enqueue(move |txn| Ok(txn.put_record(&record)?)).await.unwrap();

    assert_eq!(ctx.store().latest_timestamp().unwrap(), Some(version));
}

#[tokio::test]
async fn wall_time_beyond_range_is_refused() {
    let ctx = make_context();
    let version = Timestamp::new(MAX_WALL_TIME + 1, 0);
    let fields = json!({"name": "over"});
    let record = Record::from_remote(RecordKind::User, remote("u-over"), fields, version);

    let err = ctx
        .enqueue(move |txn| Ok(txn.put_record(&record)?))
        .await
        .unwrap_err();

    assert!(matches!(err, MutationError::Store(StoreError::InvalidData(_))), "got {err:?}");
    assert!(ctx.store().load_by_remote(&remote("u-over")).unwrap().is_none());
}

#[tokio::test]
async fn observe_remote_moves_clock_forward() {
    let ctx = make_context();
    let far_future = Timestamp::new(u64::MAX / 2, 0);

    let (clock, stamped) = ctx
        .enqueue(move |txn| {
            txn.observe_remote(far_future);
            let clock = txn.clock();
            let record = txn.insert(RecordKind::Chatroom, json!({"title": "after"}))?;
            Ok((clock, record.modified_at))
        })
        .await
        .unwrap();

    assert!(clock > far_future);
    assert!(stamped > clock);
}

#[tokio::test]
async fn reads_inside_mutation_see_own_writes() {
    let ctx = make_context();
    let seen = ctx
        .enqueue(|txn| {
            let fields = json!({"title": "t"});
            let record = txn.insert_with_remote(RecordKind::Chatroom, remote("room"), fields)?;
            let by_id = txn.get(&record.id)?.is_some();
            let by_remote = txn.find_by_remote(&remote("room"))?.is_some();
            Ok(by_id && by_remote && txn.list(RecordKind::Chatroom)?.len() == 1)
        })
        .await
        .unwrap();
    assert!(seen);
}
