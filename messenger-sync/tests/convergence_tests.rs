//! Property tests: merging the same changes in any order, any number of
//! times, ends in the same local state.

use messenger_model::{RecordKind, SchemaRegistry};
use messenger_store::{StoreHandle, WriteContext};
use messenger_sync::{BridgeConfig, InMemoryContainer, SyncBridge};
use messenger_types::{RemoteChange, RemoteId, Timestamp};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

const CONTAINER: &str = "iCloud.messenger.props";

#[derive(Debug, Clone)]
struct Op {
    target: u8,
    delete: bool,
    body: u8,
}

fn change(op: &Op, version: u64) -> RemoteChange {
    let remote_id = RemoteId::new(format!("msg-{}", op.target)).unwrap();
    let version = Timestamp::from_millis(version);
    if op.delete {
        RemoteChange::delete(remote_id, version, "message")
    } else {
        RemoteChange::upsert(
            remote_id,
            version,
            "message",
            json!({"chatroom": "room", "sender": "ada", "body": format!("b{}", op.body)}),
        )
    }
}

/// Remote id, tombstone flag, fields and last merged version of one record.
type MergedState = (String, bool, serde_json::Value, Option<Timestamp>);

/// Applies each change as its own notification and returns the final state,
/// keyed by remote id, without local ids.
fn merge_all(changes: Vec<RemoteChange>) -> Vec<MergedState> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let store = StoreHandle::open_in_memory().unwrap();
        let ctx = WriteContext::new(store.clone(), Arc::new(SchemaRegistry::default())).unwrap();
        let container = Arc::new(InMemoryContainer::new(CONTAINER));
        let bridge = SyncBridge::new(ctx, container.clone(), BridgeConfig::default());

        for change in changes {
            bridge
                .on_remote_notification(container.notification(vec![change]))
                .await
                .unwrap();
        }

        let mut state = Vec::new();
        for target in 0..4u8 {
            let remote_id = RemoteId::new(format!("msg-{target}")).unwrap();
            if let Some(record) = store.load_by_remote(&remote_id).unwrap() {
                assert_eq!(record.kind, RecordKind::Message);
                state.push((
                    remote_id.to_string(),
                    record.deleted,
                    record.fields,
                    record.remote_version,
                ));
            }
        }
        state
    })
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        (0u8..4, any::<bool>(), any::<u8>())
            .prop_map(|(target, delete, body)| Op { target, delete, body }),
        1..12,
    )
}

fn versioned(ops: &[Op], version: impl Fn(usize) -> u64) -> Vec<RemoteChange> {
    ops.iter()
        .enumerate()
        .map(|(i, op)| change(op, version(i)))
        .collect()
}

/// Deterministic shuffle driven by the seed.
fn shuffle(changes: &[RemoteChange], seed: u64) -> Vec<RemoteChange> {
    let mut shuffled = changes.to_vec();
    let mut state = seed | 1;
    for i in (1..shuffled.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        shuffled.swap(i, (state % (i as u64 + 1)) as usize);
    }
    shuffled
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn merge_order_does_not_matter(ops in ops(), seed in any::<u64>()) {
        let ordered = versioned(&ops, |i| 1_000 + i as u64);

        let shuffled = shuffle(&ordered, seed);
        prop_assert_eq!(merge_all(ordered), merge_all(shuffled));
    }

    #[test]
    fn redelivery_does_not_matter(ops in ops()) {
        let once = versioned(&ops, |i| 1_000 + i as u64);
        let twice: Vec<_> = once.iter().chain(once.iter()).cloned().collect();

        prop_assert_eq!(merge_all(once), merge_all(twice));
    }

    #[test]
    fn colliding_versions_converge(ops in ops(), seed in any::<u64>()) {
        // Only three distinct versions, so writes to one record often tie.
        let ordered = versioned(&ops, |i| 1_000 + (i % 3) as u64);
        let shuffled = shuffle(&ordered, seed);

        prop_assert_eq!(merge_all(ordered), merge_all(shuffled));
    }
}
