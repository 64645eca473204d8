//! Generation semantics of the content store seen through snapshots.

mod support;

use std::sync::Arc;

use snapcache::cache::{CacheConfig, ContentStore};
use snapcache::domain::{ContentKind, ROOT_ID};
use uuid::Uuid;

use support::{child_ids, kit, store};

#[tokio::test]
async fn siblings_are_read_in_sort_order() {
    let store = store();
    {
        let guard = store.write().await;
        guard.set(&kit(10, ROOT_ID, 0, "P")).unwrap();
        guard.set(&kit(3, 10, 3, "C")).unwrap();
        guard.set(&kit(1, 10, 1, "A")).unwrap();
        guard.set(&kit(2, 10, 2, "B")).unwrap();
    }

    let snapshot = store.create_snapshot();
    assert_eq!(child_ids(&snapshot.get_children(10)), vec![1, 2, 3]);

    let parent = snapshot.get(10).unwrap();
    assert_eq!(parent.first_child_id, Some(1));
    assert_eq!(parent.last_child_id, Some(3));
    let middle = snapshot.get(2).unwrap();
    assert_eq!(middle.previous_sibling_id, Some(1));
    assert_eq!(middle.next_sibling_id, Some(3));
}

#[tokio::test]
async fn pinned_reader_keeps_old_value_after_refresh() {
    let store = store();
    {
        let guard = store.write().await;
        guard.set(&kit(5, ROOT_ID, 0, "X")).unwrap();
    }
    let before = store.create_snapshot();

    {
        let guard = store.write().await;
        guard.set(&kit(5, ROOT_ID, 0, "Y")).unwrap();
    }
    let after = store.create_snapshot();

    let name = |node: Arc<snapcache::domain::ContentNode>| {
        node.published_data.as_ref().map(|data| data.name.clone())
    };
    assert!(after.generation() > before.generation());
    assert_eq!(name(before.get(5).unwrap()).as_deref(), Some("X"));
    assert_eq!(name(after.get(5).unwrap()).as_deref(), Some("Y"));
}

#[tokio::test]
async fn snapshot_during_write_does_not_see_pending_changes() {
    let store = store();
    {
        let guard = store.write().await;
        guard.set(&kit(1, ROOT_ID, 0, "A")).unwrap();
    }
    let _pin = store.create_snapshot();

    let guard = store.write().await;
    guard.set(&kit(2, ROOT_ID, 1, "B")).unwrap();
    let during = store.create_snapshot();
    drop(guard);

    assert!(during.get(2).is_none());
    assert_eq!(child_ids(&during.get_at_root()), vec![1]);
    assert_eq!(child_ids(&store.create_snapshot().get_at_root()), vec![1, 2]);
}

#[tokio::test]
async fn removal_cascades_and_old_snapshot_keeps_subtree() {
    let store = store();
    {
        let guard = store.write().await;
        guard.set(&kit(3, ROOT_ID, 0, "Parent")).unwrap();
        guard.set(&kit(30, 3, 0, "First")).unwrap();
        guard.set(&kit(31, 3, 1, "Second")).unwrap();
        guard.set(&kit(4, ROOT_ID, 1, "Other")).unwrap();
    }
    let before = store.create_snapshot();

    {
        let guard = store.write().await;
        assert!(guard.clear(3).unwrap());
        assert!(!guard.clear(3).unwrap());
    }
    let after = store.create_snapshot();

    for id in [3, 30, 31] {
        assert!(after.get(id).is_none(), "node {id} should be gone");
        assert!(before.get(id).is_some(), "node {id} should still be pinned");
    }
    assert_eq!(child_ids(&after.get_at_root()), vec![4]);
    assert_eq!(after.get(4).unwrap().previous_sibling_id, None);
    assert_eq!(child_ids(&before.get_children(3)), vec![30, 31]);

    let history = store.chain(3);
    assert!(matches!(history.first(), Some((_, None))));
    assert_eq!(store.count(), 1);
}

#[tokio::test]
async fn lookup_by_key_follows_set_and_clear() {
    let store = store();
    {
        let guard = store.write().await;
        guard.set(&kit(8, ROOT_ID, 0, "Keyed")).unwrap();
    }
    let uid = Uuid::from_u128(8);
    assert_eq!(store.create_snapshot().get_by_key(uid).unwrap().id, 8);

    {
        let guard = store.write().await;
        guard.clear(8).unwrap();
    }
    assert!(store.create_snapshot().get_by_key(uid).is_none());
}

#[tokio::test]
async fn dropping_snapshots_lets_collection_trim_history() {
    let store = store();
    {
        let guard = store.write().await;
        guard.set(&kit(1, ROOT_ID, 0, "v1")).unwrap();
    }
    let old = store.create_snapshot();
    {
        let guard = store.write().await;
        guard.set(&kit(1, ROOT_ID, 0, "v2")).unwrap();
    }
    let current = store.create_snapshot();
    assert_eq!(store.chain(1).len(), 2);

    store.collect().await;
    assert_eq!(store.chain(1).len(), 2, "pinned history must survive collection");
    drop(old);
    assert!(store.collect().await > 0);
    assert_eq!(store.chain(1).len(), 1);
    assert_eq!(
        current.get(1).unwrap().published_data.as_ref().unwrap().name,
        "v2"
    );
}

#[tokio::test]
async fn automatic_collection_bounds_history() {
    let store = Arc::new(ContentStore::new(
        ContentKind::Content,
        CacheConfig {
            auto_collect: true,
            collect_min_gen_delta: 2,
            ..Default::default()
        },
    ));

    for round in 0..10 {
        {
            let guard = store.write().await;
            guard.set(&kit(1, ROOT_ID, 0, &format!("v{round}"))).unwrap();
        }
        drop(store.create_snapshot());
    }

    assert!(store.chain(1).len() <= 4, "history was {:?}", store.chain(1).len());
    assert_eq!(store.pinned_count(), 0);
}
